pub mod glare;
pub mod machine;

pub use glare::is_self_originated;
pub use machine::{CodecPreference, NegotiationError, Negotiator, Severity, StatusSnapshot};
