//! Remote media notices for the front end.
//!
//! The queue is bounded and lossy: the negotiation side never waits on a slow
//! consumer.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct RemoteFrame {
    pub kind: String,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<RemoteFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Queues `frame`, dropping it when the queue is full or closed.
    pub fn offer(&self, frame: RemoteFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub type FrameReceiver = mpsc::Receiver<RemoteFrame>;

pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u16) -> RemoteFrame {
        RemoteFrame {
            kind: "video".into(),
            sequence_number: seq,
            timestamp: 0,
            payload: Bytes::from_static(b"\x00"),
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = frame_queue(1);
        assert!(tx.offer(frame(1)));
        assert!(!tx.offer(frame(2)));
        assert_eq!(tx.dropped(), 1);

        assert_eq!(rx.recv().await.map(|f| f.sequence_number), Some(1));
        assert!(tx.offer(frame(3)));
    }

    #[test]
    fn closed_queue_counts_drops() {
        let (tx, rx) = frame_queue(4);
        drop(rx);
        assert!(!tx.offer(frame(1)));
        assert_eq!(tx.dropped(), 1);
    }
}
