pub mod commands;
pub mod config;
pub mod logger;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod utils;

use anyhow::Context;
use commands::{CommandHandle, CommandSequencer};
use config::Config;
use logger::LogView;
use media::FrameReceiver;
use peer::connection::WebRtcEngineFactory;
use session::SessionManager;
use signaling::websocket::WebSocketConnector;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 32;
const FRAME_QUEUE: usize = 8;

pub const HELP: &str =
    "Commands: offer, create-data-channel, send <text>, restart, status, leave";

/// Joins the configured room and serves operator commands from stdin until
/// `leave` or end of input.
pub async fn run(config: Config, log_view: Option<LogView>) -> anyhow::Result<()> {
    let ice_servers = config.ice_servers()?;
    let room_id = config.room_id();
    let (frames, frame_rx) = media::frame_queue(FRAME_QUEUE);

    let factory = Arc::new(WebRtcEngineFactory {
        ice_servers,
        video: !config.no_video,
        frames,
    });
    let mut manager = SessionManager::new(
        config.session_options(),
        factory,
        Arc::new(WebSocketConnector),
    );
    manager
        .join(&config.server, &room_id)
        .await
        .with_context(|| format!("failed to join room {room_id} via {}", config.server))?;
    println!("Room: {room_id}");
    println!("{HELP}");

    let (handle, sequencer) = CommandSequencer::new(manager, COMMAND_QUEUE);
    if let Some(view) = log_view {
        tokio::spawn(print_log_view(view));
    }
    tokio::spawn(drain_frames(frame_rx));
    spawn_stdin_reader(handle);

    sequencer.run().await;
    info!("session finished");
    Ok(())
}

async fn print_log_view(mut view: LogView) {
    while let Some(line) = view.lines.recv().await {
        println!("{line}");
    }
}

async fn drain_frames(mut frames: FrameReceiver) {
    let mut received: u64 = 0;
    while let Some(frame) = frames.recv().await {
        received += 1;
        if received % 300 == 1 {
            debug!(
                kind = %frame.kind,
                seq = frame.sequence_number,
                bytes = frame.payload.len(),
                received,
                "remote media"
            );
        }
    }
}

/// Reads operator commands on a plain thread; end of input leaves the room.
fn spawn_stdin_reader(handle: CommandHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if handle.submit_blocking(line).is_err() {
                return;
            }
        }
        let _ = handle.submit_blocking("leave");
    });
}
