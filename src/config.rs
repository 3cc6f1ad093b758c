//! Command-line and environment configuration.

use crate::logger::LogConfig;
use crate::negotiation::CodecPreference;
use crate::peer::connection::DEFAULT_STUN_SERVERS;
use crate::peer::types::ServerConfig;
use crate::session::SessionOptions;
use crate::utils::random_id;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "room-peer")]
#[command(about = "Joins a signaling room and negotiates a WebRTC session with the other participant")]
pub struct Config {
    /// Signaling server URL
    #[arg(long, env = "ROOM_PEER_SERVER", default_value = "ws://127.0.0.1:4000")]
    pub server: String,

    /// Room to join (random when omitted)
    #[arg(long, env = "ROOM_PEER_ROOM")]
    pub room: Option<String>,

    /// Codec moved to the front of the media section
    #[arg(long, default_value = "H264")]
    pub codec: String,

    /// Media section the codec preference applies to
    #[arg(long, default_value = "video")]
    pub media_kind: String,

    /// ICE server as `stun:host:port` or `turn:host:port,user,credential`; repeatable
    #[arg(long = "ice-server", value_name = "URL")]
    pub ice_servers: Vec<String>,

    /// Do not attach a local video track
    #[arg(long)]
    pub no_video: bool,

    /// Label of the data channel created by `create-data-channel`
    #[arg(long, default_value = "room-peer")]
    pub data_channel_label: String,

    /// Seconds a lost connection may take to recover before the session is closed
    #[arg(long, default_value_t = 10)]
    pub grace_period: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for `--log-level debug`
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid ICE server {0:?}: expected [stun|turn]:host:port[,user,credential]")]
    InvalidIceServer(String),
    #[error("TURN server {0} needs a username and credential")]
    MissingTurnCredentials(String),
}

impl Config {
    pub fn room_id(&self) -> String {
        self.room.clone().unwrap_or_else(random_id)
    }

    pub fn log_config(&self) -> LogConfig {
        let level = if self.verbose && self.log_level < LevelFilter::DEBUG {
            LevelFilter::DEBUG
        } else {
            self.log_level
        };
        LogConfig {
            level,
            file: self.log_file.clone(),
            ..LogConfig::default()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            codec: CodecPreference {
                kind: self.media_kind.clone(),
                codec: self.codec.clone(),
            },
            data_channel_label: self.data_channel_label.clone(),
            grace_period: Duration::from_secs(self.grace_period),
        }
    }

    /// ICE servers from `--ice-server`, or the public STUN defaults.
    pub fn ice_servers(&self) -> Result<Vec<ServerConfig>, ConfigError> {
        if self.ice_servers.is_empty() {
            return Ok(DEFAULT_STUN_SERVERS
                .iter()
                .enumerate()
                .filter_map(|(index, url)| parse_ice_server(index, url).ok())
                .collect());
        }
        self.ice_servers
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_ice_server(index, entry))
            .collect()
    }
}

/// `[stun|turn|stuns|turns]:host:port[,user,credential]`
pub fn parse_ice_server(index: usize, entry: &str) -> Result<ServerConfig, ConfigError> {
    let mut parts = entry.split(',').map(str::trim);
    let url = parts.next().unwrap_or_default();
    let username = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
    let credential = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
    if parts.next().is_some() {
        return Err(ConfigError::InvalidIceServer(entry.to_owned()));
    }

    let (kind, address) = match url.split_once(':') {
        Some(("stun" | "stuns", rest)) => ("stun", rest),
        Some(("turn" | "turns", rest)) => ("turn", rest),
        _ => return Err(ConfigError::InvalidIceServer(entry.to_owned())),
    };
    if address.is_empty() {
        return Err(ConfigError::InvalidIceServer(entry.to_owned()));
    }
    if kind == "turn" && (username.is_none() || credential.is_none()) {
        return Err(ConfigError::MissingTurnCredentials(url.to_owned()));
    }

    Ok(ServerConfig {
        id: format!("{kind}-{index}"),
        r#type: kind.to_owned(),
        url: url.to_owned(),
        username,
        credential,
    })
}
