use clap::Parser;
use room_peer_lib::config::Config;
use room_peer_lib::logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let view = logger::init(&config.log_config())?;
    room_peer_lib::run(config, Some(view)).await
}
