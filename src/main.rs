use std::sync::Arc;

use tracing::{error, info};

use chatrelay::{Config, DispatcherBuilder, ParticipantDirectory, SessionSink};

fn main() {
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    if let Err(e) = chatrelay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        chatrelay::logging::init_console_only(&config.logging.level);
    }

    info!("chatrelay - chat relay for multiplayer game servers");

    let directory = Arc::new(ParticipantDirectory::new());
    let sink = Arc::new(SessionSink::new());
    let dispatcher = match DispatcherBuilder::from_config(&config, directory, sink) {
        Ok(builder) => builder.build(),
        Err(e) => {
            error!("Invalid channel configuration: {e}");
            std::process::exit(1);
        }
    };

    let default_id = dispatcher.registry().default_channel().id().to_string();
    for channel in dispatcher.registry().iter() {
        info!(
            channel = channel.id(),
            scope = %channel.scope(),
            quick_prefix = channel.quick_prefix().unwrap_or("-"),
            default = channel.id() == default_id,
            "channel configured"
        );
    }
}
