use std::{path::PathBuf, sync::Arc};
use clap::Parser;
use thiserror::Error;

use pantaubin_notifier::compartments::Volume;
use pantaubin_notifier::config::{Config, ConfigError, MqttBroker, PushCredentials};
use pantaubin_notifier::feed::{FeedError, LatestVolumes};
use pantaubin_notifier::http::{self, AppState};
use pantaubin_notifier::log_level::{self, LogLevel};
use pantaubin_notifier::mqtt;
use pantaubin_notifier::notifier::Notifier;
use pantaubin_notifier::push::{self, PushDispatcher, TransportError};
use pantaubin_notifier::recipients::{DataFileLoadError, MemoryDirectory, RecipientDirectory};

/// Sends a push notification when a waste compartment becomes full.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// JSON configuration file
    #[clap(long, env = "PANTAUBIN_CONFIG")]
    config: Option<PathBuf>,

    #[clap(long, value_enum)]
    log_level: Option<LogLevel>,

    /// HTTP listening port
    #[clap(long, env = "PORT")]
    port: Option<u16>,

    /// Fill percentage at which a compartment is full
    #[clap(long, env = "THRESHOLD")]
    threshold: Option<Volume>,

    /// MQTT broker holding the compartment volumes, host[:port]
    #[clap(long, env = "MQTT_BROKER")]
    mqtt_broker: Option<String>,

    /// JSON file with the push provider credentials
    #[clap(long, env = "PUSH_CREDENTIALS")]
    push_credentials: Option<PathBuf>,

    /// Validate the configuration and exit
    #[clap(long)]
    check_config: bool,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot load recipient tokens: {0}")]
    Tokens(#[from] DataFileLoadError),
    #[error("cannot set up push delivery: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}

impl Cli {

    fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::default(),
        };

        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(mqtt_broker) = &self.mqtt_broker {
            config.mqtt_broker = mqtt_broker.parse::<MqttBroker>()?;
        }
        if let Some(push_credentials) = &self.push_credentials {
            config.push_credentials = Some(push_credentials.clone());
        }

        config.check()?;
        Ok(config)
    }

}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = cli.load_config();
    let level = match &config {
        Ok(config) => config.log_level,
        Err(_) => cli.log_level.unwrap_or_default(),
    };
    log_level::init_logging(level);

    let config = match config {
        Ok(config) => config,
        Err(error) => {
            log::error!("{}", error);
            std::process::exit(1);
        },
    };

    if cli.check_config {
        println!("Configuration OK");
        return;
    }

    if let Err(error) = run(config).await {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let credentials = config.push_credentials.as_ref().map(PushCredentials::load_from_file).transpose()?;
    let transport = push::transport_from_credentials(credentials.as_ref(), config.dispatch_timeout()).await?;
    let dispatcher = PushDispatcher::new(transport, config.dispatch_timeout());

    let directory: Arc<dyn RecipientDirectory> = match &config.tokens_file {
        Some(tokens_file) => Arc::new(MemoryDirectory::with_file(tokens_file)?),
        None => Arc::new(MemoryDirectory::new()),
    };

    let latest = LatestVolumes::new();
    let (_mqtt_client, event_loop) = mqtt::init(&config).await?;
    let subscription = mqtt::subscribe(event_loop, config.feed_topic.clone(), latest.clone());

    let notifier = Arc::new(Notifier::new(&config, Arc::new(latest), directory.clone(), dispatcher));
    log::info!(
        "Notifying when a compartment reaches {}% ({} policy), watching {}",
        config.threshold,
        config.policy,
        config.compartments.iter().map(|compartment| compartment.as_str()).collect::<Vec<_>>().join(", ")
    );

    tokio::spawn(notifier.clone().run(subscription));
    if let Some(period) = config.sweep_interval() {
        tokio::spawn(notifier.clone().sweep_every(period));
    }

    let router = http::router(AppState { directory, notifier }, config.enable_trigger_endpoint);
    http::serve(router, config.http_port, shutdown_signal()).await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for Ctrl-C: {}", error);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
