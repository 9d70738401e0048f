//! CLI for auditbus
//!
//! Subcommands:
//! - `server`: run the WebSocket broker
//! - `consume`: connect as a consumer and log every delivery
//! - `publish`: publish one message and print its id

use std::sync::Arc;

use auditbus::broker::{Broker, Delivery};
use auditbus::client::{self, PubSubClient};
use auditbus::config::load_config;
use auditbus::transport::start_websocket_server;
use auditbus::utils::logging;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "auditbus", version, about)]
enum Command {
    /// Start the WebSocket broker
    Server,
    /// Subscribe as a consumer and acknowledge every delivery
    Consume {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Logical consumer name
        #[arg(long)]
        consumer: String,
        /// Topic to subscribe to; repeat for several
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
    },
    /// Publish one message
    Publish {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "cli")]
        producer: String,
        /// Explicit message id; one is generated when omitted
        #[arg(long)]
        message_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let outcome = match cmd {
        Command::Server => run_server(settings).await,
        Command::Consume {
            url,
            consumer,
            topics,
        } => run_consumer(url, consumer, topics).await,
        Command::Publish {
            url,
            topic,
            message,
            producer,
            message_id,
        } => client::publish(&url, &topic, &message, &producer, message_id.as_deref())
            .await
            .map(|id| println!("{id}")),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(settings: auditbus::config::Settings) -> auditbus::Result<()> {
    let broker = Arc::new(Broker::open(&settings.broker)?);

    tokio::select! {
        res = start_websocket_server(broker, &settings) => {
            error!("WebSocket server exited unexpectedly.");
            res
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    }
}

async fn run_consumer(url: String, consumer: String, topics: Vec<String>) -> auditbus::Result<()> {
    let mut client = PubSubClient::new(url, consumer.clone(), topics.clone());
    for topic in topics {
        let consumer = consumer.clone();
        client.register_handler(topic, move |d: &Delivery| {
            info!(%consumer, topic = %d.topic, producer = %d.producer, "{}", d.message);
        });
    }
    client.run().await
}
