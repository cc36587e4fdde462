#[macro_use]
extern crate log;

use clap::Parser;
use hello_duplex::config::ClientConfig;
use hello_duplex::duplex::{self, DuplexOptions, DuplexSummary};
use hello_duplex::message::Message;
use hello_duplex::transport::{connect, say_hello};
use hello_duplex::PROTOCOL_VERSION;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug, Default)]
#[command(name = "hello-client", version)]
pub struct Opt {
    /// Configuration file, ~/.hello-duplex/client.yml then /etc/hello-duplex/client.yml are
    /// tried when not provided
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Url of the hello service, overrides the configuration file
    #[arg(short, long = "server-url")]
    pub server_url: Option<String>,
    /// Allow plaintext communication when no tls configuration is present
    #[arg(long)]
    pub insecure: bool,
    /// Payload sent periodically on the duplex channel
    #[arg(short, long)]
    pub payload: Option<String>,
    /// Delay between two messages sent on the duplex channel, in milliseconds
    #[arg(short, long = "interval-ms")]
    pub interval_ms: Option<u64>,
}

impl Opt {
    /// Command line values take precedence over the configuration file
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(server_url) = &self.server_url {
            config.server_url = server_url.clone();
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(payload) = &self.payload {
            config.channel_payload = payload.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.send_interval_ms = interval_ms;
        }
    }

    pub fn load_config(&self) -> Result<ClientConfig, anyhow::Error> {
        let mut config = ClientConfig::parse(&self.config)?;
        self.apply(&mut config);
        Ok(config)
    }
}

#[derive(Debug)]
pub struct ClientOutput {
    pub hello_reply: Message,
    pub summary: DuplexSummary,
}

/// Says hello, then runs the duplex channel until the peer closes it or
/// `shutdown` is raised. Every line to display is handed to `on_line`.
///
/// Raising `shutdown` before the channel is open fails with `HelloError::Cancelled`.
pub async fn client_main<F: FnMut(&str)>(
    config: ClientConfig,
    shutdown: &CancellationToken,
    mut on_line: F,
) -> Result<ClientOutput, anyhow::Error> {
    info!(
        "hello-client v{}, core v{}, protocol v{}",
        VERSION,
        hello_duplex::VERSION,
        PROTOCOL_VERSION
    );
    debug!("{:#?}", config);

    let mut client = connect(&config, shutdown).await?;

    let hello_reply = say_hello(
        &mut client,
        Message::new(config.hello_payload.clone()),
        shutdown,
    )
    .await?;
    on_line(hello_reply.payload());

    let options = DuplexOptions::from(&config);
    let summary = duplex::run(&mut client, &options, shutdown, |message| {
        on_line(message.payload())
    })
    .await?;

    Ok(ClientOutput {
        hello_reply,
        summary,
    })
}
