use crate::file_utils::{expand_tilde, parse_yaml_from_file, read, FileError};
use crate::retry::RetryPolicy;
use anyhow::Error;
use serde::Deserialize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

pub const CONFIG_FILE_NAME: &str = "client.yml";

const DEFAULT_CONFIG_LOCATION: &[&str] = &["~/.hello-duplex/", "/etc/hello-duplex/"];

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct TlsConfig {
    /// CA PEM encoded certificate file path
    pub ca_cert: String,
    /// PEM encoded client certificate file path, only needed when the server
    /// authenticates its clients
    pub cert: Option<String>,
    /// PEM encoded client private key file path
    pub key: Option<String>,
    /// Expected domain name of the server certificate.
    ///
    /// The domain name of the server certificate is validated against the server url.
    /// Specifying the server_domain overrides the server url domain.
    pub server_domain: Option<String>,
}

impl TlsConfig {
    pub fn get_client_config(&self) -> Result<ClientTlsConfig, FileError> {
        let mut client_tls_config =
            ClientTlsConfig::new().ca_certificate(Certificate::from_pem(read(&self.ca_cert)?));
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            client_tls_config = client_tls_config.identity(Identity::from_pem(read(cert)?, read(key)?));
        }
        if let Some(domain) = &self.server_domain {
            client_tls_config = client_tls_config.domain_name(domain);
        }
        Ok(client_tls_config)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts for connecting and opening the duplex channel
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// TLS configuration. If not present, `insecure` must be set to use plain
    /// unencrypted socket communication
    pub tls: Option<TlsConfig>,
    pub insecure: bool,
    /// Payload of the unary hello call
    pub hello_payload: String,
    /// Payload sent periodically on the duplex channel
    pub channel_payload: String,
    pub send_interval_ms: u64,
    /// How long received messages are still drained once the send side broke
    pub drain_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub tcp_keepalive_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:1234".to_string(),
            tls: None,
            insecure: false,
            hello_payload: "hello".to_string(),
            channel_payload: "hi".to_string(),
            send_interval_ms: 1000,
            drain_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            tcp_keepalive_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads the configuration from `provided_config` or, when not provided, from
    /// the first default location holding a `client.yml`.
    ///
    /// A provided path must exist; without any file the defaults are used.
    pub fn parse<P: AsRef<Path>>(provided_config: &Option<P>) -> Result<ClientConfig, Error> {
        if let Some(path) = provided_config {
            return parse_yaml_from_file(path);
        }
        match default_config_file() {
            Some(path) => {
                info!("Loading configuration from {}", path.to_string_lossy());
                parse_yaml_from_file(path)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(ClientConfig::default())
            }
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        (&self.retry).into()
    }
}

fn default_config_file() -> Option<PathBuf> {
    DEFAULT_CONFIG_LOCATION
        .iter()
        .map(|loc| expand_tilde(loc).join(CONFIG_FILE_NAME))
        .find(|loc| loc.exists())
}
