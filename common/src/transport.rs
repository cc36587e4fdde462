use crate::config::ClientConfig;
use crate::error::HelloError;
use crate::message::Message;
use grpc_service::grpc_protocol;
use grpc_service::grpc_protocol::hello_service_client::HelloServiceClient;
use http::Uri;
use std::pin::Pin;
use std::str::FromStr;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

pub type Stream<T> =
    Pin<Box<dyn futures::Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Messages pushed by the send side of a duplex channel
pub type Outbound = ReceiverStream<grpc_protocol::Text>;

/// The two calls of the hello service.
///
/// Implemented by the generated tonic client; tests plug in-memory doubles here.
#[tonic::async_trait]
pub trait HelloTransport: Send {
    async fn hello(&mut self, request: Message) -> Result<Message, Status>;

    /// Opens the bidirectional `Channel` call: `outbound` is sent to the peer,
    /// the returned stream yields what the peer sends back.
    async fn open_channel(
        &mut self,
        outbound: Outbound,
    ) -> Result<Stream<grpc_protocol::Text>, Status>;
}

#[tonic::async_trait]
impl HelloTransport for HelloServiceClient<Channel> {
    async fn hello(&mut self, request: Message) -> Result<Message, Status> {
        let request: grpc_protocol::Text = request.into();
        let response = HelloServiceClient::hello(self, Request::new(request)).await?;
        Ok(response.into_inner().into())
    }

    async fn open_channel(
        &mut self,
        outbound: Outbound,
    ) -> Result<Stream<grpc_protocol::Text>, Status> {
        let response = self.channel(Request::new(outbound)).await?;
        let inbound: Stream<grpc_protocol::Text> = Box::pin(response.into_inner());
        Ok(inbound)
    }
}

/// Builds the endpoint described by the config, without connecting.
///
/// Plaintext transport is only accepted when explicitly allowed.
pub fn endpoint(config: &ClientConfig) -> Result<Endpoint, HelloError> {
    let url = &config.server_url;
    let uri = Uri::from_str(url).map_err(|source| HelloError::InvalidUrl {
        url: url.clone(),
        source,
    })?;
    let endpoint = Channel::builder(uri)
        .connect_timeout(config.connect_timeout())
        .tcp_keepalive(Some(config.tcp_keepalive()));
    match &config.tls {
        Some(tls_config) => endpoint
            .tls_config(tls_config.get_client_config()?)
            .map_err(|source| HelloError::TlsConfig {
                url: url.clone(),
                source,
            }),
        None if config.insecure => {
            warn!("Connecting to {} without transport encryption", url);
            Ok(endpoint)
        }
        None => Err(HelloError::InsecureTransportRefused(url.clone())),
    }
}

/// Connects to the hello service, retrying transient failures until `shutdown`
/// is cancelled
pub async fn connect(
    config: &ClientConfig,
    shutdown: &CancellationToken,
) -> Result<HelloServiceClient<Channel>, HelloError> {
    let endpoint = endpoint(config)?;
    let channel = config
        .retry_policy()
        .retry("Connection", shutdown, || {
            let endpoint = endpoint.clone();
            async move {
                endpoint
                    .connect()
                    .await
                    .map_err(|source| HelloError::Connect {
                        url: config.server_url.clone(),
                        source,
                    })
            }
        })
        .await?;
    info!("Connected to {}", config.server_url);
    Ok(HelloServiceClient::new(channel))
}

/// Unary hello call, abandoned when `shutdown` is cancelled
pub async fn say_hello<T: HelloTransport>(
    transport: &mut T,
    request: Message,
    shutdown: &CancellationToken,
) -> Result<Message, HelloError> {
    debug!("Hello {}", request);
    let reply = tokio::select! {
        reply = transport.hello(request) => reply.map_err(HelloError::Unary)?,
        _ = shutdown.cancelled() => return Err(HelloError::Cancelled),
    };
    debug!("Hello reply {}", reply);
    Ok(reply)
}
