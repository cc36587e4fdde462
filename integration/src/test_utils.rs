use async_stream::stream;
use futures::StreamExt;
use grpc_service::grpc_protocol;
use grpc_service::grpc_protocol::hello_service_server::{HelloService, HelloServiceServer};
use hello_duplex::config::{ClientConfig, RetryConfig, TlsConfig};
use hello_duplex::transport::Stream;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status, Streaming};

/// How the echo server ends the duplex channel
#[derive(Debug, Clone, Copy)]
pub enum EchoBehaviour {
    /// Echoes until the client goes away
    Forever,
    /// Ends its stream after echoing that many messages
    CloseAfter(usize),
    /// Fails the call with the code after echoing that many messages
    FailAfter(usize, Code),
}

#[derive(Debug, Clone, Copy)]
pub struct EchoServer {
    behaviour: EchoBehaviour,
}

#[tonic::async_trait]
impl HelloService for EchoServer {
    async fn hello(
        &self,
        request: Request<grpc_protocol::Text>,
    ) -> Result<Response<grpc_protocol::Text>, Status> {
        Ok(Response::new(request.into_inner()))
    }

    type ChannelStream = Stream<grpc_protocol::Text>;

    async fn channel(
        &self,
        request: Request<Streaming<grpc_protocol::Text>>,
    ) -> Result<Response<Self::ChannelStream>, Status> {
        let mut inbound = request.into_inner();
        let behaviour = self.behaviour;
        let echoes = stream! {
            let mut echoed = 0;
            while let Some(Ok(message)) = inbound.next().await {
                yield Ok(message);
                echoed += 1;
                match behaviour {
                    EchoBehaviour::CloseAfter(count) if echoed >= count => break,
                    EchoBehaviour::FailAfter(count, code) if echoed >= count => {
                        yield Err(Status::new(code, "echo server failure"));
                        break;
                    }
                    _ => (),
                }
            }
        };
        Ok(Response::new(Box::pin(echoes) as Self::ChannelStream))
    }
}

/// Serves an echo server on an ephemeral local port until the runtime stops
pub async fn spawn_echo_server(behaviour: EchoBehaviour) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Unable to bind echo server");
    let addr = listener.local_addr().expect("Echo server has no address");
    tokio::spawn(
        Server::builder()
            .add_service(HelloServiceServer::new(EchoServer { behaviour }))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    addr
}

/// Plaintext client config targeting `addr`, with a fast cadence
pub fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{}", addr),
        insecure: true,
        send_interval_ms: 50,
        drain_timeout_ms: 1000,
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        },
        ..Default::default()
    }
}

/// Self signed test CA, also usable as client identity
pub fn tls_config() -> TlsConfig {
    let tls_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tls");
    TlsConfig {
        ca_cert: format!("{}/hello-ca.pem", tls_dir),
        cert: Some(format!("{}/hello-ca.pem", tls_dir)),
        key: Some(format!("{}/hello-ca-key.pem", tls_dir)),
        server_domain: Some("test.hello-duplex.io".into()),
    }
}

/// An address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Unable to bind");
    listener.local_addr().expect("No address")
}

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
