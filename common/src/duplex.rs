//! The duplex echo loop.
//!
//! A producer task sends the configured payload on a fixed cadence while the
//! calling task drains what the peer sends back. Both are joined by a
//! cancellation token: neither of them can stop the process on its own.

use crate::config::ClientConfig;
use crate::error::HelloError;
use crate::message::Message;
use crate::retry::RetryPolicy;
use crate::transport::{HelloTransport, Stream};
use futures::StreamExt;
use grpc_service::grpc_protocol;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Outbound messages buffered before the producer waits on the transport
const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct DuplexOptions {
    /// Payload of every message sent
    pub payload: String,
    /// Delay between two sends
    pub interval: Duration,
    /// Grace period given to the peer to end its stream once sending failed
    pub drain_timeout: Duration,
    /// Applied to opening the channel
    pub retry: RetryPolicy,
}

impl Default for DuplexOptions {
    fn default() -> Self {
        ClientConfig::default().into()
    }
}

impl From<&ClientConfig> for DuplexOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            payload: config.channel_payload.clone(),
            interval: config.send_interval(),
            drain_timeout: config.drain_timeout(),
            retry: config.retry_policy(),
        }
    }
}

impl From<ClientConfig> for DuplexOptions {
    fn from(config: ClientConfig) -> Self {
        (&config).into()
    }
}

/// How a duplex channel that did not fail ended
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreamEnd {
    /// The peer closed its send side
    Drained,
    /// The shutdown token was raised
    Cancelled,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DuplexSummary {
    pub sent: u64,
    pub received: u64,
    pub end: StreamEnd,
}

/// Drives one duplex channel to completion.
///
/// Every message received is handed to `on_message`, in receipt order. Returns
/// when the peer ends its stream, when `shutdown` is cancelled (opening included),
/// or with the first send or receive error.
pub async fn run<T, F>(
    transport: &mut T,
    options: &DuplexOptions,
    shutdown: &CancellationToken,
    mut on_message: F,
) -> Result<DuplexSummary, HelloError>
where
    T: HelloTransport,
    F: FnMut(Message),
{
    let (sender, mut inbound) = match open_with_retry(transport, &options.retry, shutdown).await {
        Ok(opened) => opened,
        Err(HelloError::Cancelled) => {
            info!("Duplex channel cancelled before being opened");
            return Ok(DuplexSummary {
                sent: 0,
                received: 0,
                end: StreamEnd::Cancelled,
            });
        }
        Err(e) => return Err(e),
    };
    info!("Duplex channel opened");

    // also cancelled by the producer when the send side breaks
    let stream_token = shutdown.child_token();
    let producer = tokio::spawn(produce(
        sender,
        options.payload.clone(),
        options.interval,
        stream_token.clone(),
    ));

    let mut received = 0;
    let consumed = consume(
        &mut inbound,
        options.drain_timeout,
        shutdown,
        &stream_token,
        &mut received,
        &mut on_message,
    )
    .await;

    // close both directions: the producer drops the outbound sender on exit
    stream_token.cancel();
    drop(inbound);
    let sent = producer.await?;

    let summary = |end| DuplexSummary {
        sent,
        received,
        end,
    };
    match consumed {
        Consumed::Drained => {
            info!(
                "Duplex channel closed by peer ({} sent, {} received)",
                sent, received
            );
            Ok(summary(StreamEnd::Drained))
        }
        Consumed::Cancelled => {
            info!(
                "Duplex channel cancelled ({} sent, {} received)",
                sent, received
            );
            Ok(summary(StreamEnd::Cancelled))
        }
        Consumed::Failed(status) => {
            error!("Receive failed: {}", status);
            Err(HelloError::Receive(status))
        }
        Consumed::SendFailed => {
            error!("Send side closed and the peer did not end its stream");
            Err(HelloError::Send)
        }
    }
}

async fn open_with_retry<T: HelloTransport>(
    transport: &mut T,
    retry: &RetryPolicy,
    shutdown: &CancellationToken,
) -> Result<(mpsc::Sender<grpc_protocol::Text>, Stream<grpc_protocol::Text>), HelloError> {
    let mut backoff = retry.backoff();
    loop {
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let opened = tokio::select! {
            opened = transport.open_channel(ReceiverStream::new(receiver)) => opened,
            _ = shutdown.cancelled() => return Err(HelloError::Cancelled),
        };
        match opened {
            Ok(inbound) => return Ok((sender, inbound)),
            Err(status) => {
                backoff
                    .wait(
                        "Duplex channel opening",
                        HelloError::StreamOpen(status),
                        shutdown,
                    )
                    .await?
            }
        }
    }
}

/// Sends `payload` every `interval` until `token` is cancelled or the
/// transport stops accepting messages. Returns the number of messages sent.
async fn produce(
    sender: mpsc::Sender<grpc_protocol::Text>,
    payload: String,
    interval: Duration,
    token: CancellationToken,
) -> u64 {
    let mut sent = 0;
    loop {
        let message = Message::new(payload.clone());
        debug!("Sending {}", message);
        let accepted = tokio::select! {
            res = sender.send(message.into()) => res.is_ok(),
            _ = token.cancelled() => return sent,
        };
        if !accepted {
            // the transport dropped the outbound stream
            warn!("Duplex channel send side is closed");
            token.cancel();
            return sent;
        }
        sent += 1;
        tokio::select! {
            _ = tokio::time::sleep(interval) => (),
            _ = token.cancelled() => return sent,
        }
    }
}

enum Consumed {
    Drained,
    Cancelled,
    Failed(Status),
    SendFailed,
}

async fn consume<F: FnMut(Message)>(
    inbound: &mut Stream<grpc_protocol::Text>,
    drain_timeout: Duration,
    shutdown: &CancellationToken,
    stream_token: &CancellationToken,
    received: &mut u64,
    on_message: &mut F,
) -> Consumed {
    tokio::select! {
        consumed = drain(inbound, received, on_message) => return consumed,
        _ = shutdown.cancelled() => return Consumed::Cancelled,
        _ = stream_token.cancelled() => (),
    }
    // sending failed, the peer is probably closing the stream
    debug!(
        "Draining duplex channel for at most {}ms",
        drain_timeout.as_millis()
    );
    tokio::select! {
        consumed = drain(inbound, received, on_message) => consumed,
        _ = shutdown.cancelled() => Consumed::Cancelled,
        _ = tokio::time::sleep(drain_timeout) => Consumed::SendFailed,
    }
}

async fn drain<F: FnMut(Message)>(
    inbound: &mut Stream<grpc_protocol::Text>,
    received: &mut u64,
    on_message: &mut F,
) -> Consumed {
    while let Some(message) = inbound.next().await {
        match message {
            Ok(message) => {
                let message = Message::from(message);
                debug!("Received {}", message);
                *received += 1;
                on_message(message);
            }
            Err(status) => return Consumed::Failed(status),
        }
    }
    Consumed::Drained
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::Outbound;
    use futures::stream;
    use std::collections::VecDeque;
    use tonic::Code;

    /// Echoes the outbound stream back, optionally stopping or failing after
    /// some messages.
    #[derive(Default)]
    struct EchoTransport {
        close_after: Option<usize>,
        fail_after: Option<(usize, Code)>,
        /// Consumed, one per open attempt, before opening succeeds
        open_failures: VecDeque<Code>,
        /// Drops the outbound stream and never answers
        deaf: bool,
        /// Accepts everything, answers nothing, never ends
        mute: bool,
        /// Never completes the open call
        hung_open: bool,
        opened: u32,
    }

    #[tonic::async_trait]
    impl HelloTransport for EchoTransport {
        async fn hello(&mut self, request: Message) -> Result<Message, Status> {
            Ok(request)
        }

        async fn open_channel(
            &mut self,
            outbound: Outbound,
        ) -> Result<Stream<grpc_protocol::Text>, Status> {
            self.opened += 1;
            if self.hung_open {
                return futures::future::pending().await;
            }
            if let Some(code) = self.open_failures.pop_front() {
                return Err(Status::new(code, "open failure"));
            }
            if self.deaf {
                drop(outbound);
                let silence: Stream<grpc_protocol::Text> =
                    Box::pin(stream::pending::<Result<grpc_protocol::Text, Status>>());
                return Ok(silence);
            }
            if self.mute {
                let swallowed: Stream<grpc_protocol::Text> = Box::pin(outbound.filter_map(|_| async {
                    None::<Result<grpc_protocol::Text, Status>>
                }));
                return Ok(swallowed);
            }
            let echoes = outbound.map(Ok::<_, Status>);
            let inbound: Stream<grpc_protocol::Text> = match (self.close_after, self.fail_after)
            {
                (_, Some((count, code))) => Box::pin(
                    echoes
                        .take(count)
                        .chain(stream::once(async move { Err(Status::new(code, "boom")) })),
                ),
                (Some(count), None) => Box::pin(echoes.take(count)),
                (None, None) => Box::pin(echoes),
            };
            Ok(inbound)
        }
    }

    fn options() -> DuplexOptions {
        DuplexOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cancel_after(token: &CancellationToken, delay: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn peer_closing_after_one_echo_drains_cleanly() {
        let mut transport = EchoTransport {
            close_after: Some(1),
            ..Default::default()
        };
        let mut lines = Vec::new();
        let summary = run(
            &mut transport,
            &options(),
            &CancellationToken::new(),
            |message| lines.push(message.into_payload()),
        )
        .await
        .unwrap();
        assert_eq!(vec!["hi".to_string()], lines);
        assert_eq!(StreamEnd::Drained, summary.end);
        assert_eq!(1, summary.received);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_error_fails_the_loop() {
        let mut transport = EchoTransport {
            fail_after: Some((2, Code::Internal)),
            ..Default::default()
        };
        let mut received = 0;
        let err = run(
            &mut transport,
            &options(),
            &CancellationToken::new(),
            |_| received += 1,
        )
        .await
        .unwrap_err();
        match err {
            HelloError::Receive(status) => assert_eq!(Code::Internal, status.code()),
            e => panic!("unexpected error {}", e),
        }
        assert_eq!(2, received);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_on_a_fixed_cadence() {
        let mut transport = EchoTransport::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_millis(5500));
        let mut lines = Vec::new();
        let summary = run(&mut transport, &options(), &shutdown, |message| {
            lines.push(message.into_payload())
        })
        .await
        .unwrap();

        assert_eq!(StreamEnd::Cancelled, summary.end);
        // one send right away, then one per second
        assert!(summary.sent >= 5, "only {} sent", summary.sent);
        assert_eq!(summary.sent, summary.received);
        assert!(lines.iter().all(|line| line == "hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_a_silent_channel() {
        let mut transport = EchoTransport {
            mute: true,
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_millis(2500));
        let summary = run(&mut transport, &options(), &shutdown, |_| ())
            .await
            .unwrap();
        assert_eq!(StreamEnd::Cancelled, summary.end);
        assert_eq!(3, summary.sent);
        assert_eq!(0, summary.received);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_hung_open() {
        let mut transport = EchoTransport {
            hung_open: true,
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(1));
        let summary = run(&mut transport, &options(), &shutdown, |_| ())
            .await
            .unwrap();
        assert_eq!(StreamEnd::Cancelled, summary.end);
        assert_eq!(0, summary.sent);
        assert_eq!(1, transport.opened);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_open_backoff() {
        let mut transport = EchoTransport {
            open_failures: vec![Code::Unavailable; 5].into(),
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_millis(50));
        let summary = run(
            &mut transport,
            &DuplexOptions {
                retry: RetryPolicy {
                    max_attempts: 5,
                    initial_backoff: Duration::from_secs(60),
                    max_backoff: Duration::from_secs(60),
                },
                ..Default::default()
            },
            &shutdown,
            |_| (),
        )
        .await
        .unwrap();
        assert_eq!(StreamEnd::Cancelled, summary.end);
        assert_eq!(1, transport.opened);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_send_side_without_end_of_stream_is_an_error() {
        let mut transport = EchoTransport {
            deaf: true,
            ..Default::default()
        };
        let err = run(&mut transport, &options(), &CancellationToken::new(), |_| ())
            .await
            .unwrap_err();
        assert!(matches!(err, HelloError::Send));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_open_failures_are_retried() {
        let mut transport = EchoTransport {
            close_after: Some(1),
            open_failures: vec![Code::Unavailable, Code::Unavailable].into(),
            ..Default::default()
        };
        let summary = run(&mut transport, &options(), &CancellationToken::new(), |_| ())
            .await
            .unwrap();
        assert_eq!(StreamEnd::Drained, summary.end);
        assert_eq!(3, transport.opened);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_open_failure_is_not_retried() {
        let mut transport = EchoTransport {
            open_failures: vec![Code::PermissionDenied].into(),
            ..Default::default()
        };
        let err = run(&mut transport, &options(), &CancellationToken::new(), |_| ())
            .await
            .unwrap_err();
        assert!(matches!(err, HelloError::StreamOpen(_)));
        assert_eq!(1, transport.opened);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failures_exhaust_attempts() {
        let mut transport = EchoTransport {
            open_failures: vec![Code::Unavailable; 5].into(),
            ..Default::default()
        };
        let err = run(&mut transport, &options(), &CancellationToken::new(), |_| ())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(3, transport.opened);
    }
}
