// WebSocket server for voter clients. One connection carries one voter
// session; every text frame is a request answered with one text frame.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Pause after a failed accept, e.g. while the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Application side of a connection: owns per-connection session state and
/// turns request text into reply text.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    type Session: Send;

    /// Called once per accepted connection, after the handshake.
    fn open_session(&self, addr: &str) -> Self::Session;

    /// Produce the reply for one text frame.
    async fn handle_text(&self, session: &mut Self::Session, text: &str) -> String;

    /// Called once the connection is gone.
    fn close_session(&self, _session: Self::Session) {}
}

/// Source of raw client streams for [`run`].
#[async_trait]
pub trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn local_addr(&self) -> io::Result<String>;

    /// Next client stream and its peer address.
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = tokio::net::TcpStream;

    fn local_addr(&self) -> io::Result<String> {
        TcpListener::local_addr(self).map(|addr| addr.to_string())
    }

    async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, addr.to_string()))
    }
}

/// Accept connections forever, serving each on its own task. A failed accept
/// is logged and retried; only a listener without an address is fatal.
pub async fn run<A, H>(mut acceptor: A, handler: Arc<H>) -> anyhow::Result<()>
where
    A: Acceptor,
    H: ConnectionHandler,
{
    let local_addr = acceptor.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = match acceptor.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        debug!("Accepted connection from {addr}");

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            serve_connection(stream, addr, handler).await;
        });
    }
}

/// Handshake, then pump requests through `handler` until the client leaves.
async fn serve_connection<S, H>(stream: S, addr: String, handler: Arc<H>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: ConnectionHandler,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    info!("Client connected from {addr}");

    let (mut write, read) = ws_stream.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(32);

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            if let Err(e) = write.send(Message::text(reply)).await {
                warn!("Failed to send to {writer_addr}: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut session = handler.open_session(&addr);
    // A closed reply channel only means the writer already gave up.
    let _ = process_message_stream(read, handler.as_ref(), &mut session, &reply_tx, &addr).await;
    handler.close_session(session);

    drop(reply_tx);
    let _ = writer.await;
    info!("Client {addr} disconnected");
}

/// Answer text frames from `stream` through `handler`, sending each reply
/// into `tx`. Returns `Err(())` if the reply channel is closed.
///
/// Generic over the stream so it can be driven by in-memory message lists.
pub async fn process_message_stream<St, H>(
    mut stream: St,
    handler: &H,
    session: &mut H::Session,
    tx: &mpsc::Sender<String>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    H: ConnectionHandler,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let reply = handler.handle_text(session, text.as_str()).await;
                if tx.send(reply).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::Mutex;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Replies with the request text prefixed by a per-session counter.
    #[derive(Default)]
    struct Echo {
        closed: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ConnectionHandler for Echo {
        type Session = u32;

        fn open_session(&self, _addr: &str) -> u32 {
            0
        }

        async fn handle_text(&self, session: &mut u32, text: &str) -> String {
            *session += 1;
            format!("{session}:{text}")
        }

        fn close_session(&self, session: u32) {
            self.closed.lock().unwrap().push(session);
        }
    }

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    #[tokio::test]
    async fn each_text_frame_gets_one_reply_in_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let handler = Echo::default();
        let mut session = handler.open_session("test");
        let messages = vec![
            Ok(Message::Text("first".into())),
            Ok(Message::Text("second".into())),
        ];

        process_message_stream(mock_stream(messages), &handler, &mut session, &tx, "test")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "1:first");
        assert_eq!(rx.recv().await.unwrap(), "2:second");
        assert_eq!(session, 2);
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let handler = Echo::default();
        let mut session = 0;
        let messages = vec![
            Ok(Message::Text("before_close".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after_close_should_not_appear".into())),
        ];

        process_message_stream(mock_stream(messages), &handler, &mut session, &tx, "test")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "1:before_close");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let handler = Echo::default();
        let mut session = 0;
        let messages = vec![
            Ok(Message::Text("before_error".into())),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text("after_error_should_not_appear".into())),
        ];

        process_message_stream(mock_stream(messages), &handler, &mut session, &tx, "test")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "1:before_error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_and_ping_messages_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let handler = Echo::default();
        let mut session = 0;
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            Ok(Message::Text("after_ignored".into())),
        ];

        process_message_stream(mock_stream(messages), &handler, &mut session, &tx, "test")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "1:after_ignored");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returns_err_when_channel_closed() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let handler = Echo::default();
        let mut session = 0;
        let messages = vec![Ok(Message::Text("orphan".into()))];

        let result =
            process_message_stream(mock_stream(messages), &handler, &mut session, &tx, "test").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serves_real_connections_with_separate_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(Echo::default());
        let server = tokio::spawn(run(listener, Arc::clone(&handler)));

        let url = format!("ws://{addr}");
        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        first.send(Message::text("a")).await.unwrap();
        first.send(Message::text("b")).await.unwrap();
        second.send(Message::text("c")).await.unwrap();

        let reply = |m: Option<Result<Message, WsError>>| m.unwrap().unwrap().into_text().unwrap().to_string();
        assert_eq!(reply(first.next().await), "1:a");
        assert_eq!(reply(first.next().await), "2:b");
        assert_eq!(reply(second.next().await), "1:c");

        first.close(None).await.unwrap();
        second.close(None).await.unwrap();
        server.abort();
    }

    /// Fails the first accept, then hands out queued in-memory streams.
    struct FlakyAcceptor {
        failures: usize,
        streams: Vec<tokio::io::DuplexStream>,
    }

    #[async_trait]
    impl Acceptor for FlakyAcceptor {
        type Stream = tokio::io::DuplexStream;

        fn local_addr(&self) -> io::Result<String> {
            Ok("memory".into())
        }

        async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::other("too many open files"));
            }
            match self.streams.pop() {
                Some(stream) => Ok((stream, "memory-client".into())),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn accept_errors_do_not_stop_the_server() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let acceptor = FlakyAcceptor {
            failures: 2,
            streams: vec![server_io],
        };
        let handler = Arc::new(Echo::default());
        let server = tokio::spawn(run(acceptor, Arc::clone(&handler)));

        let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/", client_io)
            .await
            .unwrap();
        client.send(Message::text("still here")).await.unwrap();
        let reply = client.next().await.unwrap().unwrap().into_text().unwrap();
        assert_eq!(reply.as_str(), "1:still here");

        client.close(None).await.unwrap();
        assert!(!server.is_finished());
        server.abort();
    }
}
