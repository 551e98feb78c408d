use crate::error::{AvrError, Result};
use crate::framing::LineSplitter;
use crate::outbound::Outbound;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Upper bound on one readiness wait, and so on the latency of `close`
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Bytes read per readiness event
const READ_CHUNK: usize = 1024;

/// Time allowed for each candidate port to accept
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer of the text lines received from the receiver
pub trait LineHandler: Send + Sync + 'static {
    /// Called once per non-empty line, in arrival order, from the I/O task
    fn handle_line(&self, line: &str);

    /// Called once when the I/O task stops because of a socket failure
    fn connection_lost(&self, error: &AvrError) {
        let _ = error;
    }
}

/// Anything commands can be written to
pub trait CommandSink: Send + Sync {
    /// Queue `text` for transmission without waiting for it to be sent
    fn send_command(&self, text: &str) -> Result<()>;
}

/// State shared with the I/O task
struct Shared {
    outbound: Outbound,
    /// Lifecycle gate checked at the top of every loop iteration
    running: AtomicBool,
    /// Set once the link is unusable, by `close` or by a loop failure
    closed: AtomicBool,
    /// Weak so a handler that owns this connection does not keep it alive
    handler: Mutex<Option<Weak<dyn LineHandler>>>,
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn LineHandler>> {
        self.handler.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

/// Socket ownership; the stream moves into the I/O task and comes back on join
struct Link {
    stream: Option<TcpStream>,
    worker: Option<JoinHandle<TcpStream>>,
}

/// TCP connection to the receiver
///
/// Owns the socket and a background task that waits for read and write
/// readiness, flushes queued commands, and hands complete lines to the
/// registered [`LineHandler`]. Knows nothing about the protocol itself.
pub struct Connection {
    peer: SocketAddr,
    shared: Arc<Shared>,
    link: Mutex<Link>,
}

impl Connection {
    /// Connect to `host`, trying each port in order and keeping the first that
    /// accepts.
    pub async fn connect(host: &str, ports: &[u16]) -> Result<Self> {
        for &port in ports {
            tracing::info!("Connecting to {}:{}", host, port);
            match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    let peer = stream.peer_addr()?;
                    tracing::info!("Connected to {}", peer);
                    return Ok(Self::from_stream(stream, peer));
                }
                Ok(Err(e)) => tracing::debug!("Port {} failed: {}", port, e),
                Err(_) => tracing::debug!("Port {} timed out", port),
            }
        }

        Err(AvrError::Connection {
            host: host.to_string(),
            ports: ports.to_vec(),
        })
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            peer,
            shared: Arc::new(Shared {
                outbound: Outbound::new(),
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                handler: Mutex::new(None),
            }),
            link: Mutex::new(Link {
                stream: Some(stream),
                worker: None,
            }),
        }
    }

    /// Address of the receiver
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Register the consumer of received lines, replacing any previous one
    ///
    /// Only a weak reference is kept: lines stop being delivered once the
    /// caller drops its last `Arc` to the handler.
    pub fn set_line_handler<H: LineHandler>(&self, handler: &Arc<H>) {
        let handler: Weak<dyn LineHandler> = Arc::downgrade(handler) as Weak<H>;
        *self.shared.handler.lock().unwrap() = Some(handler);
    }

    /// Spawn the I/O task. Commands queued before this are sent once it runs.
    ///
    /// Calling `start` on a running connection does nothing.
    pub fn start(&self) -> Result<()> {
        let mut link = self.link.lock().unwrap();
        if link.worker.is_some() {
            return Ok(());
        }
        let stream = link.stream.take().ok_or(AvrError::ConnectionClosed)?;

        self.shared.running.store(true, Ordering::Release);
        link.worker = Some(tokio::spawn(run_loop(stream, self.shared.clone())));
        tracing::debug!("I/O task started for {}", self.peer);
        Ok(())
    }

    /// Whether the I/O task is still serving the socket
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Bytes queued but not yet accepted by the socket
    pub fn pending_bytes(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Stop the I/O task, wait for it to exit, then close the socket.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.outbound.wake();

        let (worker, idle_stream) = {
            let mut link = self.link.lock().unwrap();
            (link.worker.take(), link.stream.take())
        };

        if let Some(worker) = worker {
            match worker.await {
                Ok(stream) => drop(stream),
                Err(e) => tracing::error!("I/O task for {} ended abnormally: {}", self.peer, e),
            }
        }
        drop(idle_stream);

        tracing::info!("Connection to {} closed", self.peer);
    }
}

impl CommandSink for Connection {
    fn send_command(&self, text: &str) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(AvrError::ConnectionClosed);
        }
        tracing::debug!("Sending: {:?}", text);
        self.shared.outbound.push(text.as_bytes());
        Ok(())
    }
}

// The I/O task only holds `Shared`, so dropping the last handle ends it within
// one poll interval and the task drops the socket on exit.
impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.outbound.wake();
    }
}

/// Readiness loop run by the I/O task
async fn run_loop(stream: TcpStream, shared: Arc<Shared>) -> TcpStream {
    let mut splitter = LineSplitter::new();
    let mut chunk = [0u8; READ_CHUNK];

    let result = loop {
        if !shared.running.load(Ordering::Acquire) {
            break Ok(());
        }

        // Only ask for write readiness when there is something to write
        let interest = if shared.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE.add(Interest::WRITABLE)
        };

        let ready = tokio::select! {
            ready = stream.ready(interest) => ready,
            _ = shared.outbound.notified() => continue,
            _ = sleep(POLL_TIMEOUT) => continue,
        };
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => break Err(AvrError::socket(&e)),
        };

        if ready.is_readable() {
            if let Err(e) = read_once(&stream, &mut chunk, &mut splitter, &shared) {
                break Err(e);
            }
        }
        if ready.is_writable() {
            if let Err(e) = write_once(&stream, &shared.outbound) {
                break Err(e);
            }
        }
    };

    shared.running.store(false, Ordering::Release);
    match result {
        Ok(()) => tracing::debug!("I/O task stopped"),
        Err(e) => {
            shared.closed.store(true, Ordering::Release);
            tracing::error!("I/O task stopped: {}", e);
            if let Some(handler) = shared.handler() {
                handler.connection_lost(&e);
            }
        }
    }

    stream
}

/// Fail with the socket's pending error, if it has one
fn check_socket(stream: &TcpStream) -> Result<()> {
    match stream.take_error()? {
        Some(err) => Err(AvrError::socket(&err)),
        None => Ok(()),
    }
}

fn read_once(
    stream: &TcpStream,
    chunk: &mut [u8],
    splitter: &mut LineSplitter,
    shared: &Shared,
) -> Result<()> {
    check_socket(stream)?;
    let n = match stream.try_read(chunk) {
        Ok(0) => return Err(AvrError::ConnectionClosed),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(AvrError::socket(&e)),
    };

    let lines = splitter.push(&chunk[..n]);
    if lines.is_empty() {
        return Ok(());
    }
    let Some(handler) = shared.handler() else {
        tracing::warn!("No line handler registered, dropping {} line(s)", lines.len());
        return Ok(());
    };
    for line in lines {
        tracing::debug!("Received: {}", line);
        handler.handle_line(&line);
    }
    Ok(())
}

fn write_once(stream: &TcpStream, outbound: &Outbound) -> Result<()> {
    check_socket(stream)?;
    match outbound.write_with(|bytes| stream.try_write(bytes)) {
        Ok(sent) => {
            tracing::trace!("Wrote {} bytes, {} queued", sent, outbound.len());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(AvrError::socket(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Line(String),
        Lost(String),
        SocketLost(i32),
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    impl LineHandler for Recorder {
        fn handle_line(&self, line: &str) {
            let _ = self.0.send(Seen::Line(line.to_string()));
        }

        fn connection_lost(&self, error: &AvrError) {
            let seen = match error {
                AvrError::Socket { code, .. } => Seen::SocketLost(*code),
                other => Seen::Lost(other.to_string()),
            };
            let _ = self.0.send(seen);
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("handler channel closed")
    }

    #[tokio::test]
    async fn connect_falls_through_to_next_port() {
        let dead = closed_port().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().port();

        let connection = Connection::connect("127.0.0.1", &[dead, live]).await.unwrap();
        assert_eq!(connection.peer_addr().port(), live);
    }

    #[tokio::test]
    async fn connect_fails_when_no_port_answers() {
        let dead = closed_port().await;
        let err = Connection::connect("127.0.0.1", &[dead]).await.err().unwrap();
        assert!(matches!(err, AvrError::Connection { ref ports, .. } if ports == &[dead]));
    }

    #[tokio::test]
    async fn queued_commands_are_flushed_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        connection.send_command("\r\n?P\r\n").unwrap();
        assert_eq!(connection.pending_bytes(), 6);
        connection.start().unwrap();
        connection.send_command("\r\n?V\r\n").unwrap();

        let expected = b"\r\n?P\r\n\r\n?V\r\n";
        let mut received = vec![0u8; expected.len()];
        timeout(Duration::from_secs(5), peer.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received, expected);

        connection.close().await;
    }

    #[tokio::test]
    async fn lines_are_delivered_in_arrival_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder(tx));
        connection.set_line_handler(&recorder);
        connection.start().unwrap();

        peer.write_all(b"PWR0\r\nVOL1").await.unwrap();
        peer.flush().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        peer.write_all(b"21\r\n\r\nFN04\r\n").await.unwrap();

        assert_eq!(next(&mut rx).await, Seen::Line("PWR0".into()));
        assert_eq!(next(&mut rx).await, Seen::Line("VOL121".into()));
        assert_eq!(next(&mut rx).await, Seen::Line("FN04".into()));

        connection.close().await;
    }

    #[tokio::test]
    async fn peer_hangup_is_reported_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder(tx));
        connection.set_line_handler(&recorder);
        connection.start().unwrap();
        drop(peer);

        assert_eq!(
            next(&mut rx).await,
            Seen::Lost(AvrError::ConnectionClosed.to_string())
        );
        assert!(!connection.is_running());
        assert!(matches!(
            connection.send_command("\r\n?P\r\n"),
            Err(AvrError::ConnectionClosed)
        ));

        connection.close().await;
    }

    #[tokio::test]
    async fn peer_reset_is_reported_as_socket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder(tx));
        connection.set_line_handler(&recorder);
        connection.start().unwrap();

        // Zero linger turns the close into an RST
        #[allow(deprecated)]
        peer.set_linger(Some(Duration::ZERO)).unwrap();
        drop(peer);

        match next(&mut rx).await {
            Seen::SocketLost(code) => assert!(code >= 0, "unexpected code {}", code),
            other => panic!("expected a socket error, got {:?}", other),
        }
        assert!(!connection.is_running());
        assert!(matches!(
            connection.send_command("\r\n?P\r\n"),
            Err(AvrError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn dropping_the_connection_closes_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        connection.start().unwrap();
        drop(connection);

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(3), peer.read(&mut buf))
            .await
            .expect("socket still open after the connection was dropped")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn close_stops_the_loop_and_rejects_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::connect("127.0.0.1", &[port]).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        connection.start().unwrap();
        assert!(connection.is_running());

        timeout(Duration::from_secs(2), connection.close())
            .await
            .expect("close should return within one poll interval");
        assert!(!connection.is_running());
        assert!(connection.send_command("\r\n?P\r\n").is_err());

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "socket should be closed after close()");
    }
}
