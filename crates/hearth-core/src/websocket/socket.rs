//! Server-side websocket with blocking and threaded operating modes.
//!
//! In blocking mode the caller drives [`WebSocket::read_message`] and sends
//! write straight to the socket. [`WebSocket::spawn`] switches to threaded
//! mode: a reader thread dispatches messages to listeners and a writer thread
//! drains a bounded queue, pinging the peer whenever it has been idle for
//! the ping interval.

use super::WebSocketError;
use super::frame::{Frame, OpCode, read_frame};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Close status for a normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// Close status for a message that is too big to process.
const CLOSE_TOO_BIG: u16 = 1009;

/// Websocket tuning.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest accepted frame payload, and largest reassembled message.
    pub max_payload_length: usize,
    /// Idle time after which the writer thread sends a ping.
    pub ping_interval: Duration,
    /// Outbound queue capacity in threaded mode.
    pub queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_payload_length: 16384,
            ping_interval: Duration::from_secs(10),
            queue_capacity: 64,
        }
    }
}

/// A complete message: the opcode of the initiating frame plus the payload of
/// every frame up to and including the final one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: OpCode,
    payload: Vec<u8>,
}

impl Message {
    /// A text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: text.into().into_bytes(),
        }
    }

    /// A binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: data.into(),
        }
    }

    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.opcode == OpCode::Text
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The payload as UTF-8.
    pub fn as_text(&self) -> Result<&str, WebSocketError> {
        Ok(std::str::from_utf8(&self.payload)?)
    }
}

/// Receives events from a socket running in threaded mode.
///
/// Callbacks run on the socket's reader thread.
pub trait WebSocketListener: Send + Sync + 'static {
    /// A complete message arrived.
    fn received_message(&self, sender: &WebSocketSender, message: Message);

    /// The socket closed. Called once, after the last message.
    fn socket_closed(&self, _sender: &WebSocketSender) {}
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

enum SendMode {
    Direct(Box<dyn Write + Send>),
    Queued(SyncSender<Frame>),
    Closed,
}

struct Shared {
    id: u64,
    mode: Mutex<SendMode>,
    close_sent: AtomicBool,
    closed: AtomicBool,
    shutdown: Mutex<Option<ShutdownHook>>,
}

impl Shared {
    fn run_shutdown(&self) {
        if let Some(hook) = self.shutdown.lock().take() {
            hook();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(hook) = self.shutdown.get_mut().take() {
            hook();
        }
    }
}

/// Cloneable sending half of a websocket.
///
/// Sends are serialized; in threaded mode they block only while the outbound
/// queue is full.
#[derive(Clone)]
pub struct WebSocketSender {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WebSocketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSender")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WebSocketSender {
    /// The socket id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Returns true once a close frame was sent or the socket was torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Send a complete message as a single frame.
    pub fn send(&self, message: Message) -> Result<(), WebSocketError> {
        self.send_frame(Frame::new(message.opcode, message.payload))
    }

    /// Send a text message.
    pub fn send_text(&self, text: &str) -> Result<(), WebSocketError> {
        self.send(Message::text(text))
    }

    /// Send a binary message.
    pub fn send_binary(&self, data: &[u8]) -> Result<(), WebSocketError> {
        self.send(Message::binary(data))
    }

    /// Send a raw frame. Fails with [`WebSocketError::Closed`] after close.
    pub fn send_frame(&self, frame: Frame) -> Result<(), WebSocketError> {
        if frame.opcode == OpCode::Close {
            return self.send_close(frame);
        }
        let mut mode = self.shared.mode.lock();
        if self.is_closed() {
            return Err(WebSocketError::Closed);
        }
        dispatch(&mut mode, frame)
    }

    /// Close with status 1000. Idempotent.
    pub fn close(&self) -> Result<(), WebSocketError> {
        self.close_with(CLOSE_NORMAL, "")
    }

    /// Send a close frame carrying `code` and `reason`, then stop sending.
    ///
    /// Only the first call sends anything; later calls return `Ok`.
    pub fn close_with(&self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        payload.truncate(125);
        self.send_close(Frame::new(OpCode::Close, payload))
    }

    fn send_close(&self, frame: Frame) -> Result<(), WebSocketError> {
        if self.shared.close_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut mode = self.shared.mode.lock();
        let result = if self.is_closed() {
            Ok(())
        } else {
            dispatch(&mut mode, frame)
        };
        self.shared.closed.store(true, Ordering::Release);
        // Dropping the queue sender wakes a waiting writer thread.
        *mode = SendMode::Closed;
        trace!("websocket {} close sent", self.shared.id);
        result
    }

    /// Mark closed without sending anything, e.g. after the peer vanished.
    fn abandon(&self) {
        let mut mode = self.shared.mode.lock();
        self.shared.close_sent.store(true, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        *mode = SendMode::Closed;
    }
}

fn dispatch(mode: &mut SendMode, frame: Frame) -> Result<(), WebSocketError> {
    match mode {
        SendMode::Direct(writer) => {
            frame.write_to(writer)?;
            writer.flush()?;
            Ok(())
        }
        SendMode::Queued(queue) => queue.send(frame).map_err(|_| WebSocketError::Closed),
        SendMode::Closed => Err(WebSocketError::Closed),
    }
}

/// A server-side websocket after a successful handshake.
pub struct WebSocket {
    reader: Box<dyn Read + Send>,
    sender: WebSocketSender,
    config: WebSocketConfig,
    listeners: Vec<Arc<dyn WebSocketListener>>,
    partial: Option<(OpCode, Vec<u8>)>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.sender.id())
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl WebSocket {
    /// Wrap the two halves of an upgraded connection.
    ///
    /// `reader` must yield any bytes that were buffered past the handshake.
    #[must_use]
    pub fn new(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        config: WebSocketConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            mode: Mutex::new(SendMode::Direct(writer)),
            close_sent: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        });
        Self {
            reader,
            sender: WebSocketSender { shared },
            config,
            listeners: Vec::new(),
            partial: None,
        }
    }

    /// Run `hook` once the socket is finished, e.g. to shut the TCP stream
    /// down so a blocked reader wakes up.
    #[must_use]
    pub fn with_shutdown(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.sender.shared.shutdown.lock() = Some(Box::new(hook));
        self
    }

    /// The socket id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.sender.id()
    }

    /// A handle for sending from anywhere.
    #[must_use]
    pub fn sender(&self) -> WebSocketSender {
        self.sender.clone()
    }

    /// Register a listener for threaded mode.
    pub fn add_listener(&mut self, listener: Arc<dyn WebSocketListener>) {
        self.listeners.push(listener);
    }

    /// Block until the next complete message arrives.
    ///
    /// Pings are answered and pongs dropped along the way. Returns `Ok(None)`
    /// once the peer closed the connection; a close frame from the peer is
    /// answered with a close frame first.
    pub fn read_message(&mut self) -> Result<Option<Message>, WebSocketError> {
        let max = self.config.max_payload_length;
        loop {
            let frame = match read_frame(&mut self.reader, max) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.sender.abandon();
                    return Ok(None);
                }
                Err(err @ WebSocketError::PayloadTooLarge { .. }) => {
                    let _ = self.sender.close_with(CLOSE_TOO_BIG, "");
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            match frame.opcode {
                OpCode::Ping => match self.sender.send_frame(Frame::new(OpCode::Pong, frame.payload)) {
                    Ok(()) | Err(WebSocketError::Closed) => {}
                    Err(e) => return Err(e),
                },
                OpCode::Pong => {}
                OpCode::Close => {
                    if let Err(e) = self.sender.close() {
                        debug!("websocket {} close reply failed: {e}", self.id());
                    }
                    return Ok(None);
                }
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        return Err(WebSocketError::Protocol("expected continuation frame"));
                    }
                    if frame.fin {
                        return Ok(Some(Message {
                            opcode: frame.opcode,
                            payload: frame.payload,
                        }));
                    }
                    self.partial = Some((frame.opcode, frame.payload));
                }
                OpCode::Continuation => {
                    let Some((_, buffer)) = self.partial.as_mut() else {
                        return Err(WebSocketError::Protocol("unexpected continuation frame"));
                    };
                    let len = (buffer.len() + frame.payload.len()) as u64;
                    if len > max as u64 {
                        let _ = self.sender.close_with(CLOSE_TOO_BIG, "");
                        return Err(WebSocketError::PayloadTooLarge { len, max });
                    }
                    buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if let Some((opcode, payload)) = self.partial.take() {
                            return Ok(Some(Message { opcode, payload }));
                        }
                    }
                }
            }
        }
    }

    /// Switch to threaded mode.
    ///
    /// Starts `hearth-ws-<id>-in`, which reads messages and hands them to
    /// every registered listener, and `hearth-ws-<id>-out`, which drains the
    /// outbound queue. Both threads end once the socket closes.
    pub fn spawn(self) -> io::Result<WebSocketSender> {
        let id = self.id();
        let sender = self.sender.clone();
        let (queue, outbound) = mpsc::sync_channel(self.config.queue_capacity.max(1));

        let writer = {
            let mut mode = sender.shared.mode.lock();
            match std::mem::replace(&mut *mode, SendMode::Queued(queue)) {
                SendMode::Direct(writer) => writer,
                previous => {
                    *mode = previous;
                    return Err(io::Error::other("websocket is already closed or running"));
                }
            }
        };

        let shared = Arc::clone(&sender.shared);
        let ping_interval = self.config.ping_interval;
        thread::Builder::new()
            .name(format!("hearth-ws-{id}-out"))
            .spawn(move || write_loop(&shared, writer, &outbound, ping_interval))?;

        thread::Builder::new()
            .name(format!("hearth-ws-{id}-in"))
            .spawn(move || read_loop(self))?;

        debug!("websocket {id} running threaded");
        Ok(sender)
    }
}

fn read_loop(mut socket: WebSocket) {
    let id = socket.id();
    loop {
        match socket.read_message() {
            Ok(Some(message)) => {
                for listener in &socket.listeners {
                    listener.received_message(&socket.sender, message.clone());
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("websocket {id} read ended: {e}");
                break;
            }
        }
    }
    if let Err(e) = socket.sender.close() {
        trace!("websocket {id} close after read loop: {e}");
    }
    for listener in &socket.listeners {
        listener.socket_closed(&socket.sender);
    }
    trace!("websocket {id} reader exited");
}

fn write_loop(
    shared: &Shared,
    mut writer: Box<dyn Write + Send>,
    outbound: &Receiver<Frame>,
    ping_interval: Duration,
) {
    let mut next_ping = Instant::now() + ping_interval;
    loop {
        let wait = next_ping.saturating_duration_since(Instant::now());
        let frame = match outbound.recv_timeout(wait) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                Frame::new(OpCode::Ping, Vec::new())
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let is_close = frame.opcode == OpCode::Close;
        if let Err(e) = frame.write_to(&mut writer).and_then(|()| writer.flush()) {
            warn!("websocket {} write failed: {e}", shared.id);
            shared.closed.store(true, Ordering::Release);
            break;
        }
        if is_close {
            break;
        }
        next_ping = Instant::now() + ping_interval;
    }
    shared.run_shutdown();
    trace!("websocket {} writer exited", shared.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::{Shutdown, TcpListener, TcpStream};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn frames(&self) -> Vec<Frame> {
            let bytes = self.0.lock().clone();
            let mut cursor = Cursor::new(bytes);
            let mut frames = Vec::new();
            while let Some(frame) = read_frame(&mut cursor, usize::MAX).unwrap() {
                frames.push(frame);
            }
            frames
        }
    }

    fn client_bytes(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| f.clone().masked([1, 2, 3, 4]).encode())
            .collect()
    }

    fn blocking_socket(input: Vec<u8>, max: usize) -> (WebSocket, SharedBuf) {
        let out = SharedBuf::default();
        let config = WebSocketConfig {
            max_payload_length: max,
            ..WebSocketConfig::default()
        };
        let socket = WebSocket::new(Box::new(Cursor::new(input)), Box::new(out.clone()), config);
        (socket, out)
    }

    // =========================================================================
    // Blocking mode
    // =========================================================================

    #[test]
    fn continuation_frames_keep_initiating_opcode() {
        let input = client_bytes(&[
            Frame::new(OpCode::Text, b"Hel".to_vec()).with_fin(false),
            Frame::new(OpCode::Ping, b"p".to_vec()),
            Frame::new(OpCode::Continuation, b"lo".to_vec()),
        ]);
        let (mut socket, out) = blocking_socket(input, 1024);

        let message = socket.read_message().unwrap().unwrap();
        assert_eq!(message.opcode(), OpCode::Text);
        assert_eq!(message.as_text().unwrap(), "Hello");

        let replies = out.frames();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].opcode, OpCode::Pong);
        assert_eq!(replies[0].payload, b"p");
        assert_eq!(replies[0].mask, None);
    }

    #[test]
    fn close_is_answered_once_and_blocks_sends() {
        let input = client_bytes(&[Frame::new(OpCode::Close, CLOSE_NORMAL.to_be_bytes().to_vec())]);
        let (mut socket, out) = blocking_socket(input, 1024);
        let sender = socket.sender();

        assert!(socket.read_message().unwrap().is_none());
        assert!(sender.is_closed());
        assert!(sender.close().is_ok());
        assert!(matches!(sender.send_text("late"), Err(WebSocketError::Closed)));

        let replies = out.frames();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].opcode, OpCode::Close);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let input = client_bytes(&[
            Frame::new(OpCode::Binary, vec![0; 6]).with_fin(false),
            Frame::new(OpCode::Continuation, vec![0; 6]),
        ]);
        let (mut socket, out) = blocking_socket(input, 10);
        assert!(matches!(
            socket.read_message(),
            Err(WebSocketError::PayloadTooLarge { len: 12, max: 10 })
        ));
        let replies = out.frames();
        assert_eq!(replies[0].opcode, OpCode::Close);
        assert_eq!(&replies[0].payload[..2], &CLOSE_TOO_BIG.to_be_bytes());
    }

    #[test]
    fn stray_continuation_is_a_protocol_error() {
        let input = client_bytes(&[Frame::new(OpCode::Continuation, b"x".to_vec())]);
        let (mut socket, _) = blocking_socket(input, 1024);
        assert!(matches!(socket.read_message(), Err(WebSocketError::Protocol(_))));
    }

    #[test]
    fn eof_ends_session() {
        let (mut socket, _) = blocking_socket(Vec::new(), 1024);
        assert!(socket.read_message().unwrap().is_none());
        assert!(socket.sender().is_closed());
    }

    #[test]
    fn shutdown_hook_runs_once_on_drop() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let (socket, _) = blocking_socket(Vec::new(), 16);
        let socket = socket.with_shutdown(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let sender = socket.sender();
        drop(socket);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(sender);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // Threaded mode
    // =========================================================================

    struct Echo {
        closed: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl WebSocketListener for Echo {
        fn received_message(&self, sender: &WebSocketSender, message: Message) {
            let _ = sender.send(message);
        }

        fn socket_closed(&self, _sender: &WebSocketSender) {
            if let Some(tx) = self.closed.lock().take() {
                let _ = tx.send(());
            }
        }
    }

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn threaded_socket(server: TcpStream, ping_interval: Duration) -> WebSocket {
        let config = WebSocketConfig {
            ping_interval,
            ..WebSocketConfig::default()
        };
        let shutdown = server.try_clone().unwrap();
        WebSocket::new(
            Box::new(server.try_clone().unwrap()),
            Box::new(server),
            config,
        )
        .with_shutdown(move || {
            let _ = shutdown.shutdown(Shutdown::Both);
        })
    }

    #[test]
    fn threaded_echo_and_close() {
        let (mut client, server) = tcp_pair();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let (closed_tx, closed_rx) = mpsc::channel();

        let mut socket = threaded_socket(server, Duration::from_secs(60));
        socket.add_listener(Arc::new(Echo {
            closed: Mutex::new(Some(closed_tx)),
        }));
        let sender = socket.spawn().unwrap();

        client
            .write_all(&Frame::new(OpCode::Text, b"ping me".to_vec()).masked([9, 8, 7, 6]).encode())
            .unwrap();
        let echoed = read_frame(&mut client, 1024).unwrap().unwrap();
        assert_eq!(echoed.opcode, OpCode::Text);
        assert_eq!(echoed.payload, b"ping me");

        client
            .write_all(&Frame::new(OpCode::Close, Vec::new()).masked([1, 1, 1, 1]).encode())
            .unwrap();
        let reply = read_frame(&mut client, 1024).unwrap().unwrap();
        assert_eq!(reply.opcode, OpCode::Close);

        closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(sender.is_closed());
        assert!(matches!(sender.send_text("after"), Err(WebSocketError::Closed)));
    }

    #[test]
    fn idle_writer_sends_ping() {
        let (mut client, server) = tcp_pair();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let sender = threaded_socket(server, Duration::from_millis(50)).spawn().unwrap();

        let frame = read_frame(&mut client, 1024).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);

        sender.close().unwrap();
        loop {
            let frame = read_frame(&mut client, 1024).unwrap().unwrap();
            if frame.opcode == OpCode::Close {
                break;
            }
            assert_eq!(frame.opcode, OpCode::Ping);
        }
    }
}
