//! Drives an [`Engine`] on a single tokio task.
//!
//! Socket reads, the in-flight connect, the heartbeat interval, the reconnect
//! deadline, write failures and caller requests are multiplexed with
//! `select!`, so every engine input is serialized on one task and nothing
//! needs a lock. Outbound frames go through a per-connection writer task, so
//! a peer that stops reading never stalls the loop.

use crate::engine::{Action, Engine};
use crate::transport::TransportError;
use bytes::BytesMut;
use jupiter_proto::{BraceFrameCodec, Message};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Encoder;
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<TcpStream, TransportError>> + Send>>;

enum Request {
    Connect,
    Disconnect,
    Login { username: String, password: String },
    Register { username: String, password: String, email: String },
    Logout,
    Send(Message),
    Shutdown,
}

/// Cheap, cloneable front door to a running engine.
///
/// Every call is fire-and-forget; outcomes arrive as engine events.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl EngineHandle {
    pub fn connect(&self) {
        self.request(Request::Connect);
    }

    pub fn disconnect(&self) {
        self.request(Request::Disconnect);
    }

    pub fn login(&self, username: &str, password: &str) {
        self.request(Request::Login {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    pub fn register(&self, username: &str, password: &str, email: &str) {
        self.request(Request::Register {
            username: username.to_string(),
            password: password.to_string(),
            email: email.to_string(),
        });
    }

    pub fn logout(&self) {
        self.request(Request::Logout);
    }

    pub fn send(&self, message: Message) {
        self.request(Request::Send(message));
    }

    pub fn shutdown(&self) {
        self.request(Request::Shutdown);
    }

    fn request(&self, request: Request) {
        if self.tx.send(request).is_err() {
            debug!("Engine is no longer running; request dropped");
        }
    }
}

/// Spawns the engine's event loop. The task ends after `shutdown` or once
/// every handle is dropped.
pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    let driver = Driver {
        write_timeout: engine.settings().connection_timeout(),
        engine,
        requests: rx,
        reader: None,
        writer: None,
        connecting: None,
        heartbeat: None,
        reconnect_at: None,
        read_buf: vec![0u8; READ_BUFFER_SIZE],
        next_connection_id: 0,
        failures_tx,
        failures: failures_rx,
    };

    let task = tokio::spawn(driver.run());
    (EngineHandle { tx }, task)
}

enum Wake {
    Request(Option<Request>),
    Connected(Result<TcpStream, TransportError>),
    Read(std::io::Result<usize>),
    WriteFailed(u64, TransportError),
    HeartbeatTick,
    ReconnectDue,
}

/// Outbound half of the current connection
struct Writer {
    id: u64,
    queue: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

struct Driver {
    engine: Engine,
    requests: mpsc::UnboundedReceiver<Request>,
    reader: Option<OwnedReadHalf>,
    writer: Option<Writer>,
    connecting: Option<ConnectFuture>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    read_buf: Vec<u8>,
    write_timeout: Duration,
    next_connection_id: u64,
    failures_tx: mpsc::UnboundedSender<(u64, TransportError)>,
    failures: mpsc::UnboundedReceiver<(u64, TransportError)>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.apply_actions();
            if self.engine.is_shut_down() {
                break;
            }

            let wake = tokio::select! {
                request = self.requests.recv() => Wake::Request(request),
                result = wait_connect(&mut self.connecting) => Wake::Connected(result),
                read = read_some(&mut self.reader, &mut self.read_buf) => Wake::Read(read),
                Some((id, err)) = self.failures.recv() => Wake::WriteFailed(id, err),
                _ = wait_tick(&mut self.heartbeat) => Wake::HeartbeatTick,
                _ = wait_until(self.reconnect_at) => Wake::ReconnectDue,
            };

            let now = Instant::now();
            match wake {
                Wake::Request(None) => {
                    debug!("All engine handles dropped");
                    self.engine.shutdown();
                }
                Wake::Request(Some(request)) => self.handle_request(request),
                Wake::Connected(result) => {
                    self.connecting = None;
                    match result {
                        Ok(stream) => {
                            self.attach(stream);
                            self.engine.on_connected(now);
                        }
                        Err(e) => self.engine.on_transport_error(e),
                    }
                }
                Wake::Read(Ok(0)) => {
                    self.drop_connection();
                    self.engine.on_transport_error(TransportError::RemoteClosed);
                }
                Wake::Read(Ok(n)) => self.engine.on_bytes(&self.read_buf[..n], now),
                Wake::Read(Err(e)) => {
                    self.drop_connection();
                    self.engine.on_transport_error(e.into());
                }
                Wake::WriteFailed(id, err) => {
                    if self.writer.as_ref().map(|w| w.id) == Some(id) {
                        self.drop_connection();
                        self.engine.on_transport_error(err);
                    } else {
                        debug!("Ignoring write failure from closed connection {}", id);
                    }
                }
                Wake::HeartbeatTick => self.engine.on_tick(now),
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    self.engine.on_reconnect_timer();
                }
            }
        }

        info!("Session engine stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect => self.engine.connect(),
            Request::Disconnect => self.engine.disconnect(),
            Request::Login { username, password } => self.engine.login(&username, &password),
            Request::Register {
                username,
                password,
                email,
            } => self.engine.register(&username, &password, &email),
            Request::Logout => self.engine.logout(),
            Request::Send(message) => {
                self.engine.send(message);
            }
            Request::Shutdown => self.engine.shutdown(),
        }
    }

    fn apply_actions(&mut self) {
        loop {
            let actions = self.engine.take_actions();
            if actions.is_empty() {
                return;
            }

            for action in actions {
                match action {
                    Action::Connect { addr, timeout } => {
                        self.drop_connection();
                        self.connecting = Some(Box::pin(open(addr, timeout)));
                    }
                    Action::Send(message) => self.write(message),
                    Action::Close => {
                        self.connecting = None;
                        self.reader = None;
                        // Dropping the queue lets the writer flush what is queued, then shut down
                        self.writer = None;
                    }
                    Action::StartHeartbeat(period) => self.start_heartbeat(period),
                    Action::StopHeartbeat => self.heartbeat = None,
                    Action::ArmReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
                    Action::CancelReconnect => self.reconnect_at = None,
                }
            }
        }
    }

    fn attach(&mut self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let (queue, outbound) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(
            id,
            write_half,
            outbound,
            self.write_timeout,
            self.failures_tx.clone(),
        ));

        self.reader = Some(read_half);
        self.writer = Some(Writer { id, queue, task });
    }

    /// Abandons the current socket without flushing
    fn drop_connection(&mut self) {
        self.reader = None;
        if let Some(writer) = self.writer.take() {
            writer.task.abort();
        }
    }

    fn write(&mut self, message: Message) {
        let Some(writer) = self.writer.as_ref() else {
            debug!("Dropping {}: no open socket", message.msg_type);
            return;
        };

        if let Err(mpsc::error::SendError(message)) = writer.queue.send(message) {
            debug!("Dropping {}: writer already stopped", message.msg_type);
        }
    }

    fn start_heartbeat(&mut self, period: Duration) {
        if period.is_zero() {
            error!("Heartbeat interval is zero; heartbeat disabled for this connection");
            self.heartbeat = None;
            return;
        }

        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }
}

/// Encodes and writes queued frames, each bounded by `write_timeout`.
/// Reports the first failure and stops; shuts the socket down once the queue closes.
async fn write_loop(
    id: u64,
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    write_timeout: Duration,
    failures: mpsc::UnboundedSender<(u64, TransportError)>,
) {
    let mut codec = BraceFrameCodec::default();
    let mut buf = BytesMut::new();

    while let Some(message) = outbound.recv().await {
        let msg_type = message.msg_type.clone();
        buf.clear();
        if let Err(e) = codec.encode(message, &mut buf) {
            error!("Failed to encode {}: {}", msg_type, e);
            continue;
        }

        let result = match timeout(write_timeout, socket.write_all(&buf)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::from(e)),
            Err(_) => Err(TransportError::TimedOut),
        };

        if let Err(e) = result {
            error!("Failed to send {}: {}", msg_type, e);
            let _ = failures.send((id, e));
            return;
        }
    }

    match timeout(write_timeout, socket.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Socket shutdown failed: {}", e),
        Err(_) => debug!("Socket shutdown timed out"),
    }
}

async fn open(addr: String, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    let connect = async {
        let targets: Vec<SocketAddr> = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(|e| {
                warn!("Could not resolve {}: {}", addr, e);
                TransportError::HostNotFound
            })?
            .collect();

        if targets.is_empty() {
            return Err(TransportError::HostNotFound);
        }

        TcpStream::connect(&targets[..])
            .await
            .map_err(TransportError::from)
    };

    match timeout(connect_timeout, connect).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY: {}", e);
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::TimedOut),
    }
}

async fn wait_connect(connecting: &mut Option<ConnectFuture>) -> Result<TcpStream, TransportError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn read_some(reader: &mut Option<OwnedReadHalf>, buf: &mut [u8]) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
