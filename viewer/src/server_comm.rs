use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spark_replays::analyzer::decoder::DecodedCycle;
use spark_replays::analyzer::world::WorldModel;
use spark_replays::draw::Drawings;
use tracing::{Level, debug, error, info, span, trace, warn};

use crate::backoff::Backoff;
use crate::commands::ServerCommand;
use crate::error::SessionError;
use crate::recorder::{LogRecorder, RecorderSlot};

/// Default monitor port of the simulator.
pub const MONITOR_PORT: u16 = 3200;

/// Longest monitor message accepted. Full scene graphs are a few hundred KiB.
pub const MAX_MESSAGE_LEN: usize = 8 * 1024 * 1024;

/// Reads one length-prefixed message. A clean end of stream or a
/// non-positive length returns `None`; a length above [`MAX_MESSAGE_LEN`]
/// is an `InvalidData` error.
pub fn read_frame(r: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match r.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = i32::from_be_bytes(len);
    if len <= 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {len} bytes exceeds {MAX_MESSAGE_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { addr: String },
    ConnectFailed { addr: String, reason: String },
    Disconnected { addr: String },
}

/// Observer of a [`NetworkSession`].
pub trait ServerChangeListener: Send {
    fn connection_changed(&mut self, _event: &ConnectionEvent) {}

    /// Runs on the receive thread right after a server message was applied,
    /// while the world is still locked.
    fn cycle_applied(&mut self, _world: &WorldModel) {}
}

type Listeners = Arc<Mutex<Vec<Box<dyn ServerChangeListener>>>>;

fn notify(listeners: &Listeners, event: ConnectionEvent) {
    for listener in listeners.lock().iter_mut() {
        listener.connection_changed(&event);
    }
}

#[derive(Debug, Clone)]
pub struct NetworkOptions {
    pub host: String,
    pub port: u16,
    /// Keep trying to connect while disconnected.
    pub auto_connect: bool,
    pub auto_connect_delay: Duration,
    /// Attempts before auto-connect gives up; unlimited if `None`.
    pub max_attempts: Option<u32>,
    /// Record every connection to a new log in this directory.
    pub record_dir: Option<PathBuf>,
    /// Longest a single connection attempt may block the caller.
    pub connect_timeout: Duration,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: MONITOR_PORT,
            auto_connect: true,
            auto_connect_delay: Duration::from_millis(1000),
            max_attempts: None,
            record_dir: None,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

struct Connection {
    addr: String,
    stream: TcpStream,
    alive: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// A live connection to the simulator's monitor port.
///
/// Every server message is decoded and applied to the world on a receive
/// thread. Tearing a connection down (explicitly, by switching servers or
/// because the server went away) shuts the socket to unblock that thread,
/// joins it, then clears the drawings and resets the world, so nothing from
/// the old match survives into the next connection.
///
/// Reconnecting is driven by [`NetworkSession::poll`] from the update loop.
pub struct NetworkSession {
    world: Arc<Mutex<WorldModel>>,
    drawings: Arc<Drawings>,
    listeners: Listeners,
    recording: RecorderSlot,
    options: NetworkOptions,
    connection: Option<Connection>,
    backoff: Backoff,
    next_attempt: Option<Instant>,
}

impl NetworkSession {
    pub fn new(
        world: Arc<Mutex<WorldModel>>,
        drawings: Arc<Drawings>,
        options: NetworkOptions,
    ) -> Self {
        Self {
            world,
            drawings,
            listeners: Arc::default(),
            recording: Arc::default(),
            backoff: Backoff::new(options.auto_connect_delay, options.max_attempts),
            options,
            connection: None,
            next_attempt: None,
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn ServerChangeListener>) {
        self.listeners.lock().push(listener);
    }

    /// Slot the drawing listener writes datagrams into while recording.
    pub fn recording(&self) -> RecorderSlot {
        self.recording.clone()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.options.host, self.options.port)
    }

    /// True while the receive thread is reading from a socket.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::Acquire))
    }

    /// When auto-connect will try next, if it is waiting.
    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Lets [`Self::poll`] connect right away when auto-connect is on.
    pub fn start_auto_connect(&mut self) {
        if self.options.auto_connect && self.connection.is_none() {
            self.next_attempt = Some(Instant::now());
        }
    }

    /// Connects to the configured server, replacing any current connection.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.teardown();
        let addr = self.address();
        let stream = match open_stream(
            &self.options.host,
            self.options.port,
            self.options.connect_timeout,
        ) {
            Ok(stream) => stream,
            Err(source) => {
                debug!("could not connect to {addr}: {source}");
                notify(
                    &self.listeners,
                    ConnectionEvent::ConnectFailed {
                        addr: addr.clone(),
                        reason: source.to_string(),
                    },
                );
                self.schedule_reconnect(Instant::now());
                return Err(SessionError::Connect { addr, source });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            trace!("set_nodelay failed: {e}");
        }
        let reader_stream = stream.try_clone()?;

        if let Some(dir) = &self.options.record_dir {
            match LogRecorder::create(dir) {
                Ok(recorder) => *self.recording.lock() = Some(recorder),
                Err(e) => warn!("not recording this connection: {e}"),
            }
        }

        info!("connected to {addr}");
        self.backoff.reset();
        self.next_attempt = None;
        notify(&self.listeners, ConnectionEvent::Connected { addr: addr.clone() });

        let alive = Arc::new(AtomicBool::new(true));
        let reader = {
            let world = self.world.clone();
            let listeners = self.listeners.clone();
            let recording = self.recording.clone();
            let alive = alive.clone();
            thread::spawn(move || {
                receive_loop(reader_stream, &world, &listeners, &recording);
                alive.store(false, Ordering::Release);
            })
        };

        self.connection = Some(Connection {
            addr,
            stream,
            alive,
            reader: Some(reader),
        });
        Ok(())
    }

    /// Drops the connection and stops auto-connecting.
    pub fn disconnect(&mut self) {
        self.next_attempt = None;
        self.teardown();
    }

    /// Connects to a different server. Everything belonging to the old
    /// match is cleared first.
    pub fn change_connection(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        self.disconnect();
        self.options.host = host.to_string();
        self.options.port = port;
        self.backoff.reset();
        self.connect()
    }

    /// Sends a command if connected. A failed write ends the connection,
    /// which [`Self::poll`] then reports as lost.
    pub fn send(&mut self, command: &ServerCommand) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            debug!("cannot send {command}: not connected");
            return false;
        };
        match connection.stream.write_all(&command.encode()) {
            Ok(()) => {
                debug!("sent {command}");
                true
            }
            Err(e) => {
                warn!("connection to {} lost while sending {command}: {e}", connection.addr);
                let _ = connection.stream.shutdown(Shutdown::Both);
                false
            }
        }
    }

    /// Notices lost connections and runs due reconnect attempts.
    pub fn poll(&mut self, now: Instant) {
        if self
            .connection
            .as_ref()
            .is_some_and(|c| !c.alive.load(Ordering::Acquire))
        {
            info!("connection to {} lost", self.address());
            self.teardown();
            self.schedule_reconnect(now);
        }

        if self.connection.is_none() && self.next_attempt.is_some_and(|at| now >= at) {
            self.next_attempt = None;
            if let Err(e) = self.connect() {
                debug!("auto-connect: {e}");
            }
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if !self.options.auto_connect {
            return;
        }
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!("next connection attempt in {delay:?}");
                self.next_attempt = Some(now + delay);
            }
            None => warn!(
                "giving up on {} after {} attempts",
                self.address(),
                self.backoff.attempts()
            ),
        }
    }

    fn teardown(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        let span = span!(Level::DEBUG, "teardown", addr = connection.addr.as_str());
        let _enter = span.enter();

        if let Err(e) = connection.stream.shutdown(Shutdown::Both) {
            trace!("socket already closed: {e}");
        }
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                error!("receive thread panicked");
            }
        }
        if let Some(mut recorder) = self.recording.lock().take() {
            match recorder.flush() {
                Ok(()) => info!(
                    "recorded {} cycles to {}",
                    recorder.frames(),
                    recorder.path().display()
                ),
                Err(e) => warn!("{e}"),
            }
        }

        self.drawings.clear_all();
        self.world.lock().reset();
        notify(
            &self.listeners,
            ConnectionEvent::Disconnected {
                addr: connection.addr,
            },
        );
    }
}

impl Drop for NetworkSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Tries every resolved address of `host` in turn, each bounded by `timeout`.
fn open_stream(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let timeout = timeout.max(Duration::from_millis(1));
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!("{addr}: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{host} resolved to no address"),
        )
    }))
}

fn receive_loop(
    stream: TcpStream,
    world: &Mutex<WorldModel>,
    listeners: &Listeners,
    recording: &RecorderSlot,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let payload = match read_frame(&mut reader) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("server closed the monitor stream");
                break;
            }
            Err(e) => {
                debug!("monitor stream ended: {e}");
                break;
            }
        };
        let message = String::from_utf8_lossy(&payload);
        let cycle = match DecodedCycle::decode(&message) {
            Ok(cycle) => cycle,
            Err(e) => {
                warn!("skipping malformed server message: {e}");
                continue;
            }
        };

        {
            let mut world = world.lock();
            world.apply(&cycle);
            for listener in listeners.lock().iter_mut() {
                listener.cycle_applied(&world);
            }
        }

        if let Some(recorder) = recording.lock().as_mut() {
            if let Err(e) = recorder.record_message(&message) {
                warn!("{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::sync::mpsc;

    use spark_replays::draw::{Color, DrawnShape, Expiration, Shape};
    use spark_replays::types::Side;

    fn wait_until(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn cycle_with_agent(team: &str) -> String {
        format!(
            "((team_left {team}) (time 1))(RSG 0 1)(\
             (nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0.5 1) \
               (nd StaticMesh (load models/naobody.obj) (setVisible 1) (resetMaterials matNum1 matLeft))))"
        )
    }

    #[derive(Clone, Default)]
    struct Events(Arc<Mutex<Vec<ConnectionEvent>>>);

    impl ServerChangeListener for Events {
        fn connection_changed(&mut self, event: &ConnectionEvent) {
            self.0.lock().push(event.clone());
        }
    }

    /// Serves one client: sends `messages` once `go` fires, then forwards
    /// every frame the client sends.
    fn serve(
        messages: Vec<String>,
        go: mpsc::Receiver<()>,
    ) -> (u16, mpsc::Receiver<String>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            go.recv().unwrap();
            for message in messages {
                write_frame(&mut stream, message.as_bytes()).unwrap();
            }
            while let Ok(Some(frame)) = read_frame(&mut stream) {
                if tx.send(String::from_utf8(frame).unwrap()).is_err() {
                    break;
                }
            }
        });
        (port, rx, handle)
    }

    fn options(port: u16) -> NetworkOptions {
        NetworkOptions {
            host: "127.0.0.1".to_string(),
            port,
            auto_connect: false,
            ..Default::default()
        }
    }

    #[test]
    fn frames_end_on_non_positive_length() {
        let mut data = Vec::new();
        write_frame(&mut data, b"(a)").unwrap();
        data.extend(0i32.to_be_bytes());
        data.extend(b"ignored");
        let mut cursor = Cursor::new(data);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(b"(a)".to_vec()));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
        assert_eq!(read_frame(&mut Cursor::new(Vec::new())).unwrap(), None);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut data = i32::MAX.to_be_bytes().to_vec();
        data.extend(b"(a)");
        let err = read_frame(&mut Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unreachable_server_fails_within_the_timeout() {
        // 192.0.2.0/24 is reserved for documentation and never routed.
        let mut session = NetworkSession::new(
            Arc::new(Mutex::new(WorldModel::new())),
            Arc::new(Drawings::new()),
            NetworkOptions {
                host: "192.0.2.1".to_string(),
                port: MONITOR_PORT,
                auto_connect: false,
                connect_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let started = Instant::now();
        assert!(matches!(session.connect(), Err(SessionError::Connect { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!session.is_connected());
    }

    #[test]
    fn changing_server_clears_previous_match() {
        let world = Arc::new(Mutex::new(WorldModel::new()));
        let drawings = Arc::new(Drawings::new());
        let events = Events::default();

        let (go_a, go_a_rx) = mpsc::channel();
        let (port_a, commands_a, server_a) = serve(vec![cycle_with_agent("A")], go_a_rx);
        let mut session = NetworkSession::new(world.clone(), drawings.clone(), options(port_a));
        session.add_listener(Box::new(events.clone()));
        session.connect().unwrap();
        go_a.send(()).unwrap();

        wait_until(|| world.lock().team(Side::Left).len() == 1);
        drawings.put(
            "agent.1",
            DrawnShape {
                shape: Shape::Point {
                    position: glam::Vec3::ZERO,
                    size: 1.0,
                    color: Color::rgb(0, 0, 0),
                },
                expiration: Expiration::Cycle,
            },
        );
        assert!(session.send(&ServerCommand::KickOff(Side::Left)));
        assert_eq!(
            commands_a.recv_timeout(Duration::from_secs(5)).unwrap(),
            "(kickOff Left)"
        );

        // The second server holds its first cycle back so the cleared state
        // can be observed.
        let (go_b, go_b_rx) = mpsc::channel();
        let (port_b, _commands_b, server_b) = serve(vec![cycle_with_agent("B")], go_b_rx);
        session.change_connection("127.0.0.1", port_b).unwrap();
        assert!(world.lock().team(Side::Left).is_empty());
        assert!(world.lock().game_state().team_name(Side::Left).is_none());
        assert!(drawings.set_names().is_empty());
        server_a.join().unwrap();

        go_b.send(()).unwrap();
        wait_until(|| world.lock().game_state().team_name(Side::Left) == Some("B"));
        assert_eq!(world.lock().team(Side::Left).len(), 1);

        session.disconnect();
        server_b.join().unwrap();
        let addr_a = format!("127.0.0.1:{port_a}");
        let addr_b = format!("127.0.0.1:{port_b}");
        assert_eq!(
            *events.0.lock(),
            vec![
                ConnectionEvent::Connected { addr: addr_a.clone() },
                ConnectionEvent::Disconnected { addr: addr_a },
                ConnectionEvent::Connected { addr: addr_b.clone() },
                ConnectionEvent::Disconnected { addr: addr_b },
            ]
        );
    }

    #[test]
    fn lost_connection_schedules_reconnect() {
        let world = Arc::new(Mutex::new(WorldModel::new()));
        let (go, go_rx) = mpsc::channel();
        let (port, commands, server) = serve(vec![cycle_with_agent("A")], go_rx);
        let mut session = NetworkSession::new(
            world.clone(),
            Arc::new(Drawings::new()),
            NetworkOptions {
                auto_connect: true,
                ..options(port)
            },
        );
        session.connect().unwrap();
        go.send(()).unwrap();
        wait_until(|| world.lock().team(Side::Left).len() == 1);

        // Dropping the receiver makes the server hang up on the next command.
        drop(commands);
        session.send(&ServerCommand::DropBall);
        server.join().unwrap();
        wait_until(|| !session.is_connected());

        let now = Instant::now();
        session.poll(now);
        assert!(world.lock().team(Side::Left).is_empty());
        assert_eq!(session.next_attempt(), Some(now + Duration::from_millis(1000)));
    }

    #[test]
    fn failed_connect_is_reported() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let events = Events::default();
        let mut session = NetworkSession::new(
            Arc::new(Mutex::new(WorldModel::new())),
            Arc::new(Drawings::new()),
            options(port),
        );
        session.add_listener(Box::new(events.clone()));

        let err = session.connect().unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
        assert!(!session.is_connected());
        assert!(session.next_attempt().is_none());
        assert!(!session.send(&ServerCommand::Init));
        assert!(matches!(
            events.0.lock().as_slice(),
            [ConnectionEvent::ConnectFailed { .. }]
        ));
    }
}
