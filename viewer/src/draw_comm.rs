use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spark_replays::draw::Drawings;
use tracing::{debug, error, trace};

use crate::error::SessionError;
use crate::recorder::RecorderSlot;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65507;
/// How often the receive thread checks whether it should stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receives drawing datagrams from agents and executes them against the
/// shared [`Drawings`].
pub struct DrawListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DrawListener {
    /// Listens on every interface at `port`.
    pub fn bind(
        port: u16,
        drawings: Arc<Drawings>,
        recorder: RecorderSlot,
    ) -> Result<Self, SessionError> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)), drawings, recorder)
    }

    pub fn bind_addr(
        addr: SocketAddr,
        drawings: Arc<Drawings>,
        recorder: RecorderSlot,
    ) -> Result<Self, SessionError> {
        let bind_error = |source| SessionError::Bind {
            port: addr.port(),
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(bind_error)?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;
        debug!("listening for drawings on {local_addr}");

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while thread_running.load(Ordering::Relaxed) {
                let len = match socket.recv_from(&mut buf) {
                    Ok((len, _)) => len,
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("error receiving drawings: {e}");
                        break;
                    }
                };
                let datagram = &buf[..len];
                if let Some(recorder) = recorder.lock().as_mut() {
                    recorder.record_draw(datagram);
                }
                let executed = drawings.execute_datagram(datagram);
                trace!("executed {executed} drawing commands");
            }
        });

        Ok(Self {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receive thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("drawing listener thread panicked");
            }
        }
    }
}

impl Drop for DrawListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use parking_lot::Mutex;

    use crate::recorder::LogRecorder;

    fn f6(v: f32) -> Vec<u8> {
        let mut s = format!("{v:.4}");
        s.truncate(6);
        s.into_bytes()
    }

    /// A line in set `set` followed by a swap of every set.
    fn line_then_swap(set: &str) -> Vec<u8> {
        let mut data = vec![1, 1];
        for v in [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0] {
            data.extend(f6(v));
        }
        data.extend([255, 255, 0]);
        data.extend(set.as_bytes());
        data.extend([0, 0, 0, 0]);
        data
    }

    #[test]
    fn datagrams_reach_drawings_and_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let drawings = Arc::new(Drawings::new());
        let recorder = Arc::new(Mutex::new(Some(
            LogRecorder::create_at(dir.path().join("rec.log")).unwrap(),
        )));
        let mut listener = DrawListener::bind_addr(
            "127.0.0.1:0".parse().unwrap(),
            drawings.clone(),
            recorder.clone(),
        )
        .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&line_then_swap("agent.1"), listener.local_addr())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while drawings.front("agent.1").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        listener.shutdown();

        assert_eq!(drawings.front("agent.1").map(|f| f.len()), Some(1));
        let mut recorder = recorder.lock().take().unwrap();
        recorder.record_message("((time 0))").unwrap();
        recorder.flush().unwrap();
        let line = std::fs::read_to_string(recorder.path()).unwrap();
        assert!(line.starts_with("[1,1,48,46,"), "{line}");
        assert!(line.ends_with("]((time 0))\n"), "{line}");
    }
}
