use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use spark_replays::logfile::LogRecord;
use tracing::info;

use crate::error::SessionError;

/// Recorder of the current connection, if recording. Shared between the
/// monitor receive thread and the drawing listener.
pub type RecorderSlot = Arc<Mutex<Option<LogRecorder>>>;

/// Writes a live session to a log that playback can open later.
///
/// Drawing datagrams received between two monitor messages are stored in
/// front of the next message, the way playback expects them.
#[derive(Debug)]
pub struct LogRecorder {
    path: PathBuf,
    out: BufWriter<File>,
    pending_draws: Vec<Vec<u8>>,
    frames: usize,
}

impl LogRecorder {
    /// Starts `<dir>/roboviz_log_<timestamp>.log`, creating `dir` if needed.
    pub fn create(dir: &Path) -> Result<Self, SessionError> {
        fs::create_dir_all(dir).map_err(|source| SessionError::Recording {
            path: dir.to_path_buf(),
            source,
        })?;
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S_%3f");
        Self::create_at(dir.join(format!("roboviz_log_{stamp}.log")))
    }

    pub fn create_at(path: PathBuf) -> Result<Self, SessionError> {
        let file = File::create(&path).map_err(|source| SessionError::Recording {
            path: path.clone(),
            source,
        })?;
        info!("recording to {}", path.display());
        Ok(Self {
            path,
            out: BufWriter::new(file),
            pending_draws: Vec::new(),
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cycles written so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn record_draw(&mut self, datagram: &[u8]) {
        self.pending_draws.push(datagram.to_vec());
    }

    pub fn record_message(&mut self, message: &str) -> Result<(), SessionError> {
        let record = LogRecord {
            frame: self.frames,
            draw_commands: std::mem::take(&mut self.pending_draws),
            message: message.replace(['\n', '\r'], " "),
        };
        writeln!(self.out, "{}", record.to_line()).map_err(|source| self.write_error(source))?;
        self.frames += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SessionError> {
        self.out.flush().map_err(|source| self.write_error(source))
    }

    fn write_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Recording {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for LogRecorder {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
