use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{trace, warn};

use crate::Result;
use crate::types::FrameIndex;

use super::container::LogStream;

/// Records kept in memory behind the read position.
pub const DEFAULT_WINDOW: usize = 200;

/// One line of a log: the monitor message of a cycle plus any drawing
/// command blocks that preceded it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub frame: FrameIndex,
    /// Bytes of each `[..]` block, in order. One block may hold several
    /// commands.
    pub draw_commands: Vec<Vec<u8>>,
    pub message: String,
}

impl LogRecord {
    /// Splits a log line into its leading `[b,b,...]` blocks and the message.
    ///
    /// Block values are signed bytes. A block that does not parse is dropped
    /// with a warning; the message is kept.
    pub fn parse(frame: FrameIndex, line: &str) -> LogRecord {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut rest = line;
        let mut draw_commands = Vec::new();

        while let Some(block) = rest.strip_prefix('[') {
            let Some(end) = block.find(']') else {
                break;
            };
            match parse_block(&block[..end]) {
                Ok(bytes) => draw_commands.push(bytes),
                Err(value) => warn!("frame {frame}: dropping draw block with bad value {value:?}"),
            }
            rest = &block[end + 1..];
        }

        LogRecord {
            frame,
            draw_commands,
            message: rest.to_string(),
        }
    }

    /// Line form of the record, as written by the recorder.
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        for block in &self.draw_commands {
            line.push('[');
            let values: Vec<String> = block.iter().map(|b| (*b as i8).to_string()).collect();
            line.push_str(&values.join(","));
            line.push(']');
        }
        line.push_str(&self.message);
        line
    }
}

fn parse_block(block: &str) -> std::result::Result<Vec<u8>, &str> {
    if block.trim().is_empty() {
        return Ok(Vec::new());
    }
    block
        .split(',')
        .map(|v| {
            let v = v.trim();
            v.parse::<i8>().map(|b| b as u8).map_err(|_| v)
        })
        .collect()
}

/// Frame-addressed access to a log that can only be unpacked front to back.
///
/// Every line that has been read once has its byte offset remembered, so any
/// discovered frame can be reached again by seeking (raw files) or by
/// re-opening and skipping (compressed and archived logs). The most recent
/// records are also kept in a window so short backward steps stay in memory.
#[derive(Debug)]
pub struct LogReader {
    stream: LogStream,
    offsets: Vec<u64>,
    next_frame: FrameIndex,
    window: VecDeque<Arc<LogRecord>>,
    window_size: usize,
    end_reached: bool,
    has_draw_commands: bool,
    line: Vec<u8>,
}

impl LogReader {
    /// Opens a log of any supported container format.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_window(path, DEFAULT_WINDOW)
    }

    pub fn with_window(path: &Path, window_size: usize) -> Result<Self> {
        Ok(LogReader {
            stream: LogStream::open(path)?,
            offsets: Vec::new(),
            next_frame: 0,
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            end_reached: false,
            has_draw_commands: false,
            line: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.stream.path()
    }

    /// Number of frames whose start has been seen so far.
    pub fn discovered_frames(&self) -> usize {
        self.offsets.len()
    }

    /// True once the end of the log has been reached, making
    /// [`LogReader::discovered_frames`] the exact frame count.
    pub fn is_complete(&self) -> bool {
        self.end_reached
    }

    /// True once any read line carried drawing commands.
    pub fn has_draw_commands(&self) -> bool {
        self.has_draw_commands
    }

    /// Reads the record at the current position and moves past it.
    pub fn next_record(&mut self) -> Result<Option<Arc<LogRecord>>> {
        if self.end_reached && self.next_frame >= self.offsets.len() {
            return Ok(None);
        }

        let start = self.stream.position();
        self.line.clear();
        if self.stream.read_line(&mut self.line)? == 0 {
            if !self.end_reached {
                trace!("end of log after {} frames", self.offsets.len());
            }
            self.end_reached = true;
            return Ok(None);
        }

        let frame = self.next_frame;
        if frame == self.offsets.len() {
            self.offsets.push(start);
        }
        let record = Arc::new(LogRecord::parse(frame, &String::from_utf8_lossy(&self.line)));
        if !record.draw_commands.is_empty() {
            self.has_draw_commands = true;
        }

        if self.window.back().is_some_and(|r| r.frame + 1 != frame) {
            self.window.clear();
        }
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(record.clone());

        self.next_frame += 1;
        Ok(Some(record))
    }

    /// Returns the record of `frame`, reading forward as far as needed.
    /// `None` means the log ends before `frame`.
    pub fn record(&mut self, frame: FrameIndex) -> Result<Option<Arc<LogRecord>>> {
        if let Some(record) = self.windowed(frame) {
            return Ok(Some(record));
        }
        if self.end_reached && frame >= self.offsets.len() {
            return Ok(None);
        }

        if frame != self.next_frame && frame < self.offsets.len() {
            trace!("seeking to frame {frame}");
            self.stream.reposition(self.offsets[frame])?;
            self.next_frame = frame;
        } else if frame >= self.offsets.len() && self.next_frame < self.offsets.len() {
            let last = self.offsets.len() - 1;
            self.stream.reposition(self.offsets[last])?;
            self.next_frame = last;
        }

        while let Some(record) = self.next_record()? {
            if record.frame == frame {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn windowed(&self, frame: FrameIndex) -> Option<Arc<LogRecord>> {
        let first = self.window.front()?.frame;
        frame
            .checked_sub(first)
            .and_then(|idx| self.window.get(idx))
            .cloned()
    }
}
