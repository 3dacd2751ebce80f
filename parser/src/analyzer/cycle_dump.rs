use std::io::{self, Write};

use serde::Serialize;
use tracing::warn;

use crate::analyzer::Analyzer;
use crate::analyzer::decoder::{DecodedCycle, GameStateUpdate};
use crate::logfile::LogRecord;

/// Writes every record of a log as one line of JSON.
pub struct CycleDumpBuilder {
    out: Box<dyn Write>,
    include_scene: bool,
}

impl Default for CycleDumpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleDumpBuilder {
    pub fn new() -> Self {
        Self {
            out: Box::new(io::stdout()),
            include_scene: true,
        }
    }

    pub fn output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Leave scene graph nodes out of the dump.
    pub fn game_state_only(mut self) -> Self {
        self.include_scene = false;
        self
    }

    pub fn build(self) -> Box<dyn Analyzer> {
        Box::new(CycleDump {
            out: self.out,
            include_scene: self.include_scene,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum DumpedCycle<'a> {
    Cycle {
        frame: usize,
        draw_blocks: usize,
        cycle: &'a DecodedCycle,
    },
    GameState {
        frame: usize,
        draw_blocks: usize,
        full_state: bool,
        game_state: &'a GameStateUpdate,
    },
    Malformed {
        frame: usize,
        error: String,
    },
}

struct CycleDump {
    out: Box<dyn Write>,
    include_scene: bool,
}

impl Analyzer for CycleDump {
    fn finish(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!("failed to flush cycle dump: {e}");
        }
    }

    fn process(&mut self, record: &LogRecord) {
        let decoded = DecodedCycle::decode(&record.message);
        let draw_blocks = record.draw_commands.len();
        let dumped = match &decoded {
            Ok(cycle) if self.include_scene => DumpedCycle::Cycle {
                frame: record.frame,
                draw_blocks,
                cycle,
            },
            Ok(cycle) => DumpedCycle::GameState {
                frame: record.frame,
                draw_blocks,
                full_state: cycle.is_full_state(),
                game_state: &cycle.game_state,
            },
            Err(e) => DumpedCycle::Malformed {
                frame: record.frame,
                error: e.to_string(),
            },
        };

        let written = serde_json::to_writer(&mut self.out, &dumped)
            .map_err(io::Error::from)
            .and_then(|_| writeln!(self.out));
        if let Err(e) = written {
            warn!("failed to write frame {}: {e}", record.frame);
        }
    }
}
