use std::io::{self, Write};

use tracing::warn;

use crate::analyzer::Analyzer;
use crate::analyzer::decoder::DecodedCycle;
use crate::analyzer::world::GameState;
use crate::logfile::LogRecord;
use crate::types::Side;

/// Prints play-mode changes and fouls as they happen in a log.
pub struct PlayModeLoggerBuilder {
    out: Box<dyn Write>,
}

impl Default for PlayModeLoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayModeLoggerBuilder {
    pub fn new() -> PlayModeLoggerBuilder {
        PlayModeLoggerBuilder {
            out: Box::new(io::stdout()),
        }
    }

    pub fn output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn build(self) -> Box<dyn Analyzer> {
        Box::new(PlayModeLogger {
            out: self.out,
            game_state: GameState::new(),
            last_foul: None,
        })
    }
}

pub struct PlayModeLogger {
    out: Box<dyn Write>,
    game_state: GameState,
    last_foul: Option<u32>,
}

impl PlayModeLogger {
    fn log_cycle(&mut self) -> io::Result<()> {
        let state = &self.game_state;
        if let Some(mode) = state.play_mode_name().filter(|_| state.play_mode_just_changed()) {
            writeln!(
                self.out,
                "{}: {} ({} {}:{} {})",
                state.time(),
                mode,
                state.team_name(Side::Left).unwrap_or("Left"),
                state.score(Side::Left),
                state.score(Side::Right),
                state.team_name(Side::Right).unwrap_or("Right"),
            )?;
        }

        for foul in state.fouls() {
            if self.last_foul.is_some_and(|last| foul.index <= last) {
                continue;
            }
            let team = foul
                .side
                .and_then(|side| state.team_name(side))
                .unwrap_or("<unknown team>");
            writeln!(
                self.out,
                "{}: foul {} by {} #{}",
                foul.time,
                foul.foul_type.as_ref(),
                team,
                foul.agent
            )?;
            self.last_foul = Some(foul.index);
        }
        Ok(())
    }
}

impl Analyzer for PlayModeLogger {
    fn finish(&mut self) {
        let _ = self.out.flush();
    }

    fn process(&mut self, record: &LogRecord) {
        let cycle = match DecodedCycle::decode(&record.message) {
            Ok(cycle) => cycle,
            Err(_) => return,
        };
        self.game_state.apply(&cycle.game_state);
        if let Err(e) = self.log_cycle() {
            warn!("failed to write play mode log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

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

    #[test]
    fn logs_mode_changes_once() {
        let buf = SharedBuf::default();
        let mut logger = PlayModeLoggerBuilder::new()
            .output(Box::new(buf.clone()))
            .build();
        let messages = [
            "((play_modes BeforeKickOff KickOff_Left PlayOn) (play_mode 1) (time 0) (team_left A) (team_right B))(RDS 0 1)()",
            "((play_mode 1) (time 0.2))(RDS 0 1)()",
            "((play_mode 2) (time 61.5) (score_left 1))(RDS 0 1)()",
        ];
        for (frame, message) in messages.iter().enumerate() {
            logger.process(&LogRecord::parse(frame, message));
        }
        logger.finish();

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["00:00.00: KickOff_Left (A 0:0 B)", "01:01.50: PlayOn (A 1:0 B)"]
        );
    }
}
