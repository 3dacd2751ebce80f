use std::sync::Arc;
use std::sync::mpsc::Sender;

use parking_lot::Mutex;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::analyzer::decoder::DecodedCycle;
use crate::analyzer::world::{Goal, GameState, GoalTimeline};
use crate::logfile::LogRecord;
use crate::types::{FrameIndex, Side};

/// Frames between two [`SurveyEvent::Progress`] reports.
const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SurveyStats {
    pub total_frames: usize,
    pub malformed_frames: usize,
    pub skipped_fields: usize,
    pub goals: GoalTimeline,
    /// Seconds of game time per frame, once two distinct steps were seen.
    pub step_size: Option<f32>,
    /// Frame count extrapolated from the step size and the half time.
    pub estimated_frames: Option<usize>,
    pub has_draw_commands: bool,
    pub team_names: [Option<String>; 2],
    pub final_score: [u32; 2],
}

impl SurveyStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Incremental results, in the order they were found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SurveyEvent {
    StepSize {
        seconds: f32,
        estimated_frames: usize,
    },
    Goal(Goal),
    /// Frames surveyed so far.
    Progress(usize),
    Finished {
        frames: usize,
    },
}

pub struct SurveyBuilder {
    stats: Arc<Mutex<SurveyStats>>,
    events: Option<Sender<SurveyEvent>>,
}

impl SurveyBuilder {
    pub fn new(stats: Arc<Mutex<SurveyStats>>) -> Self {
        Self {
            stats,
            events: None,
        }
    }

    /// Also send every result over `events` as soon as it is found.
    pub fn events(mut self, events: Sender<SurveyEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> LogSurvey {
        LogSurvey {
            stats: self.stats,
            events: self.events,
            game_state: GameState::new(),
            last_score: None,
            start_time: None,
            last_time: None,
            pause_frames: 0,
            step_found: false,
        }
    }
}

/// One pass over a log that finds goals, the simulation step size and the
/// number of frames.
pub struct LogSurvey {
    stats: Arc<Mutex<SurveyStats>>,
    events: Option<Sender<SurveyEvent>>,
    game_state: GameState,
    last_score: Option<[u32; 2]>,
    start_time: Option<f32>,
    last_time: Option<f32>,
    pause_frames: usize,
    step_found: bool,
}

impl LogSurvey {
    fn emit(&self, event: SurveyEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening any more.
            let _ = events.send(event);
        }
    }

    fn process_goals(&mut self, frame: FrameIndex) {
        let score = [
            self.game_state.score(Side::Left),
            self.game_state.score(Side::Right),
        ];
        if let Some(last) = self.last_score {
            let scoring = Side::iter().find(|side| score[side.index()] > last[side.index()]);
            if let Some(side) = scoring {
                let goal = Goal {
                    frame,
                    side,
                    time: self.game_state.time(),
                };
                debug!("goal for {side} at frame {frame}");
                self.stats.lock().goals.insert(goal.clone());
                self.emit(SurveyEvent::Goal(goal));
            }
        }
        self.last_score = Some(score);
    }

    /// The first frames share the start time while the server waits for
    /// kick-off; they are counted on top of the extrapolated half.
    fn process_step_size(&mut self) {
        if self.step_found {
            return;
        }
        let time = self.game_state.time().seconds();
        let Some(start) = self.start_time else {
            self.start_time = Some(time);
            return;
        };
        if time == start {
            self.pause_frames += 1;
            return;
        }

        let time = time - start;
        if let Some(last) = self.last_time {
            if time != last {
                let step = time - last;
                let half_time = self.game_state.constants().half_time();
                let estimated = ((1.0 / step) * half_time).round().max(0.0) as usize
                    + self.pause_frames;
                debug!("step size {step}s, about {estimated} frames");
                self.step_found = true;
                {
                    let mut stats = self.stats.lock();
                    stats.step_size = Some(step);
                    stats.estimated_frames = Some(estimated);
                }
                self.emit(SurveyEvent::StepSize {
                    seconds: step,
                    estimated_frames: estimated,
                });
            }
        }
        self.last_time = Some(time);
    }
}

impl Analyzer for LogSurvey {
    fn process(&mut self, record: &LogRecord) {
        {
            let mut stats = self.stats.lock();
            stats.total_frames = stats.total_frames.max(record.frame + 1);
            stats.has_draw_commands |= !record.draw_commands.is_empty();
        }
        if (record.frame + 1) % PROGRESS_INTERVAL == 0 {
            self.emit(SurveyEvent::Progress(record.frame + 1));
        }

        let cycle = match DecodedCycle::decode(&record.message) {
            Ok(cycle) => cycle,
            Err(e) => {
                warn!("survey: frame {} is malformed: {e}", record.frame);
                self.stats.lock().malformed_frames += 1;
                return;
            }
        };
        self.stats.lock().skipped_fields += cycle.skipped_fields;
        self.game_state.apply(&cycle.game_state);

        self.process_goals(record.frame);
        self.process_step_size();
    }

    fn finish(&mut self) {
        let frames = {
            let mut stats = self.stats.lock();
            for side in Side::iter() {
                stats.team_names[side.index()] = self.game_state.team_name(side).map(str::to_string);
                stats.final_score[side.index()] = self.game_state.score(side);
            }
            stats.total_frames
        };
        self.emit(SurveyEvent::Finished { frames });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn cycle(time: f32, left: u32, right: u32) -> String {
        format!(
            "((time {time}) (score_left {left}) (score_right {right}))(RDS 0 1)()"
        )
    }

    fn run(messages: &[String]) -> (SurveyStats, Vec<SurveyEvent>) {
        let stats = Arc::new(Mutex::new(SurveyStats::new()));
        let (tx, rx) = mpsc::channel();
        let mut survey = SurveyBuilder::new(stats.clone()).events(tx).build();
        for (frame, message) in messages.iter().enumerate() {
            survey.process(&LogRecord::parse(frame, message));
        }
        survey.finish();
        drop(survey);
        let events = rx.iter().collect();
        let stats = stats.lock().clone();
        (stats, events)
    }

    #[test]
    fn finds_goals_at_the_scoring_frame() {
        let mut messages: Vec<String> = (0..500)
            .map(|f| {
                let left = u32::from(f >= 120);
                let right = u32::from(f >= 340);
                cycle(f as f32 * 0.2, left, right)
            })
            .collect();
        messages[200] = "((time 1) (broken)".to_string();

        let (stats, events) = run(&messages);
        let frames: Vec<_> = stats.goals.goals().iter().map(|g| (g.frame, g.side)).collect();
        assert_eq!(frames, vec![(120, Side::Left), (340, Side::Right)]);
        assert_eq!(stats.total_frames, 500);
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.final_score, [1, 1]);
        assert_eq!(events.last(), Some(&SurveyEvent::Finished { frames: 500 }));
        assert!(events.contains(&SurveyEvent::Progress(500)));
    }

    #[test]
    fn estimates_frames_from_step_size() {
        let mut messages: Vec<String> = (0..3).map(|_| cycle(0.0, 0, 0)).collect();
        messages.extend((1..10).map(|i| cycle(i as f32 * 0.5, 0, 0)));

        let (stats, events) = run(&messages);
        // Default half time is 300 s; two frames repeated the start time.
        assert_eq!(stats.step_size, Some(0.5));
        assert_eq!(stats.estimated_frames, Some(602));
        let steps = events
            .iter()
            .filter(|e| matches!(e, SurveyEvent::StepSize { .. }))
            .count();
        assert_eq!(steps, 1);
    }

    #[test]
    fn notes_draw_commands() {
        let (stats, _) = run(&["[0,0,0]".to_string() + &cycle(0.0, 0, 0)]);
        assert!(stats.has_draw_commands);
    }
}
