use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use parking_lot::Mutex;
use tracing::{Level, debug, info, span, trace, warn};

use crate::analyzer::decoder::DecodedCycle;
use crate::analyzer::survey::SurveyEvent;
use crate::analyzer::world::{Goal, GoalTimeline, WorldCheckpoint, WorldModel};
use crate::draw::Drawings;
use crate::game_constants::{DEFAULT_SECONDS_PER_FRAME, DRAW_LOG_SECONDS_PER_FRAME, ESTIMATED_FRAMES};
use crate::logfile::{DEFAULT_WINDOW, LogReader, LogRecord};
use crate::types::FrameIndex;
use crate::{ErrorKind, Result};

use super::listener::{PlaybackListener, PlaybackState};
use super::scanner::Scanner;

pub const MAX_SPEED: f32 = 10.0;
pub const SPEED_STEP: f32 = 0.25;

/// Absorbs float error when elapsed time is an exact multiple of a frame.
const FRAME_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct PlaybackOptions {
    /// Frames between saved world checkpoints used for backward seeks.
    pub checkpoint_interval: usize,
    /// Most frames a single tick replays. Anything beyond is dropped.
    pub max_catch_up_frames: usize,
    /// Records the reader keeps in memory.
    pub window: usize,
    /// Survey the log in the background for goals and its frame count.
    pub survey: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            max_catch_up_frames: 50,
            window: DEFAULT_WINDOW,
            survey: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug)]
struct LoadedLog {
    path: PathBuf,
    reader: LogReader,
    frame: FrameIndex,
    desired: FrameIndex,
    /// World state right after the keyed frame was applied. Frame 0 is
    /// always present.
    checkpoints: BTreeMap<FrameIndex, WorldCheckpoint>,
    goals: GoalTimeline,
    scanner: Option<Scanner>,
    estimated_frames: usize,
    scanned_frames: usize,
    surveyed_frames: Option<usize>,
    seconds_per_frame: f32,
}

impl LoadedLog {
    fn is_complete(&self) -> bool {
        self.reader.is_complete() || self.surveyed_frames.is_some()
    }

    fn num_frames(&self) -> usize {
        if self.reader.is_complete() {
            return self.reader.discovered_frames();
        }
        if let Some(frames) = self.surveyed_frames {
            return frames.max(self.reader.discovered_frames());
        }
        self.estimated_frames
            .max(self.scanned_frames)
            .max(self.reader.discovered_frames() + 1)
    }

    fn last_frame(&self) -> FrameIndex {
        self.num_frames().saturating_sub(1)
    }

    /// Bounds a requested frame by the end of the log once that is known.
    /// Before that the estimate is no limit: the reader reads ahead and
    /// stops at the real end.
    fn clamp(&self, frame: FrameIndex) -> FrameIndex {
        if self.is_complete() {
            frame.min(self.last_frame())
        } else {
            frame
        }
    }

    fn handle_survey(&mut self, events: Vec<SurveyEvent>) {
        for event in events {
            match event {
                SurveyEvent::StepSize {
                    seconds,
                    estimated_frames,
                } => {
                    if seconds > 0.0 {
                        self.seconds_per_frame = seconds;
                    }
                    self.estimated_frames = estimated_frames;
                }
                SurveyEvent::Goal(goal) => self.goals.insert(goal),
                SurveyEvent::Progress(frames) => self.scanned_frames = frames,
                SurveyEvent::Finished { frames } => {
                    debug!("survey of {:?} found {frames} frames", self.path);
                    self.surveyed_frames = Some(frames);
                }
            }
        }
    }
}

/// Runs the draw commands and the monitor message of one log line.
///
/// A message that fails to decode leaves the world untouched.
fn apply_record(world: &mut WorldModel, drawings: &Drawings, record: &LogRecord) {
    for block in &record.draw_commands {
        drawings.execute_datagram(block);
    }
    match DecodedCycle::decode(&record.message) {
        Ok(cycle) => world.apply(&cycle),
        Err(e) => warn!("skipping frame {}: {e}", record.frame),
    }
}

/// Plays a recorded log into a shared world model.
///
/// The controller is driven by [`PlaybackController::tick`] from the update
/// loop and never blocks on anything but log I/O. A log is opened paused on
/// its first frame, while a background [`Scanner`] finds goals and the number
/// of frames.
pub struct PlaybackController {
    world: Arc<Mutex<WorldModel>>,
    drawings: Arc<Drawings>,
    options: PlaybackOptions,
    log: Option<LoadedLog>,
    playing: bool,
    speed: f32,
    pending: f32,
    listeners: Vec<Box<dyn PlaybackListener>>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("log", &self.log)
            .field("playing", &self.playing)
            .field("speed", &self.speed)
            .finish()
    }
}

impl PlaybackController {
    pub fn new(world: Arc<Mutex<WorldModel>>, drawings: Arc<Drawings>) -> Self {
        Self::with_options(world, drawings, PlaybackOptions::default())
    }

    pub fn with_options(
        world: Arc<Mutex<WorldModel>>,
        drawings: Arc<Drawings>,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            world,
            drawings,
            options,
            log: None,
            playing: false,
            speed: 1.0,
            pending: 0.0,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn PlaybackListener>) {
        self.listeners.push(listener);
    }

    pub fn world(&self) -> &Arc<Mutex<WorldModel>> {
        &self.world
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.log, self.playing) {
            (None, _) => PlaybackState::Empty,
            (Some(_), false) => PlaybackState::Paused,
            (Some(_), true) => PlaybackState::Playing,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.log.as_ref().map(|log| log.path.as_path())
    }

    /// Frame whose cycle was applied last.
    pub fn frame(&self) -> Option<FrameIndex> {
        self.log.as_ref().map(|log| log.frame)
    }

    /// Frame the last operation asked for. Differs from [`Self::frame`] only
    /// when the log ended first.
    pub fn desired_frame(&self) -> Option<FrameIndex> {
        self.log.as_ref().map(|log| log.desired)
    }

    /// Known or estimated number of frames; 0 when no log is loaded.
    pub fn num_frames(&self) -> usize {
        self.log.as_ref().map_or(0, LoadedLog::num_frames)
    }

    /// True once the frame count is exact rather than an estimate.
    pub fn is_frame_count_exact(&self) -> bool {
        self.log.as_ref().is_some_and(LoadedLog::is_complete)
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn seconds_per_frame(&self) -> f32 {
        self.log
            .as_ref()
            .map_or(DEFAULT_SECONDS_PER_FRAME, |log| log.seconds_per_frame)
    }

    /// Goals found by the survey so far.
    pub fn goals(&self) -> &[Goal] {
        self.log.as_ref().map_or(&[], |log| log.goals.goals())
    }

    pub fn is_survey_finished(&self) -> bool {
        self.log
            .as_ref()
            .and_then(|log| log.scanner.as_ref())
            .is_none_or(Scanner::is_finished)
    }

    /// Loads `path` paused on its first frame.
    ///
    /// On failure the previously loaded log, if any, stays loaded untouched.
    pub fn open_file(&mut self, path: &Path) -> Result<()> {
        let mut reader = LogReader::with_window(path, self.options.window)?;
        let first = reader
            .record(0)?
            .ok_or_else(|| ErrorKind::UnsupportedContainer {
                path: path.to_path_buf(),
                reason: "log holds no cycles".to_string(),
            })?;

        let seconds_per_frame = if reader.has_draw_commands() {
            DRAW_LOG_SECONDS_PER_FRAME
        } else {
            DEFAULT_SECONDS_PER_FRAME
        };

        self.drawings.clear_all();
        let checkpoint = {
            let mut world = self.world.lock();
            world.reset();
            apply_record(&mut world, &self.drawings, &first);
            world.checkpoint()
        };

        self.log = Some(LoadedLog {
            path: path.to_path_buf(),
            reader,
            frame: 0,
            desired: 0,
            checkpoints: BTreeMap::from([(0, checkpoint)]),
            goals: GoalTimeline::new(),
            scanner: self
                .options
                .survey
                .then(|| Scanner::spawn(path.to_path_buf())),
            estimated_frames: ESTIMATED_FRAMES,
            scanned_frames: 0,
            surveyed_frames: None,
            seconds_per_frame,
        });
        self.playing = false;
        self.pending = 0.0;
        info!("opened log {path:?}");

        self.notify(|l| l.log_changed(path));
        self.notify(|l| l.state_changed(PlaybackState::Paused));
        self.notify(|l| l.frame_changed(0));
        Ok(())
    }

    /// Unloads the current log.
    pub fn close(&mut self) {
        if self.log.take().is_some() {
            self.playing = false;
            self.notify(|l| l.state_changed(PlaybackState::Empty));
        }
    }

    pub fn play(&mut self) -> Result<()> {
        if self.log.is_none() {
            return Err(ErrorKind::NoLogLoaded.into());
        }
        self.set_playing(true);
        Ok(())
    }

    pub fn pause(&mut self) {
        self.set_playing(false);
    }

    /// Moves one frame forward. Ignored while playing.
    pub fn step_forward(&mut self) -> Result<()> {
        let frame = self.loaded()?.frame;
        if self.playing {
            debug!("ignoring step while playing");
            return Ok(());
        }
        self.seek(frame + 1)
    }

    /// Moves one frame back. Ignored while playing.
    pub fn step_backward(&mut self) -> Result<()> {
        let frame = self.loaded()?.frame;
        if self.playing {
            debug!("ignoring step while playing");
            return Ok(());
        }
        self.seek(frame.saturating_sub(1))
    }

    /// Moves to `frame`, clamped to the frames of the log. A frame past the
    /// part read so far reads ahead to it.
    pub fn seek(&mut self, frame: FrameIndex) -> Result<()> {
        self.poll_survey();
        let target = self.loaded()?.clamp(frame);
        self.move_to(target)?;
        let frame = self.loaded()?.frame;
        self.notify(|l| l.frame_changed(frame));
        Ok(())
    }

    /// Seeks to the nearest goal strictly after or before the current frame.
    /// Returns the goal's frame, or `None` if there is no goal that way.
    pub fn step_to_goal(&mut self, direction: Direction) -> Result<Option<FrameIndex>> {
        self.poll_survey();
        let log = self.loaded()?;
        let goal = match direction {
            Direction::Forward => log.goals.next_after(log.frame),
            Direction::Backward => log.goals.previous_before(log.frame),
        };
        let Some(frame) = goal.map(|g| g.frame) else {
            return Ok(None);
        };
        self.seek(frame)?;
        Ok(Some(frame))
    }

    /// Sets the playback speed, clamped to `±MAX_SPEED`. Negative speeds
    /// play backwards. Zero pauses and keeps the previous speed.
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            return;
        }
        if speed == 0.0 {
            self.pause();
            return;
        }
        self.speed = speed.clamp(-MAX_SPEED, MAX_SPEED);
    }

    pub fn speed_up(&mut self) {
        let mut speed = self.speed + SPEED_STEP;
        if speed == 0.0 {
            speed = SPEED_STEP;
        }
        self.set_speed(speed);
    }

    pub fn slow_down(&mut self) {
        let mut speed = self.speed - SPEED_STEP;
        if speed == 0.0 {
            speed = -SPEED_STEP;
        }
        self.set_speed(speed);
    }

    /// Blocks until the background survey has read the whole log.
    pub fn wait_for_survey(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Some(scanner) = log.scanner.as_mut() {
                let events = scanner.wait();
                log.handle_survey(events);
            }
        }
    }

    /// Advances playback by `elapsed` wall time.
    ///
    /// Every cycle between the current and the new frame is applied in
    /// order. At most `max_catch_up_frames` are applied per tick; a larger
    /// backlog is dropped. Reaching either end of the log pauses.
    pub fn tick(&mut self, elapsed: Duration) -> Result<()> {
        self.poll_survey();
        if !self.playing {
            return Ok(());
        }
        let (current, seconds_per_frame) = {
            let log = self.loaded()?;
            (log.frame, log.seconds_per_frame)
        };

        self.pending += elapsed.as_secs_f32() / seconds_per_frame * self.speed.abs();
        let mut frames = (self.pending + FRAME_EPSILON).floor() as usize;
        self.pending = (self.pending - frames as f32).max(0.0);
        if frames > self.options.max_catch_up_frames {
            debug!(
                "dropping {} frames of playback backlog",
                frames - self.options.max_catch_up_frames
            );
            frames = self.options.max_catch_up_frames;
            self.pending = 0.0;
        }
        if frames == 0 {
            return Ok(());
        }

        let forward = self.speed > 0.0;
        let target = if forward {
            self.loaded()?.clamp(current + frames)
        } else {
            current.saturating_sub(frames)
        };
        let reached = self.move_to(target)?;

        let log = self.loaded()?;
        let frame = log.frame;
        let at_end = if forward {
            !reached || (log.is_complete() && frame >= log.last_frame())
        } else {
            frame == 0
        };
        self.notify(|l| l.frame_changed(frame));
        if at_end {
            debug!("playback reached frame {frame}, pausing");
            self.set_playing(false);
        }
        Ok(())
    }

    fn loaded(&self) -> Result<&LoadedLog> {
        self.log.as_ref().ok_or_else(|| ErrorKind::NoLogLoaded.into())
    }

    fn poll_survey(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Some(scanner) = log.scanner.as_mut() {
                let events = scanner.try_events();
                log.handle_survey(events);
            }
        }
    }

    fn set_playing(&mut self, playing: bool) {
        if self.log.is_none() || self.playing == playing {
            return;
        }
        self.playing = playing;
        self.pending = 0.0;
        let state = self.state();
        self.notify(|l| l.state_changed(state));
    }

    /// Brings the world to `target`, replaying every cycle in between under a
    /// single world lock. Going backwards restores the closest checkpoint and
    /// replays from there. Returns false if the log ended before `target`.
    fn move_to(&mut self, target: FrameIndex) -> Result<bool> {
        let span = span!(Level::TRACE, "move to frame", target);
        let _enter = span.enter();

        let Some(log) = self.log.as_mut() else {
            return Err(ErrorKind::NoLogLoaded.into());
        };
        log.desired = target;
        let mut world = self.world.lock();

        if target < log.frame {
            self.drawings.clear_all();
            match log.checkpoints.range(..=target).next_back() {
                Some((&frame, checkpoint)) => {
                    trace!("restoring checkpoint at frame {frame}");
                    world.restore(checkpoint.clone());
                    log.frame = frame;
                }
                None => {
                    // Frame 0 is always checkpointed; rebuild it if that ever changes.
                    world.reset();
                    if let Some(record) = log.reader.record(0)? {
                        apply_record(&mut world, &self.drawings, &record);
                    }
                    log.frame = 0;
                }
            }
        }

        let interval = self.options.checkpoint_interval.max(1);
        while log.frame < target {
            let next = log.frame + 1;
            let Some(record) = log.reader.record(next)? else {
                debug!("log ends after frame {}", log.frame);
                log.desired = log.frame;
                return Ok(false);
            };
            apply_record(&mut world, &self.drawings, &record);
            log.frame = next;
            if next % interval == 0 {
                log.checkpoints
                    .entry(next)
                    .or_insert_with(|| world.checkpoint());
            }
        }
        Ok(true)
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn PlaybackListener)) {
        for listener in &mut self.listeners {
            f(listener.as_mut());
        }
    }
}
