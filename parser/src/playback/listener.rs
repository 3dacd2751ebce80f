use std::path::Path;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::types::FrameIndex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, AsRefStr)]
pub enum PlaybackState {
    /// No log is loaded.
    #[default]
    Empty,
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn is_loaded(self) -> bool {
        self != PlaybackState::Empty
    }
}

/// Notified by [`super::PlaybackController`] on the thread driving it.
pub trait PlaybackListener: Send {
    fn state_changed(&mut self, _state: PlaybackState) {}

    /// A new log was opened; playback is paused on its first frame.
    fn log_changed(&mut self, _path: &Path) {}

    /// The current frame moved. Fired once per operation, not per replayed cycle.
    fn frame_changed(&mut self, _frame: FrameIndex) {}
}
