//! Log playback: a controller that replays a log into the world model at a
//! chosen speed, and a background scanner that surveys the log for goals.

mod listener;
mod player;
mod scanner;

pub use listener::{PlaybackListener, PlaybackState};
pub use player::{
    Direction, MAX_SPEED, PlaybackController, PlaybackOptions, PlaybackOptionsBuilder, SPEED_STEP,
};
pub use scanner::Scanner;
