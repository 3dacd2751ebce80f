mod controller;
mod listener;
mod observer;
mod state;
mod timeline;

pub use controller::{WorldCheckpoint, WorldModel};
pub use listener::WorldModelState;
pub use observer::{ObserverId, WorldObserver};
pub use state::{Agent, Ball, Foul, GameState, PlayMode, PlayModeChange, Segment, Team};
pub use timeline::{Goal, GoalTimeline};
