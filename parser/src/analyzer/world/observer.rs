use super::listener::WorldModelState;
use super::state::GameState;

/// Receives world-model notifications. Every callback runs after a whole cycle
/// has been applied, while the caller still holds the world lock.
pub trait WorldObserver: Send {
    fn play_state_changed(&mut self, _state: &GameState) {}

    fn time_changed(&mut self, _state: &GameState) {}

    fn measures_changed(&mut self, _state: &GameState) {}

    /// A full scene graph replaced the previous one and agents were rebuilt.
    fn scene_graph_replaced(&mut self, _world: &dyn WorldModelState) {}

    /// The model was cleared, e.g. on reconnect or when a log is rewound.
    fn world_reset(&mut self) {}
}

/// Handle returned by [`super::WorldModel::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);
