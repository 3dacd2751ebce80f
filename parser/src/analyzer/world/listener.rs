use crate::scene_graph::SceneGraph;
use crate::types::{AgentId, Side};

use super::state::{Agent, Ball, GameState, Team};

/// Readonly view into WorldModel state.
///
/// This is what render and overlay code receives, so they cannot mutate the
/// model outside of a decoded cycle.
pub trait WorldModelState {
    /// Game state as of the last applied cycle
    fn game_state(&self) -> &GameState;

    /// Team currently playing on `side`
    fn team(&self, side: Side) -> &Team;

    fn ball(&self) -> &Ball;

    /// Current scene graph, if a full graph has been received
    fn scene_graph(&self) -> Option<&SceneGraph>;

    /// Number of cycles applied since the last reset
    fn cycles_applied(&self) -> u64;

    fn agent(&self, side: Side, id: AgentId) -> Option<&Agent> {
        self.team(side).agent(id)
    }

    /// Team name for display, falling back to the side name.
    fn team_display_name(&self, side: Side) -> String {
        self.game_state()
            .team_name(side)
            .map(str::to_string)
            .unwrap_or_else(|| side.to_string())
    }
}
