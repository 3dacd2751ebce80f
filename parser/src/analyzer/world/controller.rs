use glam::Vec3;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{Level, debug, span, warn};

use crate::analyzer::analyzer::Analyzer;
use crate::analyzer::decoder::{DecodedCycle, SceneUpdate};
use crate::game_constants::MAX_AGENTS;
use crate::logfile::LogRecord;
use crate::scene_graph::SceneGraph;
use crate::types::{AgentId, Side};

use super::listener::WorldModelState;
use super::observer::{ObserverId, WorldObserver};
use super::state::{Agent, Ball, GameState, Segment, Team};

const BALL_MODEL: &str = "soccerball.obj";
const HEAD_SUFFIX: &str = "head.obj";

#[derive(Debug, Clone, PartialEq, Serialize)]
struct WorldData {
    game_state: GameState,
    teams: [Team; 2],
    ball: Ball,
    scene_graph: Option<SceneGraph>,
    cycles_applied: u64,
}

impl WorldData {
    fn new() -> Self {
        Self {
            game_state: GameState::new(),
            teams: [Team::new(Side::Left), Team::new(Side::Right)],
            ball: Ball::default(),
            scene_graph: None,
            cycles_applied: 0,
        }
    }
}

/// Saved copy of a world's data, restorable with [`WorldModel::restore`].
/// Observers are not part of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldCheckpoint(WorldData);

impl WorldCheckpoint {
    pub fn cycles_applied(&self) -> u64 {
        self.0.cycles_applied
    }
}

/// The scene every consumer reads: teams, ball, game state and the raw graph.
///
/// A decoded cycle is applied as a whole by [`WorldModel::apply`]; observers
/// run afterwards, so they never see half of a cycle.
pub struct WorldModel {
    data: WorldData,
    observers: Vec<(ObserverId, Box<dyn WorldObserver>)>,
    next_observer: u64,
}

impl Default for WorldModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorldModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldModel")
            .field("data", &self.data)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl WorldModel {
    pub fn new() -> Self {
        Self {
            data: WorldData::new(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn WorldObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        before != self.observers.len()
    }

    /// Drops all match state: game state, agents, ball and scene graph.
    pub fn reset(&mut self) {
        let mut game_state = std::mem::take(&mut self.data.game_state);
        game_state.reset();
        self.data = WorldData {
            game_state,
            ..WorldData::new()
        };
        for (_, observer) in &mut self.observers {
            observer.world_reset();
        }
    }

    pub fn checkpoint(&self) -> WorldCheckpoint {
        WorldCheckpoint(self.data.clone())
    }

    pub fn restore(&mut self, checkpoint: WorldCheckpoint) {
        self.data = checkpoint.0;
        for (_, observer) in &mut self.observers {
            observer.world_reset();
        }
    }

    /// Applies a decoded cycle. The cycle was validated by decoding, so this
    /// cannot fail half way.
    pub fn apply(&mut self, cycle: &DecodedCycle) {
        let span = span!(Level::TRACE, "apply cycle");
        let _enter = span.enter();

        let changes = self.data.game_state.apply(&cycle.game_state);
        for side in Side::iter() {
            let name = self.data.game_state.team_name(side);
            self.data.teams[side.index()].set_name(name);
        }

        let replaced = match &cycle.scene {
            SceneUpdate::Full(nodes) => {
                self.data.scene_graph = Some(SceneGraph::build(nodes));
                self.rebuild_agents();
                true
            }
            SceneUpdate::Diff(nodes) => {
                match self.data.scene_graph.as_mut() {
                    Some(graph) => graph.apply_diff(nodes),
                    None => debug!("ignoring scene graph diff received before any full graph"),
                }
                false
            }
        };
        self.update_poses();
        self.data.cycles_applied += 1;

        let data = &self.data;
        for (_, observer) in &mut self.observers {
            if changes.play_state {
                observer.play_state_changed(&data.game_state);
            }
            if changes.time {
                observer.time_changed(&data.game_state);
            }
            if changes.measures {
                observer.measures_changed(&data.game_state);
            }
            if replaced {
                observer.scene_graph_replaced(data);
            }
        }
    }

    /// Agents appear and disappear only with full graphs: an agent is present
    /// exactly when some mesh carries both its number and team materials.
    fn rebuild_agents(&mut self) {
        let Some(graph) = self.data.scene_graph.as_ref() else {
            return;
        };
        for side in Side::iter() {
            let team_material = format!("mat{}", side);
            let agents = self.data.teams[side.index()].agents_mut();
            for raw in 1..=MAX_AGENTS {
                let id = AgentId(raw);
                let number_material = format!("matNum{raw}");
                let found = graph
                    .find_mesh_by_materials(&[number_material.as_str(), team_material.as_str()]);
                match found {
                    Some(path) if !path.is_empty() => {
                        let root = path[..1].to_vec();
                        agents
                            .entry(id)
                            .and_modify(|a| a.root = root.clone())
                            .or_insert_with(|| {
                                debug!("agent {side} {id} joined");
                                Agent::new(id, side, root.clone())
                            });
                    }
                    _ => {
                        if agents.remove(&id).is_some() {
                            debug!("agent {side} {id} left");
                        }
                    }
                }
            }
        }
        self.data.ball.path = graph.find_mesh_by_model(BALL_MODEL);
    }

    fn update_poses(&mut self) {
        let Some(graph) = self.data.scene_graph.as_ref() else {
            return;
        };
        for team in &mut self.data.teams {
            for agent in team.agents_mut().values_mut() {
                let meshes = graph.meshes_under(&agent.root);
                if meshes.is_empty() {
                    warn!("agent {} {} has no meshes under its root", agent.side, agent.id);
                }
                agent.segments = meshes
                    .iter()
                    .map(|m| Segment {
                        model: m.mesh.model.clone(),
                        transform: m.model_matrix(),
                    })
                    .collect();
                agent.head = agent.segment(HEAD_SUFFIX).map(|s| s.transform);
                agent.torso_direction = agent
                    .segments
                    .iter()
                    .find(|s| is_body_model(&s.model))
                    .map(|s| {
                        let center = s.transform.transform_point3(Vec3::ZERO);
                        (s.transform.transform_point3(Vec3::Z) - center).normalize_or_zero()
                    });
                agent.position = agent
                    .head
                    .or_else(|| agent.segments.first().map(|s| s.transform))
                    .map(|m| m.transform_point3(Vec3::ZERO));
            }
        }
        self.data.ball.position = self.data.ball.path.as_ref().and_then(|path| {
            graph
                .world_transform(path)
                .map(|m| (crate::scene_graph::COORD_TFN * m).transform_point3(Vec3::ZERO))
        });
    }

    pub fn game_state(&self) -> &GameState {
        &self.data.game_state
    }

    pub fn team(&self, side: Side) -> &Team {
        &self.data.teams[side.index()]
    }

    pub fn ball(&self) -> &Ball {
        &self.data.ball
    }

    pub fn scene_graph(&self) -> Option<&SceneGraph> {
        self.data.scene_graph.as_ref()
    }
}

fn is_body_model(model: &str) -> bool {
    model.ends_with(".obj")
        && model
            .rsplit('/')
            .next()
            .is_some_and(|file| file.contains("body"))
}

impl WorldModelState for WorldModel {
    fn game_state(&self) -> &GameState {
        &self.data.game_state
    }

    fn team(&self, side: Side) -> &Team {
        &self.data.teams[side.index()]
    }

    fn ball(&self) -> &Ball {
        &self.data.ball
    }

    fn scene_graph(&self) -> Option<&SceneGraph> {
        self.data.scene_graph.as_ref()
    }

    fn cycles_applied(&self) -> u64 {
        self.data.cycles_applied
    }
}

impl WorldModelState for WorldData {
    fn game_state(&self) -> &GameState {
        &self.game_state
    }

    fn team(&self, side: Side) -> &Team {
        &self.teams[side.index()]
    }

    fn ball(&self) -> &Ball {
        &self.ball
    }

    fn scene_graph(&self) -> Option<&SceneGraph> {
        self.scene_graph.as_ref()
    }

    fn cycles_applied(&self) -> u64 {
        self.cycles_applied
    }
}

impl Analyzer for WorldModel {
    fn process(&mut self, record: &LogRecord) {
        match DecodedCycle::decode(&record.message) {
            Ok(cycle) => self.apply(&cycle),
            Err(e) => warn!("skipping frame {}: {e}", record.frame),
        }
    }

    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    fn agent_node(side: &str, num: u8, x: f32) -> String {
        format!(
            "(nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 {x} 0 0.5 1) \
               (nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0.2 1) \
                 (nd StaticMesh (load models/naohead.obj) (setVisible 1) (resetMaterials matNum{num} mat{side}))) \
               (nd StaticMesh (load models/naobody.obj) (setVisible 1) (resetMaterials mat{side})))"
        )
    }

    fn full(agents: &[(&str, u8, f32)], score_left: u32) -> DecodedCycle {
        let nodes: String = agents
            .iter()
            .map(|(side, num, x)| agent_node(side, *num, *x))
            .collect();
        let msg = format!(
            "((play_modes BeforeKickOff PlayOn Goal_Left)(play_mode 1)(score_left {score_left})(team_left a)(team_right b))\
             (RSG 0 1)\
             ((nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0.1 1) (nd StaticMesh (load models/soccerball.obj) (setVisible 1))) {nodes})"
        );
        DecodedCycle::decode(&msg).unwrap()
    }

    #[test]
    fn full_graph_creates_agents_and_ball() {
        let mut world = WorldModel::new();
        world.apply(&full(&[("Left", 1, 2.0), ("Right", 3, -4.0)], 0));

        assert_eq!(world.team(Side::Left).len(), 1);
        assert_eq!(world.team(Side::Right).len(), 1);
        let agent = world.team(Side::Left).agent(AgentId(1)).unwrap();
        assert_eq!(agent.root, vec![1]);
        assert_eq!(agent.side, Side::Left);
        assert_eq!(world.team(agent.side).agent(agent.id), Some(agent));
        assert_eq!(agent.segments.len(), 2);
        // server x=2 maps to viewer x=-2; height 0.7 maps to viewer y
        let pos = agent.position.unwrap();
        assert!((pos.x + 2.0).abs() < 1e-5);
        assert!((pos.y - 0.7).abs() < 1e-5);
        assert!(agent.torso_direction.is_some());

        let ball = world.ball().position.unwrap();
        assert!((ball.y - 0.1).abs() < 1e-5);
    }

    #[test]
    fn agents_absent_from_new_full_graph_are_removed() {
        let mut world = WorldModel::new();
        world.apply(&full(&[("Left", 1, 0.0), ("Left", 2, 1.0)], 0));
        assert_eq!(world.team(Side::Left).len(), 2);

        // diffs never remove agents
        world.apply(&DecodedCycle::decode("((time 1))(RDS 0 1)()").unwrap());
        assert_eq!(world.team(Side::Left).len(), 2);

        world.apply(&full(&[("Left", 2, 1.0)], 0));
        let ids: Vec<_> = world.team(Side::Left).agents().map(|a| a.id).collect();
        assert_eq!(ids, vec![AgentId(2)]);
        assert_eq!(world.team(Side::Left).agent(AgentId(2)).unwrap().root, vec![1]);
    }

    #[test]
    fn teams_follow_announced_names() {
        let mut world = WorldModel::new();
        assert_eq!(world.team(Side::Left).name(), None);
        world.apply(&full(&[("Left", 1, 0.0)], 0));
        assert_eq!(world.team(Side::Left).name(), Some("a"));
        assert_eq!(world.team(Side::Right).name(), Some("b"));

        world.apply(&DecodedCycle::decode("((team_right c))(RDS 0 1)()").unwrap());
        assert_eq!(world.team(Side::Right).name(), Some("c"));
        assert_eq!(world.team(Side::Left).name(), Some("a"));

        world.reset();
        assert_eq!(world.team(Side::Right).name(), None);
    }

    #[test]
    fn diff_moves_agent() {
        let mut world = WorldModel::new();
        world.apply(&full(&[("Left", 5, 0.0)], 0));
        world.apply(
            &DecodedCycle::decode(
                "((time 0.2))(RDS 0 1)((nd) (nd (SLT 1 0 0 0 0 1 0 0 0 0 1 0 3 1 0.5 1)))",
            )
            .unwrap(),
        );
        let pos = world.team(Side::Left).agent(AgentId(5)).unwrap().position.unwrap();
        assert!((pos.x + 3.0).abs() < 1e-5);
        assert!((pos.z - 1.0).abs() < 1e-5);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl WorldObserver for Recorder {
        fn play_state_changed(&mut self, state: &GameState) {
            // Scores and play mode must already agree when this fires.
            self.0.lock().push(format!(
                "play {} {:?}",
                state.score(Side::Left),
                state.play_mode_name()
            ));
        }

        fn time_changed(&mut self, state: &GameState) {
            self.0.lock().push(format!("time {}", state.time().seconds()));
        }

        fn scene_graph_replaced(&mut self, world: &dyn WorldModelState) {
            self.0
                .lock()
                .push(format!("graph {}", world.team(Side::Left).len()));
        }

        fn world_reset(&mut self) {
            self.0.lock().push("reset".to_string());
        }
    }

    #[test]
    fn observers_see_whole_cycles() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut world = WorldModel::new();
        let id = world.add_observer(Box::new(Recorder(events.clone())));

        world.apply(&full(&[("Left", 1, 0.0)], 1));
        world.apply(&DecodedCycle::decode("((time 4))(RDS 0 1)()").unwrap());
        world.reset();

        assert_eq!(
            *events.lock(),
            vec![
                "play 1 Some(\"PlayOn\")".to_string(),
                "graph 1".to_string(),
                "time 4".to_string(),
                "reset".to_string(),
            ]
        );

        assert!(world.remove_observer(id));
        world.apply(&DecodedCycle::decode("((time 5))(RDS 0 1)()").unwrap());
        assert_eq!(events.lock().len(), 4);
    }

    #[test]
    fn reset_clears_agents_and_checkpoint_restores() {
        let mut world = WorldModel::new();
        world.apply(&full(&[("Right", 7, 1.0)], 2));
        let checkpoint = world.checkpoint();

        world.reset();
        assert!(world.team(Side::Right).is_empty());
        assert!(world.scene_graph().is_none());
        assert_eq!(world.game_state().score(Side::Left), 0);

        world.restore(checkpoint.clone());
        assert_eq!(world.checkpoint(), checkpoint);
        assert_eq!(world.team(Side::Right).len(), 1);
    }
}
