use std::collections::BTreeMap;
use std::str::FromStr;

use glam::{Mat4, Vec3};
use serde::Serialize;
use strum_macros::{AsRefStr, EnumString};
use tracing::warn;

use crate::analyzer::decoder::{FoulType, GameStateChanges, GameStateUpdate};
use crate::game_constants::{
    FOUL_DEDUP_SECONDS, FOUL_DISPLAY_SECONDS, GameConstants, Measure,
};
use crate::scene_graph::NodePath;
use crate::types::{AgentId, GameTime, Side};

/// Game phase as named by the server's `play_modes` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, AsRefStr, EnumString)]
pub enum PlayMode {
    #[default]
    BeforeKickOff,
    #[strum(serialize = "KickOff_Left")]
    KickOffLeft,
    #[strum(serialize = "KickOff_Right")]
    KickOffRight,
    PlayOn,
    #[strum(serialize = "KickIn_Left")]
    KickInLeft,
    #[strum(serialize = "KickIn_Right")]
    KickInRight,
    #[strum(serialize = "corner_kick_left")]
    CornerKickLeft,
    #[strum(serialize = "corner_kick_right")]
    CornerKickRight,
    #[strum(serialize = "goal_kick_left")]
    GoalKickLeft,
    #[strum(serialize = "goal_kick_right")]
    GoalKickRight,
    #[strum(serialize = "offside_left")]
    OffsideLeft,
    #[strum(serialize = "offside_right")]
    OffsideRight,
    GameOver,
    #[strum(serialize = "Goal_Left")]
    GoalLeft,
    #[strum(serialize = "Goal_Right")]
    GoalRight,
    #[strum(serialize = "free_kick_left")]
    FreeKickLeft,
    #[strum(serialize = "free_kick_right")]
    FreeKickRight,
    #[strum(serialize = "direct_free_kick_left")]
    DirectFreeKickLeft,
    #[strum(serialize = "direct_free_kick_right")]
    DirectFreeKickRight,
    #[strum(serialize = "pass_left")]
    PassLeft,
    #[strum(serialize = "pass_right")]
    PassRight,
    /// A mode this client does not know, kept under its wire name.
    #[strum(default)]
    Unknown(String),
}

impl PlayMode {
    /// Side that scored, for the two goal modes.
    pub fn goal_for(&self) -> Option<Side> {
        match self {
            PlayMode::GoalLeft => Some(Side::Left),
            PlayMode::GoalRight => Some(Side::Right),
            _ => None,
        }
    }

    /// Game time does not advance in these modes.
    pub fn is_time_stopped(&self) -> bool {
        matches!(self, PlayMode::BeforeKickOff | PlayMode::GameOver)
    }
}

/// One entry of the play-mode history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayModeChange {
    pub time: GameTime,
    pub mode: String,
}

/// A foul that is still being displayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Foul {
    pub index: u32,
    pub foul_type: FoulType,
    pub side: Option<Side>,
    pub agent: AgentId,
    pub time: GameTime,
}

/// Match state as reported by the game-state section of each message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameState {
    constants: GameConstants,
    pass_mode_reported: bool,
    play_modes: Vec<String>,
    play_mode_name: Option<String>,
    play_mode: PlayMode,
    play_mode_just_changed: bool,
    play_mode_history: Vec<PlayModeChange>,
    team_left: Option<String>,
    team_right: Option<String>,
    score_left: u32,
    score_right: u32,
    time: GameTime,
    half: u32,
    pass_mode_score_wait: [f32; 2],
    fouls: Vec<Foul>,
    initialized: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            constants: GameConstants::defaults(),
            pass_mode_reported: false,
            play_modes: Vec::new(),
            play_mode_name: None,
            play_mode: PlayMode::default(),
            play_mode_just_changed: false,
            play_mode_history: Vec::new(),
            team_left: None,
            team_right: None,
            score_left: 0,
            score_right: 0,
            time: GameTime::default(),
            half: 0,
            pass_mode_score_wait: [0.0; 2],
            fouls: Vec::new(),
            initialized: false,
        }
    }

    /// Clears per-match state. Measures announced by the server survive, except
    /// for the pass-mode ones which older servers never send.
    pub fn reset(&mut self) {
        let mut constants = self.constants.clone();
        constants.set(
            Measure::PassModeMinOppBallDist,
            Measure::PassModeMinOppBallDist.default_value(),
        );
        constants.set(
            Measure::PassModeDuration,
            Measure::PassModeDuration.default_value(),
        );
        *self = GameState {
            constants,
            ..GameState::new()
        };
    }

    /// Applies one cycle's fields. Returns which categories changed.
    pub(crate) fn apply(&mut self, update: &GameStateUpdate) -> GameStateChanges {
        let previous_mode = self.play_mode_name.clone();

        for (measure, value) in &update.measures {
            if measure.is_pass_mode() {
                self.pass_mode_reported = true;
            }
            self.constants.set(*measure, *value);
        }
        if let Some(modes) = &update.play_modes {
            self.play_modes = modes.clone();
        }
        if let Some(v) = update.time {
            self.time = GameTime(v);
        }
        if let Some(v) = update.half {
            self.half = v;
        }
        if let Some(v) = &update.team_left {
            self.team_left = Some(v.clone());
        }
        if let Some(v) = &update.team_right {
            self.team_right = Some(v.clone());
        }
        if let Some(v) = update.score_left {
            self.score_left = v;
        }
        if let Some(v) = update.score_right {
            self.score_right = v;
        }
        if let Some(idx) = update.play_mode {
            match self.play_modes.get(idx) {
                Some(name) => {
                    self.play_mode = PlayMode::from_str(name).unwrap_or_default();
                    self.play_mode_name = Some(name.clone());
                }
                None => warn!(
                    "play mode index {idx} outside table of {} modes",
                    self.play_modes.len()
                ),
            }
        }

        // Pass-mode waits are only sent while counting down.
        self.pass_mode_score_wait = [
            update.pass_mode_score_wait_left.unwrap_or(0.0),
            update.pass_mode_score_wait_right.unwrap_or(0.0),
        ];
        if update.pass_mode_score_wait_left.is_some() || update.pass_mode_score_wait_right.is_some()
        {
            self.pass_mode_reported = true;
        }

        self.expire_fouls();
        for record in &update.fouls {
            let foul = Foul {
                index: record.index,
                foul_type: record.foul_type,
                side: match record.team {
                    1 => Some(Side::Left),
                    2 => Some(Side::Right),
                    _ => None,
                },
                agent: AgentId(record.agent),
                time: self.time,
            };
            self.add_foul(foul);
        }

        self.play_mode_just_changed = previous_mode.is_none() || previous_mode != self.play_mode_name;
        if self.play_mode_just_changed {
            if let Some(name) = &self.play_mode_name {
                self.play_mode_history.push(PlayModeChange {
                    time: self.time,
                    mode: name.clone(),
                });
                if self.play_mode_history.len() > 2 {
                    self.play_mode_history.remove(0);
                }
            }
        }
        self.initialized = true;

        update.changes()
    }

    fn expire_fouls(&mut self) {
        let now = self.time;
        let stopped = self.play_mode.is_time_stopped();
        self.fouls.retain(|f| {
            let age = now - f.time;
            // A negative age means playback moved backwards past the foul.
            age >= 0.0 && age < FOUL_DISPLAY_SECONDS && !(stopped && age >= FOUL_DEDUP_SECONDS)
        });
    }

    fn add_foul(&mut self, foul: Foul) {
        let duplicate = self.fouls.iter().any(|f| {
            f.foul_type == foul.foul_type
                && f.side == foul.side
                && f.agent == foul.agent
                && (foul.time - f.time).abs() < FOUL_DEDUP_SECONDS
        });
        if !duplicate {
            self.fouls.push(foul);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn constants(&self) -> &GameConstants {
        &self.constants
    }

    pub fn measure(&self, measure: Measure) -> f32 {
        self.constants.get(measure)
    }

    pub fn pass_mode_reported(&self) -> bool {
        self.pass_mode_reported
    }

    pub fn play_modes(&self) -> &[String] {
        &self.play_modes
    }

    pub fn play_mode(&self) -> &PlayMode {
        &self.play_mode
    }

    /// Wire name of the current play mode, if one was announced.
    pub fn play_mode_name(&self) -> Option<&str> {
        self.play_mode_name.as_deref()
    }

    pub fn play_mode_just_changed(&self) -> bool {
        self.play_mode_just_changed
    }

    /// The last two play modes, oldest first.
    pub fn play_mode_history(&self) -> &[PlayModeChange] {
        &self.play_mode_history
    }

    pub fn team_name(&self, side: Side) -> Option<&str> {
        match side {
            Side::Left => self.team_left.as_deref(),
            Side::Right => self.team_right.as_deref(),
        }
    }

    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.score_left,
            Side::Right => self.score_right,
        }
    }

    pub fn time(&self) -> GameTime {
        self.time
    }

    pub fn half(&self) -> u32 {
        self.half
    }

    pub fn pass_mode_score_wait(&self, side: Side) -> f32 {
        self.pass_mode_score_wait[side.index()]
    }

    pub fn fouls(&self) -> &[Foul] {
        &self.fouls
    }
}

/// Transform of one body segment (one mesh) of an agent, in viewer coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub model: String,
    pub transform: Mat4,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub id: AgentId,
    /// Side of the team slot the agent was found in. Fixed for the agent's
    /// lifetime; the team itself is looked up through the world by this side.
    pub side: Side,
    /// Path of the agent's subtree root in the scene graph.
    pub root: NodePath,
    pub segments: Vec<Segment>,
    pub head: Option<Mat4>,
    pub torso_direction: Option<Vec3>,
    pub position: Option<Vec3>,
}

impl Agent {
    pub(crate) fn new(id: AgentId, side: Side, root: NodePath) -> Self {
        Self {
            id,
            side,
            root,
            segments: Vec::new(),
            head: None,
            torso_direction: None,
            position: None,
        }
    }

    pub fn segment(&self, suffix: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.model.ends_with(suffix))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Team {
    side: Side,
    name: Option<String>,
    agents: BTreeMap<AgentId, Agent>,
}

impl Team {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            name: None,
            agents: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Name last announced by the server for this side.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: Option<&str>) {
        if self.name.as_deref() != name {
            self.name = name.map(str::to_string);
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Agents ordered by uniform number.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub(crate) fn agents_mut(&mut self) -> &mut BTreeMap<AgentId, Agent> {
        &mut self.agents
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ball {
    pub path: Option<NodePath>,
    pub position: Option<Vec3>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::decoder::FoulRecord;

    fn modes() -> Vec<String> {
        ["BeforeKickOff", "KickOff_Left", "PlayOn", "Goal_Left", "weird_mode"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn play_mode_resolves_through_table() {
        let mut gs = GameState::new();
        gs.apply(&GameStateUpdate {
            play_modes: Some(modes()),
            play_mode: Some(3),
            ..Default::default()
        });
        assert_eq!(gs.play_mode(), &PlayMode::GoalLeft);
        assert_eq!(gs.play_mode().goal_for(), Some(Side::Left));
        assert!(gs.play_mode_just_changed());

        gs.apply(&GameStateUpdate {
            play_mode: Some(4),
            ..Default::default()
        });
        assert_eq!(gs.play_mode(), &PlayMode::Unknown("weird_mode".to_string()));
    }

    #[test]
    fn absent_fields_keep_previous_values() {
        let mut gs = GameState::new();
        gs.apply(&GameStateUpdate {
            team_left: Some("magma".into()),
            score_left: Some(2),
            time: Some(10.0),
            ..Default::default()
        });
        let changes = gs.apply(&GameStateUpdate {
            time: Some(10.2),
            ..Default::default()
        });
        assert!(changes.time && !changes.play_state);
        assert_eq!(gs.team_name(Side::Left), Some("magma"));
        assert_eq!(gs.score(Side::Left), 2);
        assert_eq!(gs.time(), GameTime(10.2));
    }

    #[test]
    fn history_keeps_last_two_modes() {
        let mut gs = GameState::new();
        gs.apply(&GameStateUpdate {
            play_modes: Some(modes()),
            play_mode: Some(0),
            ..Default::default()
        });
        for (time, mode) in [(1.0, 1), (2.0, 2), (3.0, 2)] {
            gs.apply(&GameStateUpdate {
                time: Some(time),
                play_mode: Some(mode),
                ..Default::default()
            });
        }
        assert!(!gs.play_mode_just_changed());
        let history: Vec<_> = gs.play_mode_history().iter().map(|h| h.mode.as_str()).collect();
        assert_eq!(history, vec!["KickOff_Left", "PlayOn"]);
    }

    #[test]
    fn fouls_deduplicate_and_expire() {
        let mut gs = GameState::new();
        let foul = FoulRecord {
            index: 1,
            foul_type: FoulType::Charging,
            team: 2,
            agent: 4,
        };
        gs.apply(&GameStateUpdate {
            time: Some(20.0),
            fouls: vec![foul.clone()],
            ..Default::default()
        });
        gs.apply(&GameStateUpdate {
            time: Some(20.5),
            fouls: vec![foul],
            ..Default::default()
        });
        assert_eq!(gs.fouls().len(), 1);
        assert_eq!(gs.fouls()[0].side, Some(Side::Right));

        gs.apply(&GameStateUpdate {
            time: Some(29.0),
            ..Default::default()
        });
        assert!(gs.fouls().is_empty());
    }

    #[test]
    fn reset_restores_pass_mode_defaults_only() {
        let mut gs = GameState::new();
        let mut measures = BTreeMap::new();
        measures.insert(Measure::FieldLength, 18.0);
        measures.insert(Measure::PassModeDuration, 9.0);
        gs.apply(&GameStateUpdate {
            measures,
            score_right: Some(3),
            ..Default::default()
        });
        gs.reset();
        assert_eq!(gs.score(Side::Right), 0);
        assert_eq!(gs.measure(Measure::FieldLength), 18.0);
        assert_eq!(gs.measure(Measure::PassModeDuration), 4.0);
        assert!(!gs.is_initialized());
    }
}
