use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Uniform number of an agent within its team. Valid ids are `1..=MAX_AGENTS`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(pub u8);

impl AgentId {
    pub fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for AgentId {
    fn from(v: u8) -> Self {
        AgentId(v)
    }
}

/// Which half of the field a team defends. The wire spells these `Left`/`Right`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Suffix used by scene-graph materials and play-mode names.
    pub fn lower(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// An agent as addressed by the drawing protocol: one byte, `team * 128 + (id - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AgentRef {
    pub side: Side,
    pub id: AgentId,
}

impl AgentRef {
    pub fn from_byte(b: u8) -> Self {
        let side = if b >= 128 { Side::Right } else { Side::Left };
        AgentRef {
            side,
            id: AgentId(b % 128 + 1),
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.side.index() as u8) * 128 + self.id.0.saturating_sub(1)
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.side, self.id)
    }
}

/// Position of a cycle within a log, counted from 0.
pub type FrameIndex = usize;

/// Simulation time in seconds as reported by the server's `time` field.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameTime(pub f32);

impl GameTime {
    pub fn seconds(self) -> f32 {
        self.0
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_secs_f32(self.0.max(0.0))
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.max(0.0);
        let minutes = (total / 60.0).floor() as u32;
        write!(f, "{:02}:{:05.2}", minutes, total - minutes as f32 * 60.0)
    }
}

impl std::ops::Add<f32> for GameTime {
    type Output = GameTime;
    fn add(self, rhs: f32) -> GameTime {
        GameTime(self.0 + rhs)
    }
}

impl std::ops::Sub for GameTime {
    type Output = f32;
    fn sub(self, rhs: GameTime) -> f32 {
        self.0 - rhs.0
    }
}
