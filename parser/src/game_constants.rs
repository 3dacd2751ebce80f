use std::collections::BTreeMap;

use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString};

/// Highest uniform number a team may field.
pub const MAX_AGENTS: u8 = 11;

/// The `$monitorLoggerStep` default of the server: one logged cycle every 0.2s.
pub const DEFAULT_SECONDS_PER_FRAME: f32 = 0.2;

/// Logs recorded together with drawing commands are written every simulation step.
pub const DRAW_LOG_SECONDS_PER_FRAME: f32 = 0.04;

/// Frame count assumed for a log before it has been surveyed.
pub const ESTIMATED_FRAMES: usize = 1700;

/// Name suffix of the monitor log inside a tar archive.
pub const LOG_ENTRY_SUFFIX: &str = "sparkmonitor.log";

/// How long a foul stays active, in game seconds.
pub const FOUL_DISPLAY_SECONDS: f32 = 8.0;

/// Two fouls of the same kind by the same agent closer than this are one foul.
pub const FOUL_DEDUP_SECONDS: f32 = 1.0;

/// Field dimensions and rule parameters the server may announce.
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
    AsRefStr,
    EnumString,
    EnumIter,
)]
pub enum Measure {
    FieldLength,
    FieldWidth,
    FieldHeight,
    GoalWidth,
    GoalDepth,
    GoalHeight,
    FreeKickDistance,
    WaitBeforeKickOff,
    AgentRadius,
    BallRadius,
    BallMass,
    RuleGoalPauseTime,
    RuleKickInPauseTime,
    RuleHalfTime,
    PassModeMinOppBallDist,
    PassModeDuration,
}

impl Measure {
    /// Value used until the server reports one.
    pub fn default_value(self) -> f32 {
        match self {
            Measure::FieldLength => 30.0,
            Measure::FieldWidth => 20.0,
            Measure::FieldHeight => 40.0,
            Measure::GoalWidth => 2.1,
            Measure::GoalDepth => 0.6,
            Measure::GoalHeight => 0.8,
            Measure::FreeKickDistance => 2.0,
            Measure::WaitBeforeKickOff => 30.0,
            Measure::AgentRadius => 0.4,
            Measure::BallRadius => 0.042,
            Measure::BallMass => 0.026,
            Measure::RuleGoalPauseTime => 3.0,
            Measure::RuleKickInPauseTime => 1.0,
            Measure::RuleHalfTime => 300.0,
            // Servers up to 0.7.2 never report these.
            Measure::PassModeMinOppBallDist => 1.0,
            Measure::PassModeDuration => 4.0,
        }
    }

    pub fn is_pass_mode(self) -> bool {
        matches!(
            self,
            Measure::PassModeMinOppBallDist | Measure::PassModeDuration
        )
    }
}

/// Measures currently in effect: server-reported values over defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameConstants {
    values: BTreeMap<Measure, f32>,
}

impl GameConstants {
    /// Hardcoded defaults.
    pub fn defaults() -> Self {
        Self {
            values: Measure::iter().map(|m| (m, m.default_value())).collect(),
        }
    }

    pub fn get(&self, measure: Measure) -> f32 {
        self.values
            .get(&measure)
            .copied()
            .unwrap_or_else(|| measure.default_value())
    }

    pub fn set(&mut self, measure: Measure, value: f32) {
        self.values.insert(measure, value);
    }

    pub fn field_length(&self) -> f32 {
        self.get(Measure::FieldLength)
    }

    pub fn field_width(&self) -> f32 {
        self.get(Measure::FieldWidth)
    }

    pub fn goal_width(&self) -> f32 {
        self.get(Measure::GoalWidth)
    }

    pub fn half_time(&self) -> f32 {
        self.get(Measure::RuleHalfTime)
    }

    pub fn goal_pause_time(&self) -> f32 {
        self.get(Measure::RuleGoalPauseTime)
    }
}

impl Default for GameConstants {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn reported_values_override_defaults() {
        let mut constants = GameConstants::defaults();
        assert_eq!(constants.field_length(), 30.0);
        constants.set(Measure::FieldLength, 18.0);
        assert_eq!(constants.field_length(), 18.0);
        assert_eq!(constants.field_width(), 20.0);
    }

    #[test]
    fn measure_names_match_wire_names() {
        assert_eq!(
            Measure::from_str("RuleKickInPauseTime").unwrap(),
            Measure::RuleKickInPauseTime
        );
        assert_eq!(Measure::PassModeDuration.as_ref(), "PassModeDuration");
        assert!(Measure::from_str("FieldDepth").is_err());
    }
}
