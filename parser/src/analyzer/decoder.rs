use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use glam::{Mat4, Vec3};
use kinded::Kinded;
use serde::Serialize;
use strum_macros::{AsRefStr, FromRepr};
use tracing::{debug, trace, warn};

use crate::game_constants::Measure;
use crate::scene_graph::{NodeKind, NodeOp, NodeUpdate};
use crate::sexp::SExp;
use crate::{Error, Result};

/// Infraction categories reported through `(foul idx type team agent)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, FromRepr)]
#[repr(u8)]
pub enum FoulType {
    Crowding = 0,
    Touching = 1,
    IllegalDefence = 2,
    IllegalAttack = 3,
    Incapable = 4,
    KickOff = 5,
    Charging = 6,
    SelfCollision = 7,
    BallHolding = 8,
}

/// A foul as it appears on the wire. `team` is 1 for left and 2 for right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoulRecord {
    pub index: u32,
    pub foul_type: FoulType,
    pub team: u8,
    pub agent: u8,
}

/// Game-state fields present in one cycle. Absent fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameStateUpdate {
    pub measures: BTreeMap<Measure, f32>,
    pub play_modes: Option<Vec<String>>,
    /// Index into the most recent `play_modes` table.
    pub play_mode: Option<usize>,
    pub team_left: Option<String>,
    pub team_right: Option<String>,
    pub score_left: Option<u32>,
    pub score_right: Option<u32>,
    pub time: Option<f32>,
    pub half: Option<u32>,
    pub pass_mode_score_wait_left: Option<f32>,
    pub pass_mode_score_wait_right: Option<f32>,
    pub fouls: Vec<FoulRecord>,
}

impl GameStateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == GameStateUpdate::default()
    }

    fn has_play_state(&self) -> bool {
        self.play_modes.is_some()
            || self.play_mode.is_some()
            || self.team_left.is_some()
            || self.team_right.is_some()
            || self.score_left.is_some()
            || self.score_right.is_some()
    }

    fn has_time(&self) -> bool {
        self.time.is_some()
            || self.half.is_some()
            || self.pass_mode_score_wait_left.is_some()
            || self.pass_mode_score_wait_right.is_some()
    }

    /// Which observer categories this update touches.
    pub fn changes(&self) -> GameStateChanges {
        GameStateChanges {
            play_state: self.has_play_state(),
            time: self.has_time(),
            measures: !self.measures.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameStateChanges {
    pub play_state: bool,
    pub time: bool,
    pub measures: bool,
}

impl GameStateChanges {
    pub fn any(self) -> bool {
        self.play_state || self.time || self.measures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Kinded)]
#[kinded(derive(Serialize))]
pub enum SceneUpdate {
    /// `RSG`: a complete graph replacing the current one.
    Full(Vec<NodeUpdate>),
    /// `RDS`: positional updates to the current graph.
    Diff(Vec<NodeUpdate>),
}

impl SceneUpdate {
    pub fn nodes(&self) -> &[NodeUpdate] {
        match self {
            SceneUpdate::Full(nodes) | SceneUpdate::Diff(nodes) => nodes,
        }
    }
}

/// One monitor message, fully decoded but not yet applied to a world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedCycle {
    pub game_state: GameStateUpdate,
    pub version: (u32, u32),
    pub scene: SceneUpdate,
    /// Number of recognised fields dropped because their values did not parse.
    pub skipped_fields: usize,
}

impl DecodedCycle {
    /// Decodes `(<game state>)(RSG|RDS major minor)(<scene graph>)`.
    pub fn decode(message: &str) -> Result<DecodedCycle> {
        let expressions = SExp::parse_all(message)?;
        if expressions.len() < 3 {
            return Err(Error::malformed(format!(
                "expected 3 top-level expressions, found {}",
                expressions.len()
            )));
        }

        let mut skipped_fields = 0;
        let game_state = decode_game_state(&expressions[0], &mut skipped_fields);

        let header = &expressions[1];
        let version = (
            header.args().first().and_then(|v| v.parse().ok()).unwrap_or(0),
            header.args().get(1).and_then(|v| v.parse().ok()).unwrap_or(0),
        );
        let full = match header.name() {
            Some("RSG") => true,
            Some("RDS") => false,
            other => {
                return Err(Error::malformed(format!(
                    "unknown scene graph header {other:?}"
                )));
            }
        };

        let nodes = decode_nodes(&expressions[2], full, &mut skipped_fields);
        let scene = if full {
            SceneUpdate::Full(nodes)
        } else {
            SceneUpdate::Diff(nodes)
        };

        trace!(
            "decoded {:?} cycle with {} scene nodes",
            scene.kind(),
            scene.nodes().len()
        );

        Ok(DecodedCycle {
            game_state,
            version,
            scene,
            skipped_fields,
        })
    }

    pub fn is_full_state(&self) -> bool {
        matches!(self.scene, SceneUpdate::Full(_))
    }

    /// Writes the understood fields back out in wire format.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        encode_game_state(&self.game_state, &mut out);
        let header = if self.is_full_state() { "RSG" } else { "RDS" };
        let _ = write!(out, "({header} {} {})", self.version.0, self.version.1);
        out.push('(');
        for (i, node) in self.scene.nodes().iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            encode_node(node, &mut out);
        }
        out.push(')');
        out
    }
}

fn parse_arg<T: FromStr>(exp: &SExp<'_>, idx: usize) -> Option<T> {
    exp.args().get(idx).and_then(|v| v.parse::<T>().ok())
}

fn parse_finite(exp: &SExp<'_>, idx: usize) -> Option<f32> {
    parse_arg::<f32>(exp, idx).filter(|v| v.is_finite())
}

fn decode_game_state(exp: &SExp<'_>, skipped: &mut usize) -> GameStateUpdate {
    let mut update = GameStateUpdate::default();

    for field in exp.children() {
        let Some(name) = field.name() else {
            continue;
        };

        // Evaluates to `true` when the field was understood and parsed.
        let parsed = match name {
            "play_modes" => {
                update.play_modes = Some(field.args().iter().map(|s| s.to_string()).collect());
                true
            }
            "play_mode" => parse_arg(field, 0).map(|v| update.play_mode = Some(v)).is_some(),
            "team_left" => field
                .args()
                .first()
                .map(|v| update.team_left = Some(v.to_string()))
                .is_some(),
            "team_right" => field
                .args()
                .first()
                .map(|v| update.team_right = Some(v.to_string()))
                .is_some(),
            "score_left" => parse_arg(field, 0).map(|v| update.score_left = Some(v)).is_some(),
            "score_right" => parse_arg(field, 0)
                .map(|v| update.score_right = Some(v))
                .is_some(),
            "time" => parse_finite(field, 0).map(|v| update.time = Some(v)).is_some(),
            "half" => parse_arg(field, 0).map(|v| update.half = Some(v)).is_some(),
            "pass_mode_score_wait_left" => parse_finite(field, 0)
                .map(|v| update.pass_mode_score_wait_left = Some(v))
                .is_some(),
            "pass_mode_score_wait_right" => parse_finite(field, 0)
                .map(|v| update.pass_mode_score_wait_right = Some(v))
                .is_some(),
            "foul" => decode_foul(field)
                .map(|foul| update.fouls.push(foul))
                .is_some(),
            other => match Measure::from_str(other) {
                Ok(measure) => parse_finite(field, 0)
                    .map(|v| {
                        update.measures.insert(measure, v);
                    })
                    .is_some(),
                Err(_) => {
                    debug!("ignoring unknown game state field {other}");
                    true
                }
            },
        };

        if !parsed {
            *skipped += 1;
            warn!("skipping game state field with bad value: {field}");
        }
    }

    update
}

fn decode_foul(field: &SExp<'_>) -> Option<FoulRecord> {
    Some(FoulRecord {
        index: parse_arg(field, 0)?,
        foul_type: FoulType::from_repr(parse_arg(field, 1)?)?,
        team: parse_arg(field, 2)?,
        agent: parse_arg(field, 3)?,
    })
}

fn decode_nodes(exp: &SExp<'_>, full: bool, skipped: &mut usize) -> Vec<NodeUpdate> {
    exp.children()
        .iter()
        .filter(|c| c.name() == Some("nd"))
        .map(|c| decode_node(c, full, skipped))
        .collect()
}

fn decode_node(exp: &SExp<'_>, full: bool, skipped: &mut usize) -> NodeUpdate {
    let kind = if full {
        let declared = exp.args().first().copied().unwrap_or_default();
        Some(NodeKind::from_str(declared).unwrap_or_else(|_| {
            debug!("treating unknown node type {declared:?} as a plain group");
            NodeKind::Other
        }))
    } else {
        None
    };

    let mut ops = Vec::new();
    for child in exp.children() {
        let op = match child.name() {
            Some("nd") | None => continue,
            Some("SLT") => decode_matrix(child).map(NodeOp::SetLocalTransform),
            Some("load") => child
                .args()
                .first()
                .map(|model| NodeOp::Load(model.to_string())),
            Some("sSc") => decode_vec3(child).map(NodeOp::Scale),
            Some("setVisible") => child.args().first().map(|v| NodeOp::Visible(*v == "1")),
            Some("setTransparent") => Some(NodeOp::Transparent),
            Some("resetMaterials") => Some(NodeOp::Materials(
                child.args().iter().map(|m| m.to_string()).collect(),
            )),
            Some(_) => continue,
        };
        match op {
            Some(op) => ops.push(op),
            None => {
                *skipped += 1;
                warn!("skipping node operation with bad value: {child}");
            }
        }
    }

    NodeUpdate {
        kind,
        ops,
        children: decode_nodes(exp, full, skipped),
    }
}

fn decode_vec3(exp: &SExp<'_>) -> Option<Vec3> {
    Some(Vec3::new(
        parse_finite(exp, 0)?,
        parse_finite(exp, 1)?,
        parse_finite(exp, 2)?,
    ))
}

fn decode_matrix(exp: &SExp<'_>) -> Option<Mat4> {
    let mut values = [0f32; 16];
    for (i, value) in values.iter_mut().enumerate() {
        *value = parse_finite(exp, i)?;
    }
    Some(Mat4::from_cols_array(&values))
}

fn encode_game_state(update: &GameStateUpdate, out: &mut String) {
    out.push('(');
    for (measure, value) in &update.measures {
        let _ = write!(out, "({} {value})", measure.as_ref());
    }
    if let Some(modes) = &update.play_modes {
        let _ = write!(out, "(play_modes {})", modes.join(" "));
    }
    if let Some(v) = update.time {
        let _ = write!(out, "(time {v})");
    }
    if let Some(v) = update.half {
        let _ = write!(out, "(half {v})");
    }
    if let Some(v) = &update.team_left {
        let _ = write!(out, "(team_left {v})");
    }
    if let Some(v) = &update.team_right {
        let _ = write!(out, "(team_right {v})");
    }
    if let Some(v) = update.score_left {
        let _ = write!(out, "(score_left {v})");
    }
    if let Some(v) = update.score_right {
        let _ = write!(out, "(score_right {v})");
    }
    if let Some(v) = update.play_mode {
        let _ = write!(out, "(play_mode {v})");
    }
    if let Some(v) = update.pass_mode_score_wait_left {
        let _ = write!(out, "(pass_mode_score_wait_left {v})");
    }
    if let Some(v) = update.pass_mode_score_wait_right {
        let _ = write!(out, "(pass_mode_score_wait_right {v})");
    }
    for foul in &update.fouls {
        let _ = write!(
            out,
            "(foul {} {} {} {})",
            foul.index, foul.foul_type as u8, foul.team, foul.agent
        );
    }
    out.push(')');
}

fn encode_node(node: &NodeUpdate, out: &mut String) {
    out.push_str("(nd");
    if let Some(kind) = node.kind {
        let _ = write!(out, " {}", kind.as_ref());
    }
    for op in &node.ops {
        match op {
            NodeOp::SetLocalTransform(m) => {
                out.push_str(" (SLT");
                for v in m.to_cols_array() {
                    let _ = write!(out, " {v}");
                }
                out.push(')');
            }
            NodeOp::Load(model) => {
                let _ = write!(out, " (load {model})");
            }
            NodeOp::Scale(s) => {
                let _ = write!(out, " (sSc {} {} {})", s.x, s.y, s.z);
            }
            NodeOp::Visible(v) => {
                let _ = write!(out, " (setVisible {})", u8::from(*v));
            }
            NodeOp::Transparent => out.push_str(" (setTransparent)"),
            NodeOp::Materials(mats) => {
                let _ = write!(out, " (resetMaterials {})", mats.join(" "));
            }
        }
    }
    for child in &node.children {
        out.push(' ');
        encode_node(child, out);
    }
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const FULL: &str = "((FieldLength 30)(FieldWidth 20)(play_modes BeforeKickOff KickOff_Left PlayOn)\
        (time 12.5)(half 1)(team_left magma)(team_right apollo)(score_left 0)(score_right 2)(play_mode 2))\
        (RSG 0 1)\
        ((nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 3 4 0.5 1) \
            (nd StaticMesh (load models/soccerball.obj) (sSc 0.042 0.042 0.042) (setVisible 1) (resetMaterials soccerball_rcs-soccerball.png)))\
         (nd Light (setDiffuse 1 1 1 1)))";

    #[test]
    fn decodes_game_state_and_full_graph() {
        let cycle = DecodedCycle::decode(FULL).unwrap();
        let gs = &cycle.game_state;
        assert_eq!(gs.measures.get(&Measure::FieldLength), Some(&30.0));
        assert_eq!(gs.play_modes.as_ref().map(Vec::len), Some(3));
        assert_eq!(gs.play_mode, Some(2));
        assert_eq!(gs.team_left.as_deref(), Some("magma"));
        assert_eq!(gs.score_right, Some(2));
        assert_eq!(gs.time, Some(12.5));
        assert!(cycle.is_full_state());
        assert_eq!(cycle.version, (0, 1));

        let nodes = cycle.scene.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, Some(NodeKind::Transform));
        assert_eq!(nodes[1].kind, Some(NodeKind::Light));
        let NodeOp::SetLocalTransform(m) = &nodes[0].ops[0] else {
            panic!("expected a transform op");
        };
        assert_eq!(m.w_axis.truncate(), Vec3::new(3.0, 4.0, 0.5));
        assert_eq!(nodes[0].children[0].kind, Some(NodeKind::StaticMesh));
        assert_eq!(nodes[0].children[0].ops.len(), 4);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let cycle =
            DecodedCycle::decode("((time 3)(ball_owner 7)(weather rain))(RDS 0 1)()").unwrap();
        assert_eq!(cycle.game_state.time, Some(3.0));
        assert_eq!(cycle.skipped_fields, 0);
        assert!(!cycle.is_full_state());
    }

    #[test]
    fn runaway_nesting_fails_only_the_cycle() {
        let depth = 30_000;
        let message = format!("(){}{}(RDS 0 1)()", "(".repeat(depth), ")".repeat(depth));
        let handle = std::thread::spawn(move || DecodedCycle::decode(&message).map(|_| ()));
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedMessage(_)));
    }

    #[test]
    fn bad_numbers_skip_only_that_field() {
        let cycle =
            DecodedCycle::decode("((time abc)(score_left 1)(half x2))(RDS 0 1)((nd (SLT 1 2)))")
                .unwrap();
        assert_eq!(cycle.game_state.time, None);
        assert_eq!(cycle.game_state.score_left, Some(1));
        assert_eq!(cycle.game_state.half, None);
        // two bad fields plus the short matrix
        assert_eq!(cycle.skipped_fields, 3);
        assert!(cycle.scene.nodes()[0].ops.is_empty());
    }

    #[test]
    fn non_finite_matrix_is_dropped() {
        let cycle = DecodedCycle::decode(
            "()(RDS 0 1)((nd (SLT 1 0 0 0 0 1 0 0 0 0 1 0 nan 0 0 1)))",
        )
        .unwrap();
        assert!(cycle.scene.nodes()[0].ops.is_empty());
    }

    #[test]
    fn structural_errors_fail_the_cycle() {
        for msg in [
            "((time 1)(RDS 0 1)()",
            "((time 1))(RDS 0 1)",
            "((time 1))(XYZ 0 1)()",
        ] {
            let err = DecodedCycle::decode(msg).unwrap_err();
            assert!(matches!(err.kind, ErrorKind::MalformedMessage(_)), "{msg}");
        }
    }

    #[test]
    fn fouls_decode_with_type() {
        let cycle = DecodedCycle::decode("((foul 3 8 1 7)(foul 4 42 1 7))(RDS 0 1)()").unwrap();
        assert_eq!(
            cycle.game_state.fouls,
            vec![FoulRecord {
                index: 3,
                foul_type: FoulType::BallHolding,
                team: 1,
                agent: 7,
            }]
        );
        assert_eq!(cycle.skipped_fields, 1);
    }

    #[test]
    fn encoding_reproduces_understood_fields() {
        let messages = [
            FULL,
            "((time 0.04)(foul 1 2 2 5)(pass_mode_score_wait_left 1.5))(RDS 0 1)\
             ((nd (SLT 1 0 0 0 0 1 0 0 0 0 1 0 -1.25 2 0.3 1) (nd (setVisible 0))) (nd))",
        ];
        for msg in messages {
            let decoded = DecodedCycle::decode(msg).unwrap();
            let again = DecodedCycle::decode(&decoded.encode()).unwrap();
            assert_eq!(again.game_state, decoded.game_state);
            assert_eq!(again.scene, decoded.scene);
        }
    }

    #[test]
    fn change_categories_follow_fields() {
        let cycle = DecodedCycle::decode("((time 1)(GoalWidth 2.1))(RDS 0 1)()").unwrap();
        let changes = cycle.game_state.changes();
        assert!(changes.time);
        assert!(changes.measures);
        assert!(!changes.play_state);
    }
}
