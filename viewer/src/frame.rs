use std::io::Write;

use glam::{Mat4, Vec3};
use serde::Serialize;
use spark_replays::analyzer::world::WorldModel;
use spark_replays::draw::{AgentAnnotation, Drawings, SetSnapshot};
use spark_replays::strum::IntoEnumIterator;
use spark_replays::types::{AgentId, AgentRef, GameTime, Side};

#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub side: Side,
    pub id: AgentId,
    pub position: Option<Vec3>,
    pub head: Option<Mat4>,
    /// Model path and world transform of every body segment.
    pub segments: Vec<(String, Mat4)>,
    pub annotation: Option<AgentAnnotation>,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSummary {
    pub side: Side,
    pub name: Option<String>,
    pub score: u32,
}

/// Everything a renderer needs for one frame, copied out of the world and
/// the drawings in one go so it is internally consistent.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub time: GameTime,
    pub half: u32,
    pub play_mode: Option<String>,
    pub teams: [TeamSummary; 2],
    pub ball: Option<Vec3>,
    pub agents: Vec<AgentSnapshot>,
    /// Visible shape sets, ordered by name.
    pub shape_sets: Vec<SetSnapshot>,
}

/// One drawable element of a [`FrameSnapshot`].
#[derive(Debug, Clone, Copy)]
pub enum RenderItem<'a> {
    Agent(&'a AgentSnapshot),
    Ball(Vec3),
    Shapes(&'a SetSnapshot),
}

/// Trait for rendering backends.
pub trait RenderTarget {
    /// Prepare a fresh frame.
    fn begin_frame(&mut self, frame: &FrameSnapshot);

    fn draw(&mut self, item: RenderItem<'_>);

    /// Finish the current frame.
    fn end_frame(&mut self);
}

impl FrameSnapshot {
    /// Copies the frame out of `world`. The caller holds the world lock for
    /// the duration, so no cycle can be half applied.
    pub fn capture(world: &WorldModel, drawings: &Drawings) -> Self {
        let state = world.game_state();
        let selected = drawings.selected_agent();

        let teams = [Side::Left, Side::Right].map(|side| TeamSummary {
            side,
            name: state.team_name(side).map(str::to_string),
            score: state.score(side),
        });

        let agents = Side::iter()
            .flat_map(|side| world.team(side).agents())
            .map(|agent| {
                let agent_ref = AgentRef {
                    side: agent.side,
                    id: agent.id,
                };
                AgentSnapshot {
                    side: agent.side,
                    id: agent.id,
                    position: agent.position,
                    head: agent.head,
                    segments: agent
                        .segments
                        .iter()
                        .map(|s| (s.model.clone(), s.transform))
                        .collect(),
                    annotation: drawings.agent_annotation(agent_ref),
                    selected: selected == Some(agent_ref),
                }
            })
            .collect();

        let shape_sets = drawings
            .snapshot()
            .into_iter()
            .filter(|set| set.visible)
            .collect();

        FrameSnapshot {
            time: state.time(),
            half: state.half(),
            play_mode: state.play_mode_name().map(str::to_string),
            teams,
            ball: world.ball().position,
            agents,
            shape_sets,
        }
    }

    pub fn render(&self, target: &mut dyn RenderTarget) {
        target.begin_frame(self);
        for agent in &self.agents {
            target.draw(RenderItem::Agent(agent));
        }
        if let Some(ball) = self.ball {
            target.draw(RenderItem::Ball(ball));
        }
        for set in &self.shape_sets {
            target.draw(RenderItem::Shapes(set));
        }
        target.end_frame();
    }

    /// `A 1:0 B` style score line; unnamed teams show as `-`.
    pub fn score_line(&self) -> String {
        let [left, right] = &self.teams;
        format!(
            "{} {}:{} {}",
            left.name.as_deref().unwrap_or("-"),
            left.score,
            right.score,
            right.name.as_deref().unwrap_or("-")
        )
    }
}

/// Writes one summary line per frame.
pub struct TextTarget<W: Write> {
    out: W,
    line: String,
    agents: usize,
    shapes: usize,
    error: Option<std::io::Error>,
}

impl<W: Write> TextTarget<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: String::new(),
            agents: 0,
            shapes: 0,
            error: None,
        }
    }

    /// First write error since the last call.
    pub fn take_error(&mut self) -> Option<std::io::Error> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderTarget for TextTarget<W> {
    fn begin_frame(&mut self, frame: &FrameSnapshot) {
        self.line = format!(
            "{} {} {}",
            frame.time,
            frame.play_mode.as_deref().unwrap_or("?"),
            frame.score_line()
        );
        self.agents = 0;
        self.shapes = 0;
    }

    fn draw(&mut self, item: RenderItem<'_>) {
        match item {
            RenderItem::Agent(_) => self.agents += 1,
            RenderItem::Ball(ball) => {
                self.line
                    .push_str(&format!(" ball ({:.2}, {:.2}, {:.2})", ball.x, ball.y, ball.z));
            }
            RenderItem::Shapes(set) => self.shapes += set.shapes.len(),
        }
    }

    fn end_frame(&mut self) {
        let result = writeln!(
            self.out,
            "{} agents {} shapes {}",
            self.line, self.agents, self.shapes
        );
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_replays::analyzer::decoder::DecodedCycle;
    use spark_replays::draw::{Color, DrawCommand, DrawnShape, Expiration, Shape};

    fn world() -> WorldModel {
        let mut world = WorldModel::new();
        let message = "((play_modes BeforeKickOff PlayOn)(play_mode 1)(team_left A)(team_right B)\
            (score_left 2)(time 65.5))(RSG 0 1)(\
            (nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 1 2 0.1 1) \
              (nd StaticMesh (load models/soccerball.obj) (setVisible 1))) \
            (nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0.5 1) \
              (nd StaticMesh (load models/naobody.obj) (setVisible 1) (resetMaterials matNum3 matRight))))";
        world.apply(&DecodedCycle::decode(message).unwrap());
        world
    }

    #[test]
    fn snapshot_joins_annotations_onto_agents() {
        let world = world();
        let drawings = Drawings::new();
        let agent = AgentRef {
            side: Side::Right,
            id: AgentId(3),
        };
        drawings.execute(DrawCommand::AgentAnnotation(
            agent,
            AgentAnnotation {
                text: "striker".to_string(),
                color: Color::rgb(1, 2, 3),
            },
        ));
        drawings.execute(DrawCommand::SelectAgent(agent));
        for set in ["shown", "hidden"] {
            drawings.put(
                set,
                DrawnShape {
                    shape: Shape::Point {
                        position: Vec3::ZERO,
                        size: 2.0,
                        color: Color::rgb(0, 0, 0),
                    },
                    expiration: Expiration::Cycle,
                },
            );
        }
        drawings.swap("");
        drawings.set_visible("hidden", false);

        let frame = FrameSnapshot::capture(&world, &drawings);
        assert_eq!(frame.agents.len(), 1);
        let snapshot = &frame.agents[0];
        assert_eq!(snapshot.id, AgentId(3));
        assert!(snapshot.selected);
        assert_eq!(snapshot.annotation.as_ref().unwrap().text, "striker");
        assert_eq!(frame.shape_sets.len(), 1);
        assert_eq!(frame.shape_sets[0].name, "shown");
    }

    #[test]
    fn text_target_summarizes_frame() {
        let frame = FrameSnapshot::capture(&world(), &Drawings::new());
        let mut target = TextTarget::new(Vec::new());
        frame.render(&mut target);
        assert!(target.take_error().is_none());
        let text = String::from_utf8(target.into_inner()).unwrap();
        assert_eq!(
            text,
            "01:05.50 PlayOn A 2:0 B ball (-1.00, 0.10, 2.00) agents 1 shapes 0\n"
        );
    }
}
