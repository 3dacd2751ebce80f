use serde::Serialize;

use crate::types::{FrameIndex, GameTime, Side};

/// A goal found while surveying a log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub frame: FrameIndex,
    pub side: Side,
    pub time: GameTime,
}

/// Goal cycles of a log, kept sorted by frame. Built incrementally while the
/// log is scanned, so lookups only see goals discovered so far.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GoalTimeline {
    goals: Vec<Goal>,
}

impl GoalTimeline {
    pub fn new() -> Self {
        Self { goals: Vec::new() }
    }

    /// Records a goal. Goals may arrive out of order; duplicates are dropped.
    pub fn insert(&mut self, goal: Goal) {
        let idx = self.goals.partition_point(|g| g.frame < goal.frame);
        if self.goals.get(idx).map(|g| g.frame) != Some(goal.frame) {
            self.goals.insert(idx, goal);
        }
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    /// First goal strictly after `frame`.
    pub fn next_after(&self, frame: FrameIndex) -> Option<&Goal> {
        let idx = self.goals.partition_point(|g| g.frame <= frame);
        self.goals.get(idx)
    }

    /// Last goal strictly before `frame`.
    pub fn previous_before(&self, frame: FrameIndex) -> Option<&Goal> {
        let idx = self.goals.partition_point(|g| g.frame < frame);
        idx.checked_sub(1).and_then(|i| self.goals.get(i))
    }

    /// Goals within frames `[start, end)`.
    pub fn goals_in_range(&self, start: FrameIndex, end: FrameIndex) -> &[Goal] {
        let start_idx = self.goals.partition_point(|g| g.frame < start);
        let end_idx = self.goals.partition_point(|g| g.frame < end);
        &self.goals[start_idx..end_idx.max(start_idx)]
    }

    pub fn clear(&mut self) {
        self.goals.clear();
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(frame: FrameIndex) -> Goal {
        Goal {
            frame,
            side: Side::Left,
            time: GameTime(frame as f32 * 0.2),
        }
    }

    #[test]
    fn lookups_are_strict() {
        let mut timeline = GoalTimeline::new();
        timeline.insert(goal(340));
        timeline.insert(goal(120));
        timeline.insert(goal(120));
        assert_eq!(timeline.len(), 2);

        assert_eq!(timeline.next_after(50).map(|g| g.frame), Some(120));
        assert_eq!(timeline.next_after(120).map(|g| g.frame), Some(340));
        assert!(timeline.next_after(340).is_none());
        assert_eq!(timeline.previous_before(340).map(|g| g.frame), Some(120));
        assert!(timeline.previous_before(120).is_none());
        assert_eq!(timeline.goals_in_range(100, 341).len(), 2);
        assert!(timeline.goals_in_range(200, 100).is_empty());
    }
}
