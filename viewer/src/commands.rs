use std::fmt;

use glam::Vec3;
use spark_replays::types::{AgentId, Side};

/// Match-control commands a monitor may send to the server. None of them
/// is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Init,
    KickOff(Side),
    FreeKick(Side),
    DirectFreeKick(Side),
    /// Any play mode by its server name, e.g. `corner_kick_left`.
    PlayMode(String),
    DropBall,
    ResetTime,
    RequestFullState,
    KillServer,
    MoveBall { position: Vec3, velocity: Vec3 },
    MoveAgent { side: Side, id: AgentId, position: Vec3 },
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("(init)"),
            Self::KickOff(side) => write!(f, "(kickOff {side})"),
            Self::FreeKick(side) => write!(f, "(playMode free_kick_{})", side.lower()),
            Self::DirectFreeKick(side) => {
                write!(f, "(playMode direct_free_kick_{})", side.lower())
            }
            Self::PlayMode(mode) => write!(f, "(playMode {mode})"),
            Self::DropBall => f.write_str("(dropBall)"),
            Self::ResetTime => f.write_str("(time 0)"),
            Self::RequestFullState => f.write_str("(reqfullstate)"),
            Self::KillServer => f.write_str("(killsim)"),
            Self::MoveBall { position: p, velocity: v } => write!(
                f,
                "(ball (pos {:.2} {:.2} {:.2}) (vel {:.2} {:.2} {:.2}))",
                p.x, p.y, p.z, v.x, v.y, v.z
            ),
            Self::MoveAgent { side, id, position: p } => write!(
                f,
                "(agent (team {side})(unum {id})(pos {:.2} {:.2} {:.2}))",
                p.x, p.y, p.z
            ),
        }
    }
}

impl ServerCommand {
    pub fn move_ball(position: Vec3) -> Self {
        Self::MoveBall {
            position,
            velocity: Vec3::ZERO,
        }
    }

    /// The command as sent on the wire: a 4-byte big-endian length followed
    /// by the text.
    pub fn encode(&self) -> Vec<u8> {
        let text = self.to_string();
        let mut buf = Vec::with_capacity(4 + text.len());
        buf.extend_from_slice(&(text.len() as u32).to_be_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_match_control_commands() {
        let cases = [
            (ServerCommand::Init, "(init)"),
            (ServerCommand::KickOff(Side::Left), "(kickOff Left)"),
            (ServerCommand::KickOff(Side::Right), "(kickOff Right)"),
            (ServerCommand::FreeKick(Side::Left), "(playMode free_kick_left)"),
            (
                ServerCommand::DirectFreeKick(Side::Right),
                "(playMode direct_free_kick_right)",
            ),
            (ServerCommand::DropBall, "(dropBall)"),
            (ServerCommand::ResetTime, "(time 0)"),
            (ServerCommand::RequestFullState, "(reqfullstate)"),
            (ServerCommand::KillServer, "(killsim)"),
        ];
        for (command, text) in cases {
            assert_eq!(command.to_string(), text);
        }
    }

    #[test]
    fn renders_placement_commands() {
        let ball = ServerCommand::move_ball(Vec3::new(1.0, -2.5, 0.042));
        assert_eq!(
            ball.to_string(),
            "(ball (pos 1.00 -2.50 0.04) (vel 0.00 0.00 0.00))"
        );

        let agent = ServerCommand::MoveAgent {
            side: Side::Left,
            id: AgentId(1),
            position: Vec3::new(-52.0, 0.0, 0.3),
        };
        assert_eq!(
            agent.to_string(),
            "(agent (team Left)(unum 1)(pos -52.00 0.00 0.30))"
        );
    }

    #[test]
    fn encodes_with_length_prefix() {
        let bytes = ServerCommand::DropBall.encode();
        assert_eq!(&bytes[..4], &[0, 0, 0, 10]);
        assert_eq!(&bytes[4..], b"(dropBall)");
    }
}
