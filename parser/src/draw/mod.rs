//! The binary drawing protocol agents use for debug output, and the registry
//! of shape sets it feeds.

mod command;
mod registry;
mod shapes;

pub use command::{AgentAnnotation, Commands, DrawCommand, parse_command};
pub use registry::{Drawings, SetSnapshot, ShapeBuffer};
pub use shapes::{Color, DrawnShape, Expiration, Shape, ShapeKind};

/// UDP port agents send drawing datagrams to.
pub const DRAW_PORT: u16 = 32769;
