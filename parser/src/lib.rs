pub mod analyzer;
pub mod draw;
mod error;
pub mod game_constants;
pub mod logfile;
pub mod playback;
pub mod scene_graph;
pub mod sexp;
pub mod types;

pub use error::*;
pub use strum;
