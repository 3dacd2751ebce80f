#[allow(clippy::module_inception)]
pub mod analyzer;
pub mod cycle_dump;
pub mod decoder;
pub mod play_mode_log;
pub mod survey;
pub mod world;

pub use analyzer::Analyzer;
