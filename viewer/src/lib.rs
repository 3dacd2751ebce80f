pub mod backoff;
pub mod commands;
pub mod config;
pub mod draw_comm;
pub mod error;
pub mod frame;
pub mod recorder;
pub mod server_comm;
pub mod session;

pub use commands::ServerCommand;
pub use config::ViewerConfig;
pub use error::SessionError;
pub use frame::{FrameSnapshot, RenderItem, RenderTarget, TextTarget};
pub use server_comm::{ConnectionEvent, NetworkOptions, NetworkSession, ServerChangeListener};
pub use session::{Mode, Session};
