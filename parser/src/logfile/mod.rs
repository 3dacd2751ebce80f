mod container;
mod reader;

pub use container::{ContainerLayer, LogStream, container_chain};
pub use reader::{DEFAULT_WINDOW, LogReader, LogRecord};
