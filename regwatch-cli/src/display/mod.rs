mod progress;

pub use progress::{BatchProgress, LogWriterFactory};
