pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod system;
pub mod world;

pub use app::{App, AppBuilder};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
