pub mod comms;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod quality;
pub mod state;
pub mod util;
pub mod validation;

pub use error::{Error, Result};
pub use orchestration::{ProjectOrchestrator, ProjectReport, RequirementsDescriptor};
