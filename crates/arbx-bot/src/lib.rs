//! ARBX paper-trading host.
//!
//! Wires the execution engine to its surroundings:
//! - Paper venues built from configuration
//! - Trade requests as JSON lines in, execution results as JSON lines out
//! - Engine events to the log
//! - Scheduled reduce-only probing in the background

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, PaperVenueConfig};
pub use error::{AppError, AppResult};
