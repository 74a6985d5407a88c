pub mod config;
pub mod error;
pub mod telemetry;

pub use config::Config;
pub use error::{Bound, Error, Result};
