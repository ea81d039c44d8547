pub mod config;
pub mod error;
pub mod logging;

pub use config::{DeployerConfig, validate_url};
pub use error::{DeployerError, ErrorCategory};
pub use logging::{init_logging, init_logging_to_dir};
