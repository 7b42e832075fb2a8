pub mod diff;
pub mod error;
pub mod loader;
pub mod model;
mod raw;

pub use diff::ConfigDiff;
pub use error::ConfigError;
pub use loader::{load_from_path, load_from_str};
pub use model::*;
