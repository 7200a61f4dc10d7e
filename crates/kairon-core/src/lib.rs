pub mod config;
pub mod error;
pub mod types;

pub use config::KaironConfig;
pub use error::{KaironError, Result};
pub use types::*;
