pub mod agent_stream;
pub mod config;
pub mod error;
pub mod turn;

pub use error::{Error, Result};
