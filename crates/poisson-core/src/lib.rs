//! Poisson Core - Types, configuration, and error handling

pub mod config;
pub mod data;
pub mod error;
pub mod types;

pub use config::Config;
pub use data::{DataStore, DataTables};
pub use error::{Error, Result};
pub use types::*;
