pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod process;
pub mod server;
pub mod service;

pub use error::{Error, Result};
