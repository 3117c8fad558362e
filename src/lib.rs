pub mod config;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod platform;
pub mod worker;

pub use error::Error;
