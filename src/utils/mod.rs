pub mod error;
pub mod logger;
pub mod monitor;
pub mod pacing;
pub mod validation;
