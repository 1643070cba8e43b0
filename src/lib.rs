pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use app::{run_stage, run_stages, Stage};
pub use config::toml_config::EtlConfig;
pub use core::etl::EtlEngine;
pub use utils::error::{EtlError, Result};
