// 各階段的 ETL 管道與串接執行
pub mod pipelines;
pub mod stages;

pub use stages::{run_stage, run_stages, Stage};
