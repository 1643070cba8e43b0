pub mod etl;
pub mod index;
pub mod tabular;
pub mod timeline;

#[cfg(test)]
pub(crate) mod mock_storage;

pub use crate::domain::ports::{Pipeline, Storage, Transcriber};
pub use crate::utils::error::Result;
