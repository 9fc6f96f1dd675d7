pub mod api;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod sse;
pub mod stream;
#[cfg(test)]
mod test_log;

pub use error::{CoreResult, StoryflowError};
