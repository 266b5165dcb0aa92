pub mod config;
pub mod error;
pub mod ids;
pub mod model;

pub use error::{OtlexError, Result};
