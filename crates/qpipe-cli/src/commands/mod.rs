//! CLI command implementations.

pub mod backends;
pub mod common;
pub mod result;
pub mod run;
pub mod status;
pub mod validate;
pub mod version;
