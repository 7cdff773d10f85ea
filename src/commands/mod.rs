//! Command implementations for the CLI
//!
//! - start: Start the demo service
//! - test: Test configuration validity

pub mod start;
pub mod test;
