//! Lambda operator: eventing topology for LambdaFunction and LambdaAgent

#![deny(missing_docs)]

/// LambdaFunction and LambdaAgent controllers
pub mod controller;
/// Builds controller futures for the binary
pub mod controller_runner;
/// Controller error type
pub mod error;

pub use error::Error;
