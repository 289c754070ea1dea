//! HTTP client for a running intake server, used by the CLI subcommands.

pub mod client;
pub mod error;

pub use client::IntakeClient;
pub use error::ClientError;
