//! Asset pipeline daemon
//!
//! A long-lived worker that accepts newline-delimited JSON requests over a
//! local TCP connection, runs the requested processors against the enclosed
//! asset and answers on the same connection, one response per request.

pub mod channel;
pub mod config;
pub mod protocol;
pub mod registry_helper;
pub mod server;

pub use channel::{Channel, Exchange, Responder};
pub use config::{CliArgs, DaemonConfig};
pub use protocol::{
    AssetPayload, BatchPayload, ErrorPayload, ExecuteRequest, GenerateRequest, GenerateSettings,
    ProtocolError, Request, Response,
};
pub use registry_helper::{builtin_registry, REGISTRY_VERSION};
pub use server::{handle_request, serve_connection, Server};

use thiserror::Error;

/// Errors that stop the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] asset_analysis_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
