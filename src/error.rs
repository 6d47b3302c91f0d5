//! Domain error kinds for the arbitrage/pump core.
//!
//! Call sites compose these under `anyhow::Result` and attach `.context(...)`
//! rather than matching on variants; the enum exists so logs and tests can
//! distinguish a startup misconfiguration from a transient network hiccup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config: {0}")]
    Config(String),

    #[error("network: {0}")]
    Network(String),

    #[error("remote error {code}: {message}")]
    RemoteError { code: i64, message: String },

    #[error("decode: {0}")]
    Decode(String),

    #[error("sink: {0}")]
    Sink(String),
}
