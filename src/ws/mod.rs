//! WebSocket stream management: `WsManager` chunks a symbol list, starts one
//! `WsClient` per chunk, and multiplexes their output into a single bounded
//! channel. `WsClient` is implemented per exchange in `crate::provider`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::model::Trade;

/// One WebSocket connection: dial, subscribe, read loop, decode, map to
/// `Trade`, drop-on-full. A single dial, no retry — reconnection after
/// socket failure is an open question upstream (see DESIGN.md) and is not
/// implemented here.
#[async_trait]
pub trait WsClient: Send + Sync {
    /// Runs until `cancel` is signalled or the connection dies. Returns an
    /// error only on dial/subscribe failure; read-loop errors are logged and
    /// simply end the task.
    async fn start(
        &self,
        symbols: Vec<String>,
        out: mpsc::Sender<Trade>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// Splits `symbols` into chunks of at most `chunk_size`.
pub fn chunk_symbols(symbols: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    symbols
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

/// Owns the lifecycle of however many `WsClient`s are needed to cover a
/// symbol list, fanning their trades into one bounded channel.
pub struct WsManager {
    chunk_size: usize,
}

impl WsManager {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Partitions `symbols` into chunks, starts one client per chunk via
    /// `factory`, and returns the shared output channel. If any client fails
    /// to start, returns the error immediately; clients already started
    /// keep running and are cleaned up via `cancel`.
    pub async fn subscribe_trades(
        &self,
        symbols: Vec<String>,
        buffer_size: usize,
        cancel: watch::Receiver<bool>,
        factory: impl Fn() -> Arc<dyn WsClient>,
    ) -> Result<mpsc::Receiver<Trade>> {
        let (tx, rx) = mpsc::channel(buffer_size);
        let chunks = chunk_symbols(&symbols, self.chunk_size);

        for chunk in chunks {
            let client = factory();
            let tx = tx.clone();
            let cancel = cancel.clone();
            client.start(chunk, tx, cancel).await?;
        }

        // Drop our own sender: the channel now closes once every spawned
        // client task has dropped its clone, i.e. once all of them have
        // observed cancellation (or died).
        drop(tx);

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_size() {
        let symbols: Vec<String> = (0..250).map(|i| format!("SYM{i}")).collect();
        let chunks = chunk_symbols(&symbols, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let symbols: Vec<String> = vec![];
        assert!(chunk_symbols(&symbols, 100).is_empty());
    }
}
