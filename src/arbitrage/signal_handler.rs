//! Dispatches `SpreadEvent`s from the detector to the notifier and
//! repository. Runs as its own task so a slow notifier send never blocks
//! the ArbitrageBot's price-update loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::arbitrage::notifier::Notifier;
use crate::arbitrage::repository::SpreadRepository;
use crate::model::{ArbitrageSpread, FindFilter, SpreadEvent, SpreadStatus};

pub struct SignalHandler {
    notifier: Arc<dyn Notifier>,
    repository: Arc<dyn SpreadRepository>,
}

impl SignalHandler {
    pub fn new(notifier: Arc<dyn Notifier>, repository: Arc<dyn SpreadRepository>) -> Self {
        Self { notifier, repository }
    }

    /// Drains `events` until the channel closes.
    pub async fn run(self, mut events: mpsc::Receiver<SpreadEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(err) = self.handle(event).await {
                tracing::warn!(error = %err, "failed to handle spread event");
            }
        }
    }

    async fn handle(&self, event: SpreadEvent) -> anyhow::Result<()> {
        match event.status {
            SpreadStatus::Opened => self.handle_opened(event).await,
            SpreadStatus::Updated => self.handle_updated(event).await,
            SpreadStatus::Closed => self.handle_closed(event).await,
        }
    }

    async fn handle_opened(&self, event: SpreadEvent) -> anyhow::Result<()> {
        let message = format!(
            "🟢 <b>Spread opened</b>\n{symbol}: buy {buy_ex} @ {buy_price:.6} / sell {sell_ex} @ {sell_price:.6}\nspread: {spread:.2}%",
            symbol = event.symbol,
            buy_ex = event.buy_exchange,
            buy_price = event.buy_price,
            sell_ex = event.sell_exchange,
            sell_price = event.sell_price,
            spread = event.from_spread_percent,
        );
        self.notifier.send(&message).await?;

        let now = chrono::Utc::now();
        self.repository
            .create(&ArbitrageSpread {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                symbol: event.symbol,
                buy_exchange: event.buy_exchange,
                sell_exchange: event.sell_exchange,
                buy_price: event.buy_price,
                sell_price: event.sell_price,
                spread_percent: event.from_spread_percent,
                max_spread_percent: event.max_spread_percent,
                status: SpreadStatus::Opened,
            })
            .await
    }

    async fn handle_updated(&self, event: SpreadEvent) -> anyhow::Result<()> {
        let message = format!(
            "🔄 <b>Spread updated</b>\n{symbol}: {buy_ex} -> {sell_ex}\nnew max spread: {max:.2}%",
            symbol = event.symbol,
            buy_ex = event.buy_exchange,
            sell_ex = event.sell_exchange,
            max = event.max_spread_percent,
        );
        self.notifier.send(&message).await?;

        self.repository
            .update(
                &FindFilter {
                    symbol: Some(event.symbol),
                    buy_exchange: Some(event.buy_exchange),
                    sell_exchange: Some(event.sell_exchange),
                    status_in: vec![SpreadStatus::Opened, SpreadStatus::Updated],
                },
                Some(event.max_spread_percent),
                SpreadStatus::Updated,
            )
            .await
    }

    async fn handle_closed(&self, event: SpreadEvent) -> anyhow::Result<()> {
        let message = format!(
            "🔴 <b>Spread closed</b>\n{symbol}: {buy_ex} -> {sell_ex}",
            symbol = event.symbol,
            buy_ex = event.buy_exchange,
            sell_ex = event.sell_exchange,
        );
        self.notifier.send(&message).await?;

        self.repository
            .update(
                &FindFilter {
                    symbol: Some(event.symbol),
                    buy_exchange: Some(event.buy_exchange),
                    sell_exchange: Some(event.sell_exchange),
                    status_in: vec![SpreadStatus::Opened, SpreadStatus::Updated],
                },
                None,
                SpreadStatus::Closed,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::notifier::InMemoryNotifier;
    use crate::arbitrage::repository::InMemorySpreadRepository;

    fn event(status: SpreadStatus) -> SpreadEvent {
        SpreadEvent {
            status,
            symbol: "BTCUSDT".into(),
            buy_exchange: "ByBit".into(),
            sell_exchange: "BingX".into(),
            buy_price: 100.0,
            sell_price: 103.0,
            from_spread_percent: 3.0,
            max_spread_percent: 3.0,
        }
    }

    #[tokio::test]
    async fn opened_event_notifies_and_persists() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let repo = Arc::new(InMemorySpreadRepository::new());
        let handler = SignalHandler::new(notifier.clone(), repo.clone());

        handler.handle(event(SpreadStatus::Opened)).await.unwrap();

        assert_eq!(notifier.sent.lock().len(), 1);
        assert_eq!(repo.rows.lock().len(), 1);
        assert_eq!(repo.rows.lock()[0].status, SpreadStatus::Opened);
    }

    #[tokio::test]
    async fn closed_event_updates_existing_row() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let repo = Arc::new(InMemorySpreadRepository::new());
        let handler = SignalHandler::new(notifier, repo.clone());

        handler.handle(event(SpreadStatus::Opened)).await.unwrap();
        handler.handle(event(SpreadStatus::Closed)).await.unwrap();

        assert_eq!(repo.rows.lock()[0].status, SpreadStatus::Closed);
    }
}
