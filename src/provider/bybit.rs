//! Bybit provider: REST ticker snapshot plus the `v5/public/linear` trade
//! stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::error::CoreError;
use crate::model::{Category, Ticker, Trade};
use crate::provider::Provider;
use crate::ws::{WsClient, WsManager};

const LINEAR_PUBLIC_WS_PATH: &str = "/v5/public/linear";
const SUBSCRIBE_BATCH_SIZE: usize = 20;
const PING_INTERVAL: Duration = Duration::from_secs(20);
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

pub struct BybitProvider {
    base_url: String,
    ws_base_url: String,
    http: reqwest::Client,
    ws_manager: WsManager,
    buffer_size: usize,
}

impl BybitProvider {
    pub fn new(base_url: String, ws_base_url: String, buffer_size: usize, chunk_size: usize) -> Self {
        Self {
            base_url,
            ws_base_url,
            http: reqwest::Client::new(),
            ws_manager: WsManager::new(chunk_size),
            buffer_size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: TickersResult,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    list: Vec<TickerDto>,
}

#[derive(Debug, Deserialize)]
struct TickerDto {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
}

fn parse_f64(s: &str) -> f64 {
    if s.is_empty() {
        0.0
    } else {
        s.parse().unwrap_or(0.0)
    }
}

#[async_trait]
impl Provider for BybitProvider {
    fn exchange_name(&self) -> &'static str {
        "ByBit"
    }

    async fn list_tickers(&self, category: Category) -> Result<Vec<Ticker>> {
        let resp = self
            .http
            .get(format!("{}/v5/market/tickers", self.base_url))
            .query(&[("category", category.as_str())])
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let body: TickersResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Decode(e.to_string()))?;

        if body.ret_code != 0 {
            return Err(CoreError::RemoteError {
                code: body.ret_code,
                message: body.ret_msg,
            }
            .into());
        }

        Ok(body
            .result
            .list
            .into_iter()
            .map(|dto| Ticker {
                symbol: dto.symbol,
                last_price: parse_f64(&dto.last_price),
                turnover_24h: parse_f64(&dto.turnover_24h),
            })
            .collect())
    }

    async fn subscribe_trades(
        &self,
        symbols: Vec<String>,
        cancel: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Trade>> {
        let url = format!("{}{}", self.ws_base_url, LINEAR_PUBLIC_WS_PATH);
        self.ws_manager
            .subscribe_trades(symbols, self.buffer_size, cancel, || {
                Arc::new(BybitWsClient::new(url.clone())) as Arc<dyn WsClient>
            })
            .await
    }
}

struct BybitWsClient {
    url: String,
    dropped_trades: Arc<AtomicU64>,
}

impl BybitWsClient {
    fn new(url: String) -> Self {
        Self {
            url,
            dropped_trades: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsTradeDto {
    #[serde(rename = "T")]
    ts_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "p")]
    price: String,
}

#[derive(Debug, Deserialize)]
struct WsTradeMessage {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    data: Vec<WsTradeDto>,
}

#[async_trait]
impl WsClient for BybitWsClient {
    async fn start(
        &self,
        symbols: Vec<String>,
        out: mpsc::Sender<Trade>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| CoreError::Network(e.to_string()))
            .context("dialing Bybit websocket")?;

        let (sink, mut stream) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));

        subscribe_batches(&sink, &symbols).await?;

        tokio::spawn(ping_loop(sink.clone(), cancel.clone()));

        let dropped = self.dropped_trades.clone();
        tokio::spawn(metrics_loop(dropped.clone(), cancel.clone()));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            break;
                        }
                    }
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        match msg {
                            Ok(Message::Text(text)) => {
                                if let Ok(parsed) = serde_json::from_str::<WsTradeMessage>(&text) {
                                    if parsed.topic.is_empty() {
                                        continue;
                                    }
                                    for dto in parsed.data {
                                        let trade = Trade {
                                            symbol: dto.symbol,
                                            ts_ms: dto.ts_ms,
                                            price: parse_f64(&dto.price),
                                            volume: parse_f64(&dto.volume),
                                            side: if dto.side == "Sell" {
                                                crate::model::Side::Sell
                                            } else {
                                                crate::model::Side::Buy
                                            },
                                        };
                                        if out.try_send(trade).is_err() {
                                            dropped.fetch_add(1, Ordering::Relaxed);
                                        }
                                    }
                                }
                            }
                            Ok(Message::Ping(payload)) => {
                                let _ = sink.lock().await.send(Message::Pong(payload)).await;
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Bybit websocket read failed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

async fn subscribe_batches(
    sink: &Arc<Mutex<impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin>>,
    symbols: &[String],
) -> Result<()> {
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for (offset, batch) in symbols.chunks(SUBSCRIBE_BATCH_SIZE).enumerate() {
        let args: Vec<String> = batch.iter().map(|s| format!("publicTrade.{s}")).collect();
        let payload = serde_json::json!({
            "op": "subscribe",
            "req_id": format!("sub-{now_nanos}-{offset}"),
            "args": args,
        });
        let mut sink = sink.lock().await;
        sink.send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
    }
    Ok(())
}

async fn ping_loop(
    sink: Arc<Mutex<impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin>>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let payload = serde_json::json!({ "op": "ping" });
                let mut sink = sink.lock().await;
                if sink.send(Message::Text(payload.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn metrics_loop(dropped: Arc<AtomicU64>, mut cancel: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(METRICS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let n = dropped.load(Ordering::Relaxed);
                if n > 0 {
                    tracing::warn!(dropped_trades = n, "ByBit metrics");
                }
            }
        }
    }
}
