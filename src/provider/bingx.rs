//! BingX provider: signed REST contract lookup plus the gzip-framed swap
//! trade stream.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::error::CoreError;
use crate::model::{Category, Side, Ticker, Trade};
use crate::provider::{normalize_symbol, Provider};
use crate::ws::{WsClient, WsManager};

const PING_INTERVAL: Duration = Duration::from_secs(5);
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

pub struct BingXProvider {
    base_url: String,
    ws_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
    ws_manager: WsManager,
    buffer_size: usize,
}

impl BingXProvider {
    pub fn new(
        base_url: String,
        ws_url: String,
        api_key: String,
        api_secret: String,
        buffer_size: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            base_url,
            ws_url,
            api_key,
            api_secret,
            http: reqwest::Client::new(),
            ws_manager: WsManager::new(chunk_size),
            buffer_size,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// BingX's wire symbol form, `BASE-USDT`.
fn to_wire_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        symbol.to_string()
    } else {
        symbol
            .strip_suffix("USDT")
            .map(|base| format!("{base}-USDT"))
            .unwrap_or_else(|| symbol.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TickerDto {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    code: i64,
    msg: String,
    data: Vec<TickerDto>,
}

#[async_trait]
impl Provider for BingXProvider {
    fn exchange_name(&self) -> &'static str {
        "BingX"
    }

    async fn list_tickers(&self, category: Category) -> Result<Vec<Ticker>> {
        if category != Category::Linear {
            return Err(CoreError::Config("BingX only supports the linear category".into()).into());
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let query = format!("timestamp={timestamp}");
        let signature = self.sign(&query);

        let resp = self
            .http
            .get(format!("{}/openApi/swap/v2/quote/contracts", self.base_url))
            .query(&[("timestamp", timestamp.to_string()), ("signature", signature)])
            .header("X-BX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let body: TickersResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Decode(e.to_string()))?;

        if body.code != 0 {
            return Err(CoreError::RemoteError {
                code: body.code,
                message: body.msg,
            }
            .into());
        }

        Ok(body
            .data
            .into_iter()
            .map(|dto| Ticker {
                symbol: normalize_symbol(&dto.symbol),
                ..Default::default()
            })
            .collect())
    }

    async fn subscribe_trades(
        &self,
        symbols: Vec<String>,
        cancel: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Trade>> {
        let url = self.ws_url.clone();
        self.ws_manager
            .subscribe_trades(symbols, self.buffer_size, cancel, || {
                Arc::new(BingXWsClient::new(url.clone())) as Arc<dyn WsClient>
            })
            .await
    }
}

struct BingXWsClient {
    url: String,
    dropped_trades: Arc<AtomicU64>,
}

impl BingXWsClient {
    fn new(url: String) -> Self {
        Self {
            url,
            dropped_trades: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsTradeDataDto {
    #[serde(rename = "T")]
    ts_ms: i64,
    #[serde(rename = "q")]
    volume: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "m")]
    is_maker_sell: bool,
    #[serde(rename = "s")]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct WsTradeMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Vec<WsTradeDataDto>,
}

fn decode_gzip(data: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(data);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| CoreError::Decode(e.to_string()))?;
    Ok(out)
}

#[async_trait]
impl WsClient for BingXWsClient {
    async fn start(
        &self,
        symbols: Vec<String>,
        out: mpsc::Sender<Trade>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| CoreError::Network(e.to_string()))
            .context("dialing BingX websocket")?;

        let (sink, mut stream) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));

        for symbol in &symbols {
            let payload = serde_json::json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "reqType": "sub",
                "dataType": format!("{}@trade", to_wire_symbol(symbol)),
            });
            sink.lock()
                .await
                .send(Message::Text(payload.to_string()))
                .await
                .map_err(|e| CoreError::Network(e.to_string()))?;
        }

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
                            Ok(Message::Ping(payload)) => {
                                let _ = sink.lock().await.send(Message::Pong(payload)).await;
                            }
                            Ok(Message::Binary(bytes)) => {
                                let decoded = match decode_gzip(&bytes) {
                                    Ok(s) => s,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "failed to gunzip BingX message");
                                        continue;
                                    }
                                };

                                if decoded == "Ping" {
                                    let _ = sink.lock().await.send(Message::Text("Pong".into())).await;
                                    continue;
                                }
                                if decoded == "Pong" {
                                    continue;
                                }

                                let parsed: WsTradeMessage = match serde_json::from_str(&decoded) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "failed to decode BingX trade message");
                                        continue;
                                    }
                                };
                                if parsed.code != 0 {
                                    tracing::warn!(code = parsed.code, "BingX trade message error code");
                                    continue;
                                }

                                for dto in parsed.data {
                                    let trade = Trade {
                                        symbol: normalize_symbol(&dto.symbol),
                                        ts_ms: dto.ts_ms,
                                        price: dto.price.parse().unwrap_or(0.0),
                                        volume: dto.volume.parse().unwrap_or(0.0),
                                        side: if dto.is_maker_sell { Side::Sell } else { Side::Buy },
                                    };
                                    if out.try_send(trade).is_err() {
                                        dropped.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "BingX websocket read failed");
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
                let mut sink = sink.lock().await;
                if sink.send(Message::Text("Ping".into())).await.is_err() {
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
                    tracing::warn!(dropped_trades = n, "BingX metrics");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_inserts_dash() {
        assert_eq!(to_wire_symbol("BTCUSDT"), "BTC-USDT");
    }

    #[test]
    fn wire_symbol_passthrough_when_already_dashed() {
        assert_eq!(to_wire_symbol("BTC-USDT"), "BTC-USDT");
    }
}
