//! Persistence for arbitrage spreads: a row per (symbol, buy_ex, sell_ex)
//! lifecycle, created on Open, revised on Update/Close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};

use crate::error::CoreError;
use crate::model::{ArbitrageSpread, FindFilter, SpreadStatus};

#[async_trait]
pub trait SpreadRepository: Send + Sync {
    async fn create(&self, spread: &ArbitrageSpread) -> Result<()>;
    /// `max_spread_percent: None` leaves the stored max untouched (used on
    /// Close, which has no new max to report).
    async fn update(
        &self,
        filter: &FindFilter,
        max_spread_percent: Option<f64>,
        status: SpreadStatus,
    ) -> Result<()>;
    async fn find_all(&self, filter: &FindFilter) -> Result<Vec<ArbitrageSpread>>;
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

CREATE TABLE IF NOT EXISTS arbitrage_spreads (
    id              TEXT PRIMARY KEY,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    symbol          TEXT NOT NULL,
    buy_exchange    TEXT NOT NULL,
    sell_exchange   TEXT NOT NULL,
    buy_price       REAL NOT NULL,
    sell_price      REAL NOT NULL,
    spread_percent  REAL NOT NULL,
    max_spread_percent REAL NOT NULL,
    status          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_arbitrage_spreads_key
    ON arbitrage_spreads (symbol, buy_exchange, sell_exchange, status);
"#;

pub struct SqliteSpreadRepository {
    conn: Mutex<Connection>,
}

impl SqliteSpreadRepository {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening sqlite database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("applying arbitrage_spreads schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn status_str(status: SpreadStatus) -> &'static str {
        match status {
            SpreadStatus::Opened => "OPENED",
            SpreadStatus::Updated => "UPDATED",
            SpreadStatus::Closed => "CLOSED",
        }
    }
}

fn apply_filter(filter: &FindFilter, sql: &mut String, args: &mut Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses = Vec::new();
    if let Some(symbol) = &filter.symbol {
        clauses.push("symbol = ?".to_string());
        args.push(Box::new(symbol.clone()));
    }
    if let Some(buy) = &filter.buy_exchange {
        clauses.push("buy_exchange = ?".to_string());
        args.push(Box::new(buy.clone()));
    }
    if let Some(sell) = &filter.sell_exchange {
        clauses.push("sell_exchange = ?".to_string());
        args.push(Box::new(sell.clone()));
    }
    if !filter.status_in.is_empty() {
        let placeholders: Vec<&str> = filter.status_in.iter().map(|_| "?").collect();
        clauses.push(format!("status IN ({})", placeholders.join(",")));
        for status in &filter.status_in {
            args.push(Box::new(SqliteSpreadRepository::status_str(*status).to_string()));
        }
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

#[async_trait]
impl SpreadRepository for SqliteSpreadRepository {
    async fn create(&self, spread: &ArbitrageSpread) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO arbitrage_spreads
                (id, created_at, updated_at, symbol, buy_exchange, sell_exchange,
                 buy_price, sell_price, spread_percent, max_spread_percent, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                spread.id.to_string(),
                spread.created_at.to_rfc3339(),
                spread.updated_at.to_rfc3339(),
                spread.symbol,
                spread.buy_exchange,
                spread.sell_exchange,
                spread.buy_price,
                spread.sell_price,
                spread.spread_percent,
                spread.max_spread_percent,
                Self::status_str(spread.status),
            ],
        )
        .map_err(|e| CoreError::Sink(e.to_string()))?;
        Ok(())
    }

    async fn update(
        &self,
        filter: &FindFilter,
        max_spread_percent: Option<f64>,
        status: SpreadStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let mut sql = "UPDATE arbitrage_spreads SET status = ?, updated_at = ?".to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(Self::status_str(status).to_string()),
            Box::new(Utc::now().to_rfc3339()),
        ];
        if let Some(max_spread_percent) = max_spread_percent {
            sql.push_str(", max_spread_percent = ?");
            args.push(Box::new(max_spread_percent));
        }
        apply_filter(filter, &mut sql, &mut args);

        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, refs.as_slice())
            .map_err(|e| CoreError::Sink(e.to_string()))?;
        Ok(())
    }

    async fn find_all(&self, filter: &FindFilter) -> Result<Vec<ArbitrageSpread>> {
        let conn = self.conn.lock();
        let mut sql = "SELECT id, created_at, updated_at, symbol, buy_exchange, sell_exchange,
                               buy_price, sell_price, spread_percent, max_spread_percent, status
                        FROM arbitrage_spreads"
            .to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        apply_filter(filter, &mut sql, &mut args);

        let mut stmt = conn.prepare(&sql).map_err(|e| CoreError::Sink(e.to_string()))?;
        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(refs.as_slice(), |row| {
                let status_str: String = row.get(10)?;
                let status = match status_str.as_str() {
                    "OPENED" => SpreadStatus::Opened,
                    "UPDATED" => SpreadStatus::Updated,
                    _ => SpreadStatus::Closed,
                };
                let id_str: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                let updated_at: String = row.get(2)?;
                Ok(ArbitrageSpread {
                    id: uuid::Uuid::parse_str(&id_str).unwrap_or_default(),
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    symbol: row.get(3)?,
                    buy_exchange: row.get(4)?,
                    sell_exchange: row.get(5)?,
                    buy_price: row.get(6)?,
                    sell_price: row.get(7)?,
                    spread_percent: row.get(8)?,
                    max_spread_percent: row.get(9)?,
                    status,
                })
            })
            .map_err(|e| CoreError::Sink(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| CoreError::Sink(e.to_string()))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
pub struct InMemorySpreadRepository {
    pub rows: Mutex<Vec<ArbitrageSpread>>,
}

#[cfg(test)]
impl InMemorySpreadRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SpreadRepository for InMemorySpreadRepository {
    async fn create(&self, spread: &ArbitrageSpread) -> Result<()> {
        self.rows.lock().push(spread.clone());
        Ok(())
    }

    async fn update(
        &self,
        filter: &FindFilter,
        max_spread_percent: Option<f64>,
        status: SpreadStatus,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        for row in rows.iter_mut() {
            let symbol_match = filter.symbol.as_deref().map_or(true, |s| s == row.symbol);
            let buy_match = filter
                .buy_exchange
                .as_deref()
                .map_or(true, |b| b == row.buy_exchange);
            let sell_match = filter
                .sell_exchange
                .as_deref()
                .map_or(true, |s| s == row.sell_exchange);
            let status_match = filter.status_in.is_empty() || filter.status_in.contains(&row.status);
            if symbol_match && buy_match && sell_match && status_match {
                if let Some(max_spread_percent) = max_spread_percent {
                    row.max_spread_percent = max_spread_percent;
                }
                row.status = status;
                row.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn find_all(&self, filter: &FindFilter) -> Result<Vec<ArbitrageSpread>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| {
                filter.symbol.as_deref().map_or(true, |s| s == row.symbol)
                    && (filter.status_in.is_empty() || filter.status_in.contains(&row.status))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn spread(status: SpreadStatus) -> ArbitrageSpread {
        ArbitrageSpread {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            symbol: "BTCUSDT".into(),
            buy_exchange: "ByBit".into(),
            sell_exchange: "BingX".into(),
            buy_price: 100.0,
            sell_price: 103.0,
            spread_percent: 3.0,
            max_spread_percent: 3.0,
            status,
        }
    }

    #[tokio::test]
    async fn sqlite_repository_create_update_find_round_trip() {
        let db_file = tempfile::NamedTempFile::new().unwrap();
        let repo = SqliteSpreadRepository::open(db_file.path().to_str().unwrap()).unwrap();

        repo.create(&spread(SpreadStatus::Opened)).await.unwrap();

        let filter = FindFilter {
            symbol: Some("BTCUSDT".into()),
            buy_exchange: Some("ByBit".into()),
            sell_exchange: Some("BingX".into()),
            status_in: vec![SpreadStatus::Opened, SpreadStatus::Updated],
        };
        repo.update(&filter, Some(6.0), SpreadStatus::Updated).await.unwrap();

        let rows = repo.find_all(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SpreadStatus::Updated);
        assert_eq!(rows[0].max_spread_percent, 6.0);

        // Close doesn't carry a new max; the stored one must survive.
        repo.update(&filter, None, SpreadStatus::Closed).await.unwrap();
        let by_symbol = FindFilter {
            symbol: Some("BTCUSDT".into()),
            ..Default::default()
        };
        let rows = repo.find_all(&by_symbol).await.unwrap();
        assert_eq!(rows[0].status, SpreadStatus::Closed);
        assert_eq!(rows[0].max_spread_percent, 6.0);
    }

    #[tokio::test]
    async fn in_memory_repository_create_and_find() {
        let repo = InMemorySpreadRepository::new();
        repo.create(&spread(SpreadStatus::Opened)).await.unwrap();

        let found = repo
            .find_all(&FindFilter {
                symbol: Some("BTCUSDT".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_repository_update_applies_to_matching_rows() {
        let repo = InMemorySpreadRepository::new();
        repo.create(&spread(SpreadStatus::Opened)).await.unwrap();

        let filter = FindFilter {
            symbol: Some("BTCUSDT".into()),
            buy_exchange: Some("ByBit".into()),
            sell_exchange: Some("BingX".into()),
            status_in: vec![SpreadStatus::Opened, SpreadStatus::Updated],
        };
        repo.update(&filter, Some(5.0), SpreadStatus::Updated)
            .await
            .unwrap();

        {
            let rows = repo.rows.lock();
            assert_eq!(rows[0].status, SpreadStatus::Updated);
            assert_eq!(rows[0].max_spread_percent, 5.0);
        }

        // Close doesn't carry a new max; the stored one must survive.
        repo.update(&filter, None, SpreadStatus::Closed)
            .await
            .unwrap();
        let rows = repo.rows.lock();
        assert_eq!(rows[0].status, SpreadStatus::Closed);
        assert_eq!(rows[0].max_spread_percent, 5.0);
    }
}
