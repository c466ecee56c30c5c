//! Append-only JSONL trade records, one file per UTC day.
//!
//! Fill records are written as fills happen; snapshot records on a fixed
//! interval. Records are line-delimited JSON with a `type` tag so a single
//! per-day file carries both. Nothing is accumulated in memory.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A fill as recorded for offline analysis.
#[derive(Debug, Clone, Serialize)]
pub struct FillRecord {
    pub timestamp: String,
    pub epoch_ms: u64,
    pub symbol: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub size_usd: Decimal,
    pub position_after: Decimal,
    pub position_usd_after: Decimal,
    pub realized_pnl: Decimal,
    pub cumulative_realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fair_price: Decimal,
    /// "normal" or "close".
    pub mode: String,
    pub spread_bps: f64,
}

/// Periodic ledger snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: String,
    pub epoch_ms: u64,
    pub symbol: String,
    pub position_base: Decimal,
    pub position_usd: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub peak_pnl: Decimal,
    pub drawdown: Decimal,
    pub win_count: u64,
    pub loss_count: u64,
    pub trade_count: u64,
    pub volume_usd: Decimal,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TradeRecord<'a> {
    Fill(&'a FillRecord),
    Snapshot(&'a SnapshotRecord),
}

/// Append-only JSONL writer, one file per UTC day.
pub struct TradeLogger {
    dir: PathBuf,
}

impl TradeLogger {
    /// Create a logger writing under `dir` (created if missing).
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn log_fill(&self, record: &FillRecord) -> io::Result<()> {
        self.append(record.epoch_ms, &TradeRecord::Fill(record))
    }

    pub fn log_snapshot(&self, record: &SnapshotRecord) -> io::Result<()> {
        self.append(record.epoch_ms, &TradeRecord::Snapshot(record))
    }

    fn append(&self, epoch_ms: u64, record: &TradeRecord<'_>) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.day_file(epoch_ms))?;
        writeln!(file, "{line}")
    }

    fn day_file(&self, epoch_ms: u64) -> PathBuf {
        let date = DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            .date_naive();
        self.dir.join(format!("trades-{date}.jsonl"))
    }
}

/// RFC 3339 timestamp for a record.
pub fn rfc3339(epoch_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339()
}
