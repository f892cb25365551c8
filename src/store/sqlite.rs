//! SQLite-backed collaborator stores.
//!
//! Layer configuration, allocation records, performance snapshots, and
//! signal history in one database. Decimals are stored as TEXT to keep
//! full precision; the layer row carries the optimistic version token
//! that serializes allocation commits.

use super::{LayerStore, PerformanceStore, SignalStore};
use crate::engine::allocator::StrategyAllocation;
use crate::layer::{
    AllocationPolicy, ConflictPolicy, Layer, LayerMember, PerformanceSnapshot, SignalAction,
    SignalEvent,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::init_schema(&conn)?;

        info!("SQLite store initialized at {:?}", db_path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, handy for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS layers (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL,
                allocation_policy TEXT NOT NULL,
                conflict_policy TEXT NOT NULL,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS layer_members (
                layer_id TEXT NOT NULL REFERENCES layers(id),
                strategy_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                weight TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                PRIMARY KEY (layer_id, strategy_id)
            );

            CREATE TABLE IF NOT EXISTS performance_snapshots (
                strategy_id TEXT PRIMARY KEY,
                win_rate TEXT NOT NULL,
                avg_win TEXT NOT NULL,
                avg_loss TEXT NOT NULL,
                sharpe TEXT NOT NULL,
                period_return TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS signal_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id TEXT NOT NULL,
                layer_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signals_lookup
                ON signal_events (strategy_id, layer_id, timestamp);

            CREATE TABLE IF NOT EXISTS allocations (
                layer_id TEXT NOT NULL REFERENCES layers(id),
                strategy_id TEXT NOT NULL,
                dollars TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (layer_id, strategy_id)
            );
            "#,
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Insert or replace a layer and its members (setup/seeding path).
    pub async fn upsert_layer(&self, layer: &Layer) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO layers
             (id, owner, name, active, allocation_policy, conflict_policy, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                layer.id,
                layer.owner,
                layer.name,
                layer.active as i64,
                layer.allocation_policy.to_string(),
                layer.conflict_policy.to_string(),
                layer.version as i64,
            ],
        )?;

        tx.execute(
            "DELETE FROM layer_members WHERE layer_id = ?1",
            params![layer.id],
        )?;
        for member in &layer.members {
            tx.execute(
                "INSERT INTO layer_members (layer_id, strategy_id, priority, weight, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    layer.id,
                    member.strategy_id,
                    member.priority,
                    member.weight.to_string(),
                    member.enabled as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub async fn upsert_performance(
        &self,
        strategy_id: &str,
        snapshot: &PerformanceSnapshot,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO performance_snapshots
             (strategy_id, win_rate, avg_win, avg_loss, sharpe, period_return, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                strategy_id,
                snapshot.win_rate.to_string(),
                snapshot.avg_win.to_string(),
                snapshot.avg_loss.to_string(),
                snapshot.sharpe.to_string(),
                snapshot.period_return.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_signal(&self, layer_id: &str, event: &SignalEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO signal_events (strategy_id, layer_id, symbol, action, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.strategy_id,
                layer_id,
                event.symbol,
                event.action.to_string(),
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn parse_decimal(text: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("Invalid decimal in {field}: {text}"))
}

fn parse_allocation_policy(text: &str) -> Result<AllocationPolicy> {
    match text {
        "equal" => Ok(AllocationPolicy::Equal),
        "weighted" => Ok(AllocationPolicy::Weighted),
        "dynamic" => Ok(AllocationPolicy::Dynamic),
        "kelly" => Ok(AllocationPolicy::Kelly),
        other => anyhow::bail!("Unknown allocation policy: {other}"),
    }
}

fn parse_conflict_policy(text: &str) -> Result<ConflictPolicy> {
    match text {
        "priority" => Ok(ConflictPolicy::Priority),
        "voting" => Ok(ConflictPolicy::Voting),
        "net_signal" => Ok(ConflictPolicy::NetSignal),
        other => anyhow::bail!("Unknown conflict policy: {other}"),
    }
}

fn parse_action(text: &str) -> Result<SignalAction> {
    match text {
        "BUY" => Ok(SignalAction::Buy),
        "SELL" => Ok(SignalAction::Sell),
        "HOLD" => Ok(SignalAction::Hold),
        other => anyhow::bail!("Unknown signal action: {other}"),
    }
}

#[async_trait]
impl LayerStore for SqliteStore {
    async fn get_layer_config(&self, layer_id: &str) -> Result<Option<Layer>> {
        let conn = self.conn.lock().await;

        let row = conn
            .query_row(
                "SELECT owner, name, active, allocation_policy, conflict_policy, version
                 FROM layers WHERE id = ?1",
                params![layer_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let (owner, name, active, alloc_policy, conflict_policy, version) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(
            "SELECT strategy_id, priority, weight, enabled
             FROM layer_members WHERE layer_id = ?1 ORDER BY strategy_id",
        )?;
        let members = stmt
            .query_map(params![layer_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(strategy_id, priority, weight, enabled)| {
                Ok(LayerMember {
                    strategy_id,
                    priority,
                    weight: parse_decimal(&weight, "layer_members.weight")?,
                    enabled: enabled != 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Layer {
            id: layer_id.to_string(),
            owner,
            name,
            active: active != 0,
            allocation_policy: parse_allocation_policy(&alloc_policy)?,
            conflict_policy: parse_conflict_policy(&conflict_policy)?,
            members,
            version: version as u64,
        }))
    }

    async fn get_current_allocation(&self, layer_id: &str) -> Result<HashMap<String, Decimal>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT strategy_id, dollars FROM allocations WHERE layer_id = ?1")?;
        let rows = stmt
            .query_map(params![layer_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(strategy_id, dollars)| {
                Ok((strategy_id, parse_decimal(&dollars, "allocations.dollars")?))
            })
            .collect()
    }

    async fn persist_allocation(
        &self,
        layer_id: &str,
        allocations: &[StrategyAllocation],
        expected_version: u64,
    ) -> Result<Option<u64>> {
        let mut conn = self.conn.lock().await;
        // One IMMEDIATE transaction covers the version check, the write,
        // and the bump: concurrent commits on the same layer serialize here.
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let version: i64 = match tx
            .query_row(
                "SELECT version FROM layers WHERE id = ?1",
                params![layer_id],
                |row| row.get(0),
            )
            .optional()?
        {
            Some(v) => v,
            None => anyhow::bail!("layer not found: {layer_id}"),
        };

        if version as u64 != expected_version {
            debug!(
                %layer_id,
                expected = expected_version,
                actual = version,
                "Version mismatch, rejecting persist"
            );
            return Ok(None);
        }

        tx.execute("DELETE FROM allocations WHERE layer_id = ?1", params![layer_id])?;
        let now = Utc::now().to_rfc3339();
        for alloc in allocations {
            tx.execute(
                "INSERT INTO allocations (layer_id, strategy_id, dollars, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![layer_id, alloc.strategy_id, alloc.dollars.to_string(), now],
            )?;
        }

        let new_version = version + 1;
        tx.execute(
            "UPDATE layers SET version = ?1 WHERE id = ?2",
            params![new_version, layer_id],
        )?;

        tx.commit()?;
        Ok(Some(new_version as u64))
    }
}

#[async_trait]
impl PerformanceStore for SqliteStore {
    async fn get_performance(
        &self,
        strategy_id: &str,
        _window_days: u32,
    ) -> Result<Option<PerformanceSnapshot>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT win_rate, avg_win, avg_loss, sharpe, period_return
                 FROM performance_snapshots WHERE strategy_id = ?1",
                params![strategy_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((win_rate, avg_win, avg_loss, sharpe, period_return)) => {
                Ok(Some(PerformanceSnapshot {
                    win_rate: parse_decimal(&win_rate, "win_rate")?,
                    avg_win: parse_decimal(&avg_win, "avg_win")?,
                    avg_loss: parse_decimal(&avg_loss, "avg_loss")?,
                    sharpe: parse_decimal(&sharpe, "sharpe")?,
                    period_return: parse_decimal(&period_return, "period_return")?,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn get_signal_history(
        &self,
        strategy_id: &str,
        layer_id: &str,
        window_days: u32,
    ) -> Result<Vec<SignalEvent>> {
        let cutoff = (Utc::now() - Duration::days(window_days as i64)).to_rfc3339();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT strategy_id, symbol, action, timestamp FROM signal_events
             WHERE strategy_id = ?1 AND layer_id = ?2 AND timestamp >= ?3
             ORDER BY timestamp",
        )?;

        let rows = stmt
            .query_map(params![strategy_id, layer_id, cutoff], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(strategy_id, symbol, action, timestamp)| {
                Ok(SignalEvent {
                    strategy_id,
                    symbol,
                    action: parse_action(&action)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .with_context(|| format!("Invalid timestamp: {timestamp}"))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}
