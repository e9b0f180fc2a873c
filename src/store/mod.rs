//! SQLite snapshot store
//!
//! Each logical operation opens its own connection, executes, and closes;
//! no transaction ever spans chain I/O, so a slow RPC call can never hold a
//! database lock. The upsert replaces a snapshot row and its balance
//! children atomically, and recomputes the completeness score on every
//! write.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{BalanceRecord, UnifiedSnapshot};

pub mod schema;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    db_path: PathBuf,
}

/// Collection status rollup for operators and the monitor loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSummary {
    pub total_snapshots: u64,
    pub complete_snapshots: u64,
    pub incomplete_snapshots: u64,
    pub completion_rate: f64,
    pub latest_eth_timestamp: Option<i64>,
    pub oldest_eth_timestamp: Option<i64>,
    pub coverage_hours: f64,
}

impl SnapshotStore {
    /// Open (creating if needed) the database at `db_path` and ensure the
    /// schema exists.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = SnapshotStore {
            db_path: db_path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        info!(path = %store.db_path.display(), "snapshot store initialized");
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Insert or replace the snapshot row keyed by its Ethereum block
    /// timestamp, and replace its balance children in the same transaction.
    /// The stored completeness score is always recomputed from the fields
    /// actually present.
    pub fn upsert_snapshot(
        &self,
        snapshot: &UnifiedSnapshot,
        balances: &[BalanceRecord],
    ) -> Result<f64, StoreError> {
        let score = snapshot.completeness();
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO unified_snapshots (
                eth_block_number, eth_block_timestamp, bridge_balance_trb,
                layer_block_height, layer_block_timestamp, layer_total_supply_trb,
                bonded_tokens, not_bonded_tokens, total_addresses,
                addresses_with_balance, total_balance_loya, total_balance_trb,
                free_floating_trb, collection_time, data_completeness_score
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT (eth_block_timestamp) DO UPDATE SET
                eth_block_number = excluded.eth_block_number,
                bridge_balance_trb = excluded.bridge_balance_trb,
                layer_block_height = excluded.layer_block_height,
                layer_block_timestamp = excluded.layer_block_timestamp,
                layer_total_supply_trb = excluded.layer_total_supply_trb,
                bonded_tokens = excluded.bonded_tokens,
                not_bonded_tokens = excluded.not_bonded_tokens,
                total_addresses = excluded.total_addresses,
                addresses_with_balance = excluded.addresses_with_balance,
                total_balance_loya = excluded.total_balance_loya,
                total_balance_trb = excluded.total_balance_trb,
                free_floating_trb = excluded.free_floating_trb,
                collection_time = excluded.collection_time,
                data_completeness_score = excluded.data_completeness_score
            "#,
            params![
                snapshot.eth_block_number as i64,
                snapshot.eth_block_timestamp,
                snapshot.bridge_balance_trb,
                snapshot.layer_block_height.map(|h| h as i64),
                snapshot.layer_block_timestamp,
                snapshot.layer_total_supply_trb,
                snapshot.bonded_tokens,
                snapshot.not_bonded_tokens,
                snapshot.total_addresses,
                snapshot.addresses_with_balance,
                snapshot.total_balance_loya,
                snapshot.total_balance_trb,
                snapshot.free_floating_trb,
                snapshot.collection_time.to_rfc3339(),
                score,
            ],
        )?;

        tx.execute(
            "DELETE FROM balance_records WHERE eth_block_timestamp = ?1",
            params![snapshot.eth_block_timestamp],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO balance_records
                    (eth_block_timestamp, address, account_type, loya_balance, trb_balance)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for record in balances {
                stmt.execute(params![
                    snapshot.eth_block_timestamp,
                    record.address,
                    record.account_type,
                    record.loya_balance,
                    record.trb_balance,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            eth_timestamp = snapshot.eth_block_timestamp,
            score,
            balance_rows = balances.len(),
            "snapshot upserted"
        );
        Ok(score)
    }

    pub fn get_by_eth_timestamp(
        &self,
        eth_timestamp: i64,
    ) -> Result<Option<UnifiedSnapshot>, StoreError> {
        let conn = self.connect()?;
        let snapshot = conn
            .query_row(
                "SELECT * FROM unified_snapshots WHERE eth_block_timestamp = ?1",
                params![eth_timestamp],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Latest snapshots ordered newest-first, optionally filtered to a
    /// minimum completeness score.
    pub fn latest_snapshots(
        &self,
        limit: u32,
        min_completeness: f64,
    ) -> Result<Vec<UnifiedSnapshot>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM unified_snapshots
            WHERE data_completeness_score >= ?1
            ORDER BY eth_block_timestamp DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![min_completeness, limit], snapshot_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Snapshots whose completeness is below 1.0, oldest first (backfill
    /// works forward through history).
    pub fn incomplete_snapshots(&self, limit: u32) -> Result<Vec<UnifiedSnapshot>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM unified_snapshots
            WHERE data_completeness_score < 1.0
            ORDER BY eth_block_timestamp ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit], snapshot_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn existing_eth_timestamps(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT eth_block_timestamp FROM unified_snapshots ORDER BY eth_block_timestamp")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn balances_for_timestamp(
        &self,
        eth_timestamp: i64,
    ) -> Result<Vec<BalanceRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT address, account_type, loya_balance, trb_balance
            FROM balance_records
            WHERE eth_block_timestamp = ?1
            ORDER BY trb_balance DESC
            "#,
        )?;
        let rows = stmt.query_map(params![eth_timestamp], |row| {
            Ok(BalanceRecord {
                address: row.get(0)?,
                account_type: row.get(1)?,
                loya_balance: row.get(2)?,
                trb_balance: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Distinct known Layer heights, ascending.
    pub fn layer_heights(&self) -> Result<Vec<u64>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT layer_block_height FROM unified_snapshots
            WHERE layer_block_height IS NOT NULL
            ORDER BY layer_block_height
            "#,
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let heights = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(heights.into_iter().map(|h| h as u64).collect())
    }

    /// The widest interval between adjacent known Layer heights, as
    /// (lower bound, upper bound). Needs at least two heights and at least
    /// one interval wider than a single block.
    pub fn largest_layer_gap(&self) -> Result<Option<(u64, u64)>, StoreError> {
        let heights = self.layer_heights()?;
        let mut best: Option<(u64, u64)> = None;
        for pair in heights.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if upper - lower <= 1 {
                continue;
            }
            match best {
                Some((a, b)) if upper - lower <= b - a => {}
                _ => best = Some((lower, upper)),
            }
        }
        Ok(best)
    }

    /// Preview of the snapshots a ranged removal would delete.
    pub fn snapshots_in_layer_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<UnifiedSnapshot>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM unified_snapshots
            WHERE layer_block_height BETWEEN ?1 AND ?2
            ORDER BY layer_block_height
            "#,
        )?;
        let rows = stmt.query_map(
            params![start_height as i64, end_height as i64],
            snapshot_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Delete every snapshot (and, via cascade, its balance rows) resolved
    /// to the given Layer height. Returns the number of snapshots removed;
    /// zero is success.
    pub fn delete_by_layer_height(&self, height: u64) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM unified_snapshots WHERE layer_block_height = ?1",
            params![height as i64],
        )?;
        info!(height, deleted, "snapshots removed by layer height");
        Ok(deleted)
    }

    pub fn delete_by_layer_height_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM unified_snapshots WHERE layer_block_height BETWEEN ?1 AND ?2",
            params![start_height as i64, end_height as i64],
        )?;
        info!(start_height, end_height, deleted, "snapshots removed by layer height range");
        Ok(deleted)
    }

    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.connect()?;
        let (total, complete): (u64, u64) = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN data_completeness_score >= 1.0 THEN 1 ELSE 0 END), 0)
            FROM unified_snapshots
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (oldest, latest): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(eth_block_timestamp), MAX(eth_block_timestamp) FROM unified_snapshots",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let coverage_hours = match (oldest, latest) {
            (Some(o), Some(l)) => (l - o) as f64 / 3600.0,
            _ => 0.0,
        };

        Ok(StoreSummary {
            total_snapshots: total,
            complete_snapshots: complete,
            incomplete_snapshots: total - complete,
            completion_rate: if total > 0 {
                complete as f64 / total as f64
            } else {
                0.0
            },
            latest_eth_timestamp: latest,
            oldest_eth_timestamp: oldest,
            coverage_hours,
        })
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<UnifiedSnapshot> {
    let collection_time: String = row.get("collection_time")?;
    // A collection time that does not parse is a corrupt row, not something
    // to paper over with the current clock.
    let collection_time = DateTime::parse_from_rfc3339(&collection_time)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                14,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

    Ok(UnifiedSnapshot {
        eth_block_number: row.get::<_, i64>("eth_block_number")? as u64,
        eth_block_timestamp: row.get("eth_block_timestamp")?,
        bridge_balance_trb: row.get("bridge_balance_trb")?,
        layer_block_height: row
            .get::<_, Option<i64>>("layer_block_height")?
            .map(|h| h as u64),
        layer_block_timestamp: row.get("layer_block_timestamp")?,
        layer_total_supply_trb: row.get("layer_total_supply_trb")?,
        bonded_tokens: row.get("bonded_tokens")?,
        not_bonded_tokens: row.get("not_bonded_tokens")?,
        total_addresses: row.get("total_addresses")?,
        addresses_with_balance: row.get("addresses_with_balance")?,
        total_balance_loya: row.get("total_balance_loya")?,
        total_balance_trb: row.get("total_balance_trb")?,
        free_floating_trb: row.get("free_floating_trb")?,
        collection_time,
        data_completeness_score: row.get("data_completeness_score")?,
    })
}
