//! SQLite offset backend.
//!
//! Persists block numbers and transaction indexes to a single SQLite file, so
//! a restarted tailer resumes without replaying whole blocks.
//!
//! # Usage
//! ```rust,no_run
//! use chaintail_storage::sqlite::SqliteOffsetManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let offsets = SqliteOffsetManager::open("./offsets.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let offsets = SqliteOffsetManager::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chaintail_core::error::TailError;
use chaintail_core::offset::{OffsetKey, OffsetKind, OffsetManager};
use chaintail_core::types::Chain;

/// Stored in `block_number` for keys that are not block scoped.
const NO_BLOCK: i64 = -1;

fn storage_error(e: sqlx::Error) -> TailError {
    TailError::Offset(e.to_string())
}

/// SQLite integers are signed; refuse values that would wrap.
fn to_sql(value: u64) -> Result<i64, TailError> {
    i64::try_from(value)
        .map_err(|_| TailError::Offset(format!("offset {value} does not fit in SQLite")))
}

fn from_sql(value: i64) -> Result<u64, TailError> {
    u64::try_from(value)
        .map_err(|_| TailError::Offset(format!("stored offset {value} is negative")))
}

fn block_column(key: &OffsetKey) -> Result<i64, TailError> {
    key.block.map(to_sql).unwrap_or(Ok(NO_BLOCK))
}

/// SQLite-backed offset manager.
pub struct SqliteOffsetManager {
    pool: SqlitePool,
}

impl SqliteOffsetManager {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./offsets.db"`) or a full
    /// SQLite URL (`"sqlite:./offsets.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, TailError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_error)?;
        let offsets = Self { pool };
        offsets.init_schema().await?;
        Ok(offsets)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection, since each `:memory:` connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, TailError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_error)?;

        let offsets = Self { pool };
        offsets.init_schema().await?;
        Ok(offsets)
    }

    async fn init_schema(&self) -> Result<(), TailError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS offsets (
                chain_uuid   TEXT    NOT NULL,
                kind         TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                value        INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_uuid, kind, block_number)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn load(&self, key: &OffsetKey) -> Result<Option<u64>, TailError> {
        let row = sqlx::query(
            "SELECT value FROM offsets
             WHERE chain_uuid = ? AND kind = ? AND block_number = ?",
        )
        .bind(&key.chain_uuid)
        .bind(key.kind.as_str())
        .bind(block_column(key)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|r| from_sql(r.get::<i64, _>("value"))).transpose()
    }

    /// Upsert `value` under `key`. With `monotonic`, a lower value never
    /// replaces a higher one.
    async fn store(&self, key: &OffsetKey, value: u64, monotonic: bool) -> Result<(), TailError> {
        let sql = if monotonic {
            "INSERT INTO offsets (chain_uuid, kind, block_number, value, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chain_uuid, kind, block_number) DO UPDATE SET
                value      = MAX(offsets.value, excluded.value),
                updated_at = excluded.updated_at"
        } else {
            "INSERT INTO offsets (chain_uuid, kind, block_number, value, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chain_uuid, kind, block_number) DO UPDATE SET
                value      = excluded.value,
                updated_at = excluded.updated_at"
        };

        sqlx::query(sql)
            .bind(&key.chain_uuid)
            .bind(key.kind.as_str())
            .bind(block_column(key)?)
            .bind(to_sql(value)?)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        debug!(key = %key, value, "offset stored");
        Ok(())
    }

    /// Remove every offset of `chain_uuid`. Returns the number of deleted rows.
    pub async fn clear_chain(&self, chain_uuid: &str) -> Result<u64, TailError> {
        let result = sqlx::query("DELETE FROM offsets WHERE chain_uuid = ?")
            .bind(chain_uuid)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    /// Drop transaction indexes of blocks before `block` for `chain_uuid`.
    pub async fn prune_tx_indexes(&self, chain_uuid: &str, block: u64) -> Result<u64, TailError> {
        let result = sqlx::query(
            "DELETE FROM offsets WHERE chain_uuid = ? AND kind = ? AND block_number < ?",
        )
        .bind(chain_uuid)
        .bind(OffsetKind::LastTxIndex.as_str())
        .bind(to_sql(block)?)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OffsetManager for SqliteOffsetManager {
    async fn last_block_number(&self, chain: &Chain) -> Result<Option<u64>, TailError> {
        self.load(&OffsetKey::last_block(chain)).await
    }

    async fn set_last_block_number(&self, chain: &Chain, block: u64) -> Result<(), TailError> {
        self.store(&OffsetKey::last_block(chain), block, true).await
    }

    async fn last_tx_index(&self, chain: &Chain, block: u64) -> Result<Option<u64>, TailError> {
        self.load(&OffsetKey::last_tx_index(chain, block)).await
    }

    async fn set_last_tx_index(
        &self,
        chain: &Chain,
        block: u64,
        index: u64,
    ) -> Result<(), TailError> {
        self.store(&OffsetKey::last_tx_index(chain, block), index, false)
            .await?;
        // Only the newest block's index is ever read back.
        self.prune_tx_indexes(&chain.uuid, block).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_offsets_are_none() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), None);
        assert_eq!(offsets.last_tx_index(&chain, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_block_is_monotonic() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");

        offsets.set_last_block_number(&chain, 100).await.unwrap();
        offsets.set_last_block_number(&chain, 99).await.unwrap();
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), Some(100));

        offsets.set_last_block_number(&chain, 101).await.unwrap();
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn tx_index_is_overwritten_per_block() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");

        offsets.set_last_tx_index(&chain, 7, 4).await.unwrap();
        offsets.set_last_tx_index(&chain, 7, 2).await.unwrap();
        assert_eq!(offsets.last_tx_index(&chain, 7).await.unwrap(), Some(2));

        offsets.set_last_tx_index(&chain, 8, 0).await.unwrap();
        offsets.set_last_tx_index(&chain, 8, 3).await.unwrap();

        assert_eq!(offsets.last_tx_index(&chain, 7).await.unwrap(), None);
        assert_eq!(offsets.last_tx_index(&chain, 8).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn tx_index_rows_do_not_accumulate() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");
        let other = Chain::new("c2", "http://node");

        offsets.set_last_tx_index(&other, 1, 0).await.unwrap();
        for block in 1..=100 {
            offsets.set_last_block_number(&chain, block).await.unwrap();
            offsets.set_last_tx_index(&chain, block, 4).await.unwrap();
        }

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offsets")
            .fetch_one(&offsets.pool)
            .await
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(offsets.last_tx_index(&chain, 100).await.unwrap(), Some(4));
        assert_eq!(offsets.last_tx_index(&other, 1).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn offsets_beyond_i64_are_rejected() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");

        let err = offsets
            .set_last_block_number(&chain, u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, TailError::Offset(_)));
        assert!(matches!(
            offsets.last_tx_index(&chain, u64::MAX).await,
            Err(TailError::Offset(_))
        ));
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prune_and_clear() {
        let offsets = SqliteOffsetManager::in_memory().await.unwrap();
        let chain = Chain::new("c1", "http://node");

        offsets.set_last_block_number(&chain, 9).await.unwrap();
        offsets.set_last_tx_index(&chain, 9, 1).await.unwrap();

        assert_eq!(offsets.prune_tx_indexes("c1", 9).await.unwrap(), 0);
        assert_eq!(offsets.prune_tx_indexes("c1", 10).await.unwrap(), 1);
        assert_eq!(offsets.last_tx_index(&chain, 9).await.unwrap(), None);
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), Some(9));

        offsets.set_last_tx_index(&chain, 10, 0).await.unwrap();
        assert_eq!(offsets.clear_chain("c1").await.unwrap(), 2);
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), None);
    }
}
