//! SQLite index and checkpoint store.
//!
//! Persists the event journal, account projection, recorded headers, writer
//! claim and checkpoint to a single SQLite file. Every batch and every
//! rollback is one transaction: the checkpoint row is written last inside it,
//! so a crash at any point leaves either the whole batch or none of it.
//!
//! # Usage
//! ```rust,no_run
//! use indexflow_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use indexflow_core::checkpoint::{ensure_claim, ensure_expected};
use indexflow_core::{
    AccountRecord, ApplyOutcome, BlockRef, Checkpoint, CheckpointStore, Commit, DomainEvent,
    EventKind, IndexReader, IndexStore, IndexerError, Provenance, RetractOutcome,
    RetractionRecord, Rollback, UsageProof, WriterClaim,
};

use crate::Fault;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoint (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        height     INTEGER NOT NULL,
        block_hash TEXT    NOT NULL,
        updated_at INTEGER NOT NULL,
        revision   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS writer_claim (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        owner      TEXT,
        epoch      INTEGER NOT NULL,
        claimed_at INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS block_refs (
        number      INTEGER PRIMARY KEY,
        hash        TEXT    NOT NULL,
        parent_hash TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS events (
        block_hash   TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        tx_hash      TEXT    NOT NULL,
        address      TEXT    NOT NULL,
        account      TEXT    NOT NULL,
        kind         TEXT    NOT NULL,
        payload      TEXT    NOT NULL,
        applied_at   INTEGER NOT NULL,
        retracted_at INTEGER,
        PRIMARY KEY (block_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number, log_index);",
    "CREATE INDEX IF NOT EXISTS idx_events_account ON events (account, kind);",
    "CREATE TABLE IF NOT EXISTS accounts (
        account         TEXT    PRIMARY KEY,
        deposited       TEXT    NOT NULL,
        withdrawn       TEXT    NOT NULL,
        slashed         TEXT    NOT NULL,
        rewards_claimed TEXT    NOT NULL,
        usage_proofs    INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS retractions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        from_height  INTEGER NOT NULL,
        to_height    INTEGER NOT NULL,
        events       INTEGER NOT NULL,
        retracted_at INTEGER NOT NULL
    );",
];

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn hex<T: std::fmt::LowerHex>(v: &T) -> String {
    format!("{v:#x}")
}

fn parse<T: FromStr>(s: &str, what: &str) -> Result<T, IndexerError>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| IndexerError::Storage(format!("bad {what} {s:?} in database: {e}")))
}

/// SQLite-backed [`IndexStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    fault: Mutex<Option<Fault>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the store is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Each connection to `:memory:` is its own database, so pin the pool
        // to a single connection that never expires.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, IndexerError> {
        let store = Self {
            pool,
            fault: Mutex::new(None),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        for stmt in SCHEMA {
            sqlx::query(*stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Fail the next write at `fault`, rolling its transaction back.
    pub fn inject_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    fn take_fault(&self, fault: Fault) -> Result<(), IndexerError> {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if *slot == Some(fault) {
            *slot = None;
            return Err(IndexerError::Storage(format!("injected fault: {fault}")));
        }
        Ok(())
    }

    /// Number of journaled events, including retracted ones.
    pub async fn journal_len(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    /// Live events in `(height, log_index)` order.
    pub async fn live_events(&self) -> Result<Vec<DomainEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_hash, log_index, block_number, tx_hash, address, payload
             FROM events WHERE retracted_at IS NULL
             ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(event_from_row).collect()
    }
}

// ─── Row helpers ──────────────────────────────────────────────────────────────

fn event_from_row(row: &SqliteRow) -> Result<DomainEvent, IndexerError> {
    let payload: String = row.get("payload");
    let kind: EventKind = serde_json::from_str(&payload)
        .map_err(|e| IndexerError::Storage(format!("bad event payload: {e}")))?;
    Ok(DomainEvent {
        provenance: Provenance {
            block_number: row.get::<i64, _>("block_number") as u64,
            block_hash: parse(&row.get::<String, _>("block_hash"), "block hash")?,
            tx_hash: parse(&row.get::<String, _>("tx_hash"), "tx hash")?,
            log_index: row.get::<i64, _>("log_index") as u64,
        },
        address: parse(&row.get::<String, _>("address"), "address")?,
        kind,
    })
}

fn kind_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::StakeDeposited { .. } => "stake_deposited",
        EventKind::StakeWithdrawn { .. } => "stake_withdrawn",
        EventKind::StakeSlashed { .. } => "stake_slashed",
        EventKind::RewardsClaimed { .. } => "rewards_claimed",
        EventKind::UsageProofSubmitted { .. } => "usage_proof_submitted",
    }
}

async fn read_checkpoint(conn: &mut SqliteConnection) -> Result<Option<Checkpoint>, IndexerError> {
    let row = sqlx::query("SELECT height, block_hash, updated_at FROM checkpoint WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    row.map(|r| {
        Ok(Checkpoint {
            height: r.get::<i64, _>("height") as u64,
            block_hash: parse(&r.get::<String, _>("block_hash"), "block hash")?,
            updated_at: r.get("updated_at"),
        })
    })
    .transpose()
}

async fn write_checkpoint(
    conn: &mut SqliteConnection,
    cp: Option<&Checkpoint>,
) -> Result<(), IndexerError> {
    match cp {
        Some(cp) => {
            sqlx::query(
                "INSERT INTO checkpoint (id, height, block_hash, updated_at, revision)
                 VALUES (1, ?, ?, ?, 1)
                 ON CONFLICT(id) DO UPDATE SET
                    height = excluded.height,
                    block_hash = excluded.block_hash,
                    updated_at = excluded.updated_at,
                    revision = checkpoint.revision + 1",
            )
            .bind(cp.height as i64)
            .bind(hex(&cp.block_hash))
            .bind(cp.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            debug!(height = cp.height, hash = %cp.block_hash, "checkpoint saved");
        }
        None => {
            sqlx::query("DELETE FROM checkpoint WHERE id = 1")
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            debug!("checkpoint cleared");
        }
    }
    Ok(())
}

async fn read_claim(conn: &mut SqliteConnection) -> Result<Option<WriterClaim>, IndexerError> {
    let row = sqlx::query("SELECT owner, epoch FROM writer_claim WHERE id = 1 AND owner IS NOT NULL")
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(|r| WriterClaim {
        owner: r.get("owner"),
        epoch: r.get::<i64, _>("epoch") as u64,
    }))
}

fn account_from_row(r: &SqliteRow) -> Result<AccountRecord, IndexerError> {
    Ok(AccountRecord {
        deposited: parse(&r.get::<String, _>("deposited"), "amount")?,
        withdrawn: parse(&r.get::<String, _>("withdrawn"), "amount")?,
        slashed: parse(&r.get::<String, _>("slashed"), "amount")?,
        rewards_claimed: parse(&r.get::<String, _>("rewards_claimed"), "amount")?,
        usage_proofs: r.get::<i64, _>("usage_proofs") as u64,
    })
}

async fn load_account(
    conn: &mut SqliteConnection,
    account: &Address,
) -> Result<Option<AccountRecord>, IndexerError> {
    let row = sqlx::query(
        "SELECT deposited, withdrawn, slashed, rewards_claimed, usage_proofs
         FROM accounts WHERE account = ?",
    )
    .bind(hex(account))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    row.as_ref().map(account_from_row).transpose()
}

async fn store_accounts(
    conn: &mut SqliteConnection,
    accounts: HashMap<Address, AccountRecord>,
) -> Result<(), IndexerError> {
    for (account, record) in accounts {
        if record.is_empty() {
            sqlx::query("DELETE FROM accounts WHERE account = ?")
                .bind(hex(&account))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            continue;
        }
        sqlx::query(
            "INSERT OR REPLACE INTO accounts
             (account, deposited, withdrawn, slashed, rewards_claimed, usage_proofs)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(hex(&account))
        .bind(record.deposited.to_string())
        .bind(record.withdrawn.to_string())
        .bind(record.slashed.to_string())
        .bind(record.rewards_claimed.to_string())
        .bind(record.usage_proofs as i64)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

/// Accounts touched by a batch, loaded lazily and written back once.
#[derive(Default)]
struct Touched(HashMap<Address, AccountRecord>);

impl Touched {
    async fn get(
        &mut self,
        conn: &mut SqliteConnection,
        account: Address,
    ) -> Result<&mut AccountRecord, IndexerError> {
        if !self.0.contains_key(&account) {
            let record = load_account(conn, &account).await?.unwrap_or_default();
            self.0.insert(account, record);
        }
        Ok(self.0.entry(account).or_default())
    }
}

// ─── CheckpointStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(&self) -> Result<Option<Checkpoint>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        read_checkpoint(&mut conn).await
    }

    async fn claim(&self, owner: &str) -> Result<WriterClaim, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO writer_claim (id, owner, epoch, claimed_at) VALUES (1, ?, 1, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                epoch = writer_claim.epoch + 1,
                claimed_at = excluded.claimed_at",
        )
        .bind(owner)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let claim = read_claim(&mut tx)
            .await?
            .ok_or_else(|| IndexerError::Storage("writer claim vanished".into()))?;
        tx.commit().await.map_err(db_err)?;
        debug!(owner, epoch = claim.epoch, "writer claim taken");
        Ok(claim)
    }

    async fn current_claim(&self) -> Result<Option<WriterClaim>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        read_claim(&mut conn).await
    }

    async fn release(&self, claim: &WriterClaim) -> Result<(), IndexerError> {
        sqlx::query("UPDATE writer_claim SET owner = NULL WHERE id = 1 AND owner = ? AND epoch = ?")
            .bind(&claim.owner)
            .bind(claim.epoch as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save(
        &self,
        claim: &WriterClaim,
        expected: Option<&Checkpoint>,
        next: Checkpoint,
    ) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        ensure_claim(read_claim(&mut tx).await?.as_ref(), claim)?;
        ensure_expected(read_checkpoint(&mut tx).await?.as_ref(), expected)?;
        self.take_fault(Fault::BeforeCheckpointWrite)?;
        write_checkpoint(&mut tx, Some(&next)).await?;
        tx.commit().await.map_err(db_err)
    }
}

// ─── IndexReader impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexReader for SqliteStore {
    async fn account(&self, account: Address) -> Result<Option<AccountRecord>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_account(&mut conn, &account).await
    }

    async fn usage_proofs(&self, account: Address) -> Result<Vec<UsageProof>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_hash, log_index, block_number, tx_hash, address, payload
             FROM events
             WHERE account = ? AND kind = 'usage_proof_submitted' AND retracted_at IS NULL
             ORDER BY block_number, log_index",
        )
        .bind(hex(&account))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut proofs = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(p) = UsageProof::from_event(&event_from_row(row)?) {
                proofs.push(p);
            }
        }
        Ok(proofs)
    }

    async fn usage_proofs_since(
        &self,
        account: Address,
        from_height: u64,
    ) -> Result<u64, IndexerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM events
             WHERE account = ? AND kind = 'usage_proof_submitted'
               AND retracted_at IS NULL AND block_number >= ?",
        )
        .bind(hex(&account))
        .bind(from_height as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn total_staked(&self) -> Result<U256, IndexerError> {
        let rows = sqlx::query(
            "SELECT deposited, withdrawn, slashed, rewards_claimed, usage_proofs FROM accounts",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut total = U256::ZERO;
        for row in &rows {
            total = total.saturating_add(account_from_row(row)?.staked());
        }
        Ok(total)
    }
}

// ─── IndexStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn apply(&self, claim: &WriterClaim, commit: Commit) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        ensure_claim(read_claim(&mut tx).await?.as_ref(), claim)?;
        let current = read_checkpoint(&mut tx).await?;

        if current.as_ref().is_some_and(|c| c.same_position(&commit.next)) {
            let mut live = 0u64;
            for e in &commit.events {
                if event_state(&mut tx, e).await? == Some(true) {
                    live += 1;
                }
            }
            if live == commit.events.len() as u64 {
                return Ok(ApplyOutcome {
                    applied: 0,
                    duplicates: live,
                });
            }
        }
        ensure_expected(current.as_ref(), commit.expected.as_ref())?;
        commit.validate()?;

        let now = chrono::Utc::now().timestamp();
        let mut touched = Touched::default();
        let mut outcome = ApplyOutcome::default();

        for event in &commit.events {
            match event_state(&mut tx, event).await? {
                Some(true) => {
                    outcome.duplicates += 1;
                    continue;
                }
                Some(false) => {
                    sqlx::query(
                        "UPDATE events SET retracted_at = NULL, applied_at = ?
                         WHERE block_hash = ? AND log_index = ?",
                    )
                    .bind(now)
                    .bind(hex(&event.provenance.block_hash))
                    .bind(event.provenance.log_index as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                None => insert_event(&mut tx, event, now).await?,
            }
            touched.get(&mut tx, event.kind.account()).await?.apply(&event.kind);
            outcome.applied += 1;
        }
        store_accounts(&mut tx, touched.0).await?;

        for block in &commit.blocks {
            sqlx::query("INSERT OR REPLACE INTO block_refs (number, hash, parent_hash) VALUES (?, ?, ?)")
                .bind(block.number as i64)
                .bind(hex(&block.hash))
                .bind(hex(&block.parent_hash))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        sqlx::query("DELETE FROM block_refs WHERE number < ?")
            .bind(commit.retain_from as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        self.take_fault(Fault::BeforeCheckpointWrite)?;
        write_checkpoint(&mut tx, Some(&commit.next)).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    async fn retract(
        &self,
        claim: &WriterClaim,
        rollback: Rollback,
    ) -> Result<RetractOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        ensure_claim(read_claim(&mut tx).await?.as_ref(), claim)?;
        let current = read_checkpoint(&mut tx).await?;
        let already = match (&current, &rollback.to) {
            (None, None) => true,
            (Some(c), Some(t)) => c.same_position(t),
            _ => false,
        };
        if already {
            return Ok(RetractOutcome::default());
        }
        ensure_expected(current.as_ref(), Some(&rollback.expected))?;

        let from = rollback.from_height();
        let rows = sqlx::query(
            "SELECT block_hash, log_index, block_number, tx_hash, address, payload
             FROM events WHERE retracted_at IS NULL AND block_number >= ?
             ORDER BY block_number DESC, log_index DESC",
        )
        .bind(from as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let now = chrono::Utc::now().timestamp();
        let mut touched = Touched::default();
        for row in &rows {
            let event = event_from_row(row)?;
            touched.get(&mut tx, event.kind.account()).await?.revert(&event.kind);
        }
        store_accounts(&mut tx, touched.0).await?;

        sqlx::query("UPDATE events SET retracted_at = ? WHERE retracted_at IS NULL AND block_number >= ?")
            .bind(now)
            .bind(from as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM block_refs WHERE number >= ?")
            .bind(from as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "INSERT INTO retractions (from_height, to_height, events, retracted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(from as i64)
        .bind(rollback.expected.height as i64)
        .bind(rows.len() as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        self.take_fault(Fault::BeforeCheckpointWrite)?;
        write_checkpoint(&mut tx, rollback.to.as_ref()).await?;
        tx.commit().await.map_err(db_err)?;

        debug!(from, retracted = rows.len(), "rolled back storage");
        Ok(RetractOutcome {
            retracted: rows.len() as u64,
        })
    }

    async fn block_ref(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        let row = sqlx::query("SELECT number, hash, parent_hash FROM block_refs WHERE number = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(BlockRef {
                number: r.get::<i64, _>("number") as u64,
                hash: parse::<B256>(&r.get::<String, _>("hash"), "block hash")?,
                parent_hash: parse::<B256>(&r.get::<String, _>("parent_hash"), "block hash")?,
            })
        })
        .transpose()
    }

    async fn retractions(&self) -> Result<Vec<RetractionRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT from_height, to_height, events, retracted_at FROM retractions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|r| RetractionRecord {
                from_height: r.get::<i64, _>("from_height") as u64,
                to_height: r.get::<i64, _>("to_height") as u64,
                events: r.get::<i64, _>("events") as u64,
                retracted_at: r.get("retracted_at"),
            })
            .collect())
    }
}

/// `Some(true)` if live, `Some(false)` if retracted, `None` if never seen.
async fn event_state(
    conn: &mut SqliteConnection,
    event: &DomainEvent,
) -> Result<Option<bool>, IndexerError> {
    let row = sqlx::query("SELECT retracted_at FROM events WHERE block_hash = ? AND log_index = ?")
        .bind(hex(&event.provenance.block_hash))
        .bind(event.provenance.log_index as i64)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(|r| r.get::<Option<i64>, _>("retracted_at").is_none()))
}

async fn insert_event(
    conn: &mut SqliteConnection,
    event: &DomainEvent,
    now: i64,
) -> Result<(), IndexerError> {
    let payload =
        serde_json::to_string(&event.kind).map_err(|e| IndexerError::Storage(e.to_string()))?;
    sqlx::query(
        "INSERT INTO events
         (block_hash, log_index, block_number, tx_hash, address, account, kind, payload, applied_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(hex(&event.provenance.block_hash))
    .bind(event.provenance.log_index as i64)
    .bind(event.provenance.block_number as i64)
    .bind(hex(&event.provenance.tx_hash))
    .bind(hex(&event.address))
    .bind(hex(&event.kind.account()))
    .bind(kind_label(&event.kind))
    .bind(&payload)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
