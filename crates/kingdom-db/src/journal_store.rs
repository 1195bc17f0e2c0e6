//! Archive of the double-entry journal.
//!
//! Entries are appended in `UNNEST` batches, one transaction per batch.
//! Re-sending an entry that is already stored is a no-op, so a flush that
//! failed half way can simply be retried.

use chrono::{DateTime, Utc};
use kingdom_types::{Account, Asset, EntryKind, LedgerEntry, LedgerEntryId, Resource, Tool};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, to_bigint};

/// Default entries per insert.
const DEFAULT_BATCH_SIZE: usize = 500;

/// Reads and writes the `journal` table.
pub struct JournalStore<'a> {
    pool: &'a PgPool,
    batch_size: usize,
}

impl<'a> JournalStore<'a> {
    /// Bind to a pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Insert at most `size` entries per statement.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Append entries, skipping any already stored.
    ///
    /// Returns how many rows were new.
    pub async fn append(&self, entries: &[LedgerEntry]) -> Result<u64, DbError> {
        let mut inserted = 0_u64;
        for chunk in entries.chunks(self.batch_size) {
            let len = chunk.len();
            let mut ids = Vec::with_capacity(len);
            let mut assets = Vec::with_capacity(len);
            let mut from_accounts = Vec::with_capacity(len);
            let mut from_ids: Vec<Option<Uuid>> = Vec::with_capacity(len);
            let mut to_accounts = Vec::with_capacity(len);
            let mut to_ids: Vec<Option<Uuid>> = Vec::with_capacity(len);
            let mut amounts = Vec::with_capacity(len);
            let mut kinds = Vec::with_capacity(len);
            let mut references: Vec<Option<Uuid>> = Vec::with_capacity(len);
            let mut timestamps = Vec::with_capacity(len);

            for entry in chunk {
                let (from_account, from_id) = account_to_db(entry.from);
                let (to_account, to_id) = account_to_db(entry.to);
                ids.push(entry.id.into_inner());
                assets.push(asset_to_db(entry.asset));
                from_accounts.push(from_account);
                from_ids.push(from_id);
                to_accounts.push(to_account);
                to_ids.push(to_id);
                amounts.push(to_bigint("journal amount", entry.amount)?);
                kinds.push(entry.kind.tag());
                references.push(entry.reference_id);
                timestamps.push(entry.created_at);
            }

            let mut tx = self.pool.begin().await?;
            let done = sqlx::query(
                r"INSERT INTO journal (id, asset, from_account, from_id, to_account, to_id, amount, kind, reference_id, created_at)
                  SELECT * FROM UNNEST($1::UUID[], $2::TEXT[], $3::TEXT[], $4::UUID[], $5::TEXT[], $6::UUID[], $7::BIGINT[], $8::TEXT[], $9::UUID[], $10::TIMESTAMPTZ[])
                  ON CONFLICT (id) DO NOTHING",
            )
            .bind(&ids)
            .bind(&assets)
            .bind(&from_accounts)
            .bind(&from_ids)
            .bind(&to_accounts)
            .bind(&to_ids)
            .bind(&amounts)
            .bind(&kinds)
            .bind(&references)
            .bind(&timestamps)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            inserted = inserted.saturating_add(done.rows_affected());
        }
        debug!(sent = entries.len(), inserted, "Journal entries archived");
        Ok(inserted)
    }

    /// Entries that debit or credit `account`, oldest first.
    pub async fn entries_for(&self, account: Account) -> Result<Vec<LedgerEntry>, DbError> {
        let (kind, id) = account_to_db(account);
        let rows = sqlx::query_as::<_, JournalRow>(
            r"SELECT id, asset, from_account, from_id, to_account, to_id, amount, kind, reference_id, created_at
              FROM journal
              WHERE (from_account = $1 AND from_id IS NOT DISTINCT FROM $2)
                 OR (to_account = $1 AND to_id IS NOT DISTINCT FROM $2)
              ORDER BY created_at, id",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(JournalRow::into_entry).collect()
    }

    /// Entries stamped with `reference`, such as one job's delivery and
    /// reward.
    pub async fn entries_by_reference(&self, reference: Uuid) -> Result<Vec<LedgerEntry>, DbError> {
        let rows = sqlx::query_as::<_, JournalRow>(
            r"SELECT id, asset, from_account, from_id, to_account, to_id, amount, kind, reference_id, created_at
              FROM journal
              WHERE reference_id = $1
              ORDER BY created_at, id",
        )
        .bind(reference)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(JournalRow::into_entry).collect()
    }

    /// Number of archived entries.
    pub async fn count(&self) -> Result<u64, DbError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM journal")
            .fetch_one(self.pool)
            .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

/// A row of the `journal` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JournalRow {
    /// Entry id.
    pub id: Uuid,
    /// Encoded asset, see [`asset_to_db`].
    pub asset: String,
    /// Debited account kind.
    pub from_account: String,
    /// Debited account owner, if the kind has one.
    pub from_id: Option<Uuid>,
    /// Credited account kind.
    pub to_account: String,
    /// Credited account owner, if the kind has one.
    pub to_id: Option<Uuid>,
    /// Units moved.
    pub amount: i64,
    /// Entry kind tag.
    pub kind: String,
    /// Related entity.
    pub reference_id: Option<Uuid>,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

impl JournalRow {
    /// Decode back into a [`LedgerEntry`].
    pub fn into_entry(self) -> Result<LedgerEntry, DbError> {
        let amount = u64::try_from(self.amount)
            .ok()
            .ok_or_else(|| DbError::corrupt("journal", format!("amount {}", self.amount)))?;
        let kind = EntryKind::from_tag(&self.kind)
            .ok_or_else(|| DbError::corrupt("journal", format!("kind {}", self.kind)))?;
        Ok(LedgerEntry {
            id: LedgerEntryId::from(self.id),
            asset: asset_from_db(&self.asset)?,
            from: account_from_db(&self.from_account, self.from_id)?,
            to: account_from_db(&self.to_account, self.to_id)?,
            amount,
            kind,
            reference_id: self.reference_id,
            created_at: self.created_at,
        })
    }
}

/// `gold`, `resource:<storage key>`, or `tool:<name>`.
pub fn asset_to_db(asset: Asset) -> String {
    match asset {
        Asset::Gold => "gold".to_owned(),
        Asset::Resource(r) => format!("resource:{}", r.storage_key()),
        Asset::Tool(t) => format!("tool:{}", t.name()),
    }
}

/// Inverse of [`asset_to_db`].
pub fn asset_from_db(value: &str) -> Result<Asset, DbError> {
    let parsed = match value.split_once(':') {
        None if value == "gold" => Some(Asset::Gold),
        Some(("resource", key)) => Resource::from_storage_key(key).map(Asset::Resource),
        Some(("tool", name)) => Tool::parse(name).map(Asset::Tool),
        _ => None,
    };
    parsed.ok_or_else(|| DbError::corrupt("journal", format!("asset {value}")))
}

/// Account kind plus the owning entity id, if any.
pub fn account_to_db(account: Account) -> (&'static str, Option<Uuid>) {
    match account {
        Account::Player(p) => ("player", Some(p.into_inner())),
        Account::Treasury(s) => ("treasury", Some(s.into_inner())),
        Account::Stock(s) => ("stock", Some(s.into_inner())),
        Account::Market(s) => ("market", Some(s.into_inner())),
        Account::World => ("world", None),
        Account::Void => ("void", None),
    }
}

/// Inverse of [`account_to_db`].
pub fn account_from_db(kind: &str, id: Option<Uuid>) -> Result<Account, DbError> {
    let account = match (kind, id) {
        ("player", Some(id)) => Some(Account::Player(id.into())),
        ("treasury", Some(id)) => Some(Account::Treasury(id.into())),
        ("stock", Some(id)) => Some(Account::Stock(id.into())),
        ("market", Some(id)) => Some(Account::Market(id.into())),
        ("world", None) => Some(Account::World),
        ("void", None) => Some(Account::Void),
        _ => None,
    };
    account.ok_or_else(|| DbError::corrupt("journal", format!("account {kind} {id:?}")))
}
