use crate::db::DbResult;
use crate::models::types::{NormalizedKey, OwnerId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;

/// Placeholder for "the time this transaction commits".
///
/// Only a live transaction hands these out; the store replaces it with its own commit time when
/// the write is applied, so callers can write a timestamp but never choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitTimestamp(());

impl CommitTimestamp {
    pub(crate) fn issue() -> Self {
        Self(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRecord {
    /// Identity that owns this record
    pub id: OwnerId,
    /// Last accepted spelling, case preserved
    pub display_name: String,
    /// Lowercase form of `display_name`
    pub normalized_key: NormalizedKey,
    /// Commit time of the last successful rename
    pub last_rename_at: Option<DateTime<Utc>>,
}

impl OwnerRecord {
    pub fn try_from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            normalized_key: row.try_get("normalized_key")?,
            last_rename_at: row.try_get("last_rename_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub normalized_key: NormalizedKey,
    pub owner_id: OwnerId,
    /// Spelling at the time of the claim
    pub display_name: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn try_from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            normalized_key: row.try_get("normalized_key")?,
            owner_id: row.try_get("owner_id")?,
            display_name: row.try_get("display_name")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }
}

/// Fields merged into an owner record. The record is created when missing.
#[derive(Debug, Clone)]
pub struct OwnerWrite {
    pub display_name: String,
    pub normalized_key: NormalizedKey,
    pub last_rename_at: CommitTimestamp,
}

#[derive(Debug, Clone)]
pub struct ClaimWrite {
    pub owner_id: OwnerId,
    pub display_name: String,
    pub claimed_at: CommitTimestamp,
}

impl OwnerWrite {
    pub(crate) fn stamp(self, id: OwnerId, at: DateTime<Utc>) -> OwnerRecord {
        OwnerRecord {
            id,
            display_name: self.display_name,
            normalized_key: self.normalized_key,
            last_rename_at: Some(at),
        }
    }
}

impl ClaimWrite {
    pub(crate) fn stamp(self, key: NormalizedKey, at: DateTime<Utc>) -> ClaimRecord {
        ClaimRecord {
            normalized_key: key,
            owner_id: self.owner_id,
            display_name: self.display_name,
            claimed_at: at,
        }
    }
}
