use crate::clock::Clock;
use crate::db::repo::{Abort, RegistryStore, RegistryTx};
use crate::error::{AppResult, RenameError};
use crate::models::{ClaimRecord, ClaimWrite, OwnerId, OwnerRecord, OwnerWrite, ValidatedName};
use crate::services::cooldown::CooldownPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameOutcome {
    /// Display name in effect after the call
    pub username: String,
    /// False when the request matched the current name and nothing was written
    #[serde(skip)]
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub owner: OwnerRecord,
    pub next_rename_at: Option<DateTime<Utc>>,
}

impl From<Abort<RenameError>> for RenameError {
    fn from(abort: Abort<RenameError>) -> Self {
        match abort {
            Abort::Rejected(e) => e,
            Abort::Store(e) => RenameError::Store(e),
        }
    }
}

/// Claims and renames usernames. The only writer of owner and claim records.
pub struct RenameService<S: RegistryStore> {
    store: Arc<S>,
    policy: CooldownPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: RegistryStore> RenameService<S> {
    pub fn new(store: Arc<S>, policy: CooldownPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, policy, clock }
    }

    /// Claims `raw` for `caller`, releasing the caller's previous name.
    ///
    /// `raw` is `None` when the request carried no string at all. Format problems are reported
    /// before the store is touched.
    pub async fn rename(&self, caller: &OwnerId, raw: Option<&str>) -> AppResult<RenameOutcome> {
        let name = ValidatedName::parse(raw)?;

        let uid = caller.clone();
        let policy = self.policy;
        let clock = self.clock.clone();
        let result = self
            .store
            .run_atomic(move |tx| {
                let (uid, name, clock) = (uid.clone(), name.clone(), clock.clone());
                Box::pin(async move { apply_rename(tx, &uid, &name, &policy, clock.now()).await })
            })
            .await;

        match result {
            Ok(outcome) if outcome.changed => {
                tracing::info!(uid = %caller, username = %outcome.username, "username claimed");
                Ok(outcome)
            }
            Ok(outcome) => {
                tracing::debug!(uid = %caller, username = %outcome.username, "username unchanged");
                Ok(outcome)
            }
            Err(Abort::Rejected(e)) => {
                tracing::debug!(uid = %caller, code = e.code(), error = %e, "rename rejected");
                Err(e)
            }
            Err(Abort::Store(e)) => {
                tracing::error!(uid = %caller, error = %e, "rename failed in store");
                Err(RenameError::Store(e))
            }
        }
    }

    /// Who currently holds `raw`, if anyone.
    pub async fn resolve(&self, raw: Option<&str>) -> AppResult<Option<ClaimRecord>> {
        let name = ValidatedName::parse(raw)?;

        let claim = self
            .store
            .run_atomic(move |tx| {
                let key = name.lower().clone();
                Box::pin(async move { Ok::<_, Abort<RenameError>>(tx.get_claim(&key).await?) })
            })
            .await?;

        Ok(claim)
    }

    pub async fn profile(&self, caller: &OwnerId) -> AppResult<Option<Profile>> {
        let uid = caller.clone();
        let owner = self
            .store
            .run_atomic(move |tx| {
                let uid = uid.clone();
                Box::pin(async move { Ok::<_, Abort<RenameError>>(tx.get_owner(&uid).await?) })
            })
            .await?;

        Ok(owner.map(|owner| Profile {
            next_rename_at: self.policy.next_allowed_at(owner.last_rename_at),
            owner,
        }))
    }
}

async fn apply_rename(
    tx: &mut dyn RegistryTx,
    uid: &OwnerId,
    name: &ValidatedName,
    policy: &CooldownPolicy,
    now: DateTime<Utc>,
) -> Result<RenameOutcome, Abort<RenameError>> {
    let owner = tx.get_owner(uid).await?;
    let previous_key = owner.as_ref().map(|o| o.normalized_key.clone());

    // Same key, any casing: keep what is stored and write nothing
    if previous_key.as_ref() == Some(name.lower()) {
        let username = owner
            .map(|o| o.display_name)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| name.literal().to_string());
        return Ok(RenameOutcome {
            username,
            changed: false,
        });
    }

    let last_rename_at = owner.as_ref().and_then(|o| o.last_rename_at);
    let eligibility = policy.check_eligible(last_rename_at, now);
    if let Some(remaining_days) = eligibility.remaining_days() {
        return Err(Abort::Rejected(RenameError::CooldownActive { remaining_days }));
    }

    if let Some(claim) = tx.get_claim(name.lower()).await? {
        if &claim.owner_id != uid {
            return Err(Abort::Rejected(RenameError::AlreadyTaken));
        }
    }

    let at = tx.commit_timestamp();
    tx.put_claim(
        name.lower(),
        ClaimWrite {
            owner_id: uid.clone(),
            display_name: name.literal().to_string(),
            claimed_at: at,
        },
    )
    .await?;

    tx.put_owner(
        uid,
        OwnerWrite {
            display_name: name.literal().to_string(),
            normalized_key: name.lower().clone(),
            last_rename_at: at,
        },
    )
    .await?;

    if let Some(old) = previous_key.filter(|k| k != name.lower()) {
        tx.delete_claim(&old).await?;
    }

    Ok(RenameOutcome {
        username: name.literal().to_string(),
        changed: true,
    })
}
