//! Hysteresis tracker
//!
//! Turns a stream of per-cycle eligibility signals into a debounced status.
//! Each user has a counter in `[0, N]`: a positive signal moves it up, a
//! negative one down. The status only flips when the counter hits an end:
//! `valid` at N, `invalid` at 0. In between, the last status sticks.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::handlers::registration::UserId;
use crate::storage::{Persistence, StoreError, load_or_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Valid,
    Invalid,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Valid => f.write_str("valid"),
            Status::Invalid => f.write_str("invalid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRecord {
    pub status: Status,
    pub counter: u32,
}

impl Default for EligibilityRecord {
    /// Newly observed users start ineligible and must climb the full threshold.
    fn default() -> Self {
        Self {
            status: Status::Invalid,
            counter: 0,
        }
    }
}

impl EligibilityRecord {
    /// Apply one cycle's signal.
    ///
    /// A counter left above `threshold` by an earlier, larger threshold is
    /// clamped first.
    pub fn apply(self, eligible_now: bool, threshold: NonZeroU32) -> Self {
        let n = threshold.get();
        let counter = self.counter.min(n);

        if eligible_now {
            let counter = (counter + 1).min(n);
            let status = if counter == n {
                Status::Valid
            } else {
                self.status
            };
            Self { status, counter }
        } else {
            let counter = counter.saturating_sub(1);
            let status = if counter == 0 {
                Status::Invalid
            } else {
                self.status
            };
            Self { status, counter }
        }
    }
}

/// Persisted table: user → record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EligibilityTable(BTreeMap<UserId, EligibilityRecord>);

impl Deref for EligibilityTable {
    type Target = BTreeMap<UserId, EligibilityRecord>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for EligibilityTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(UserId, EligibilityRecord)> for EligibilityTable {
    fn from_iter<I: IntoIterator<Item = (UserId, EligibilityRecord)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Older deployments wrote bare statuses keyed by user id, with the counters
/// in a separate `counters` map: `{"101": "valid", "counters": {"101": 3}}`.
#[derive(Deserialize)]
struct LegacyTable {
    #[serde(default)]
    counters: BTreeMap<UserId, u32>,
    #[serde(flatten)]
    statuses: BTreeMap<UserId, Status>,
}

impl From<LegacyTable> for EligibilityTable {
    fn from(legacy: LegacyTable) -> Self {
        let LegacyTable {
            counters,
            mut statuses,
        } = legacy;

        let mut table: EligibilityTable = counters
            .into_iter()
            .map(|(user, counter)| {
                let status = statuses.remove(&user).unwrap_or(Status::Invalid);
                (user, EligibilityRecord { status, counter })
            })
            .collect();
        for (user, status) in statuses {
            table.insert(user, EligibilityRecord { status, counter: 0 });
        }
        table
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTable {
    Records(BTreeMap<UserId, EligibilityRecord>),
    Legacy(LegacyTable),
}

impl<'de> Deserialize<'de> for EligibilityTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match StoredTable::deserialize(deserializer)? {
            StoredTable::Records(records) => Ok(Self(records)),
            StoredTable::Legacy(legacy) => {
                log::info!("[tracker] Converting legacy status file layout");
                Ok(legacy.into())
            }
        }
    }
}

pub struct HysteresisTracker {
    threshold: NonZeroU32,
    store: Arc<dyn Persistence<EligibilityTable>>,
    records: Mutex<EligibilityTable>,
}

impl HysteresisTracker {
    pub async fn load(
        threshold: NonZeroU32,
        store: Arc<dyn Persistence<EligibilityTable>>,
    ) -> Self {
        let records: EligibilityTable = load_or_default(store.as_ref()).await;
        log::info!(
            "[tracker] Loaded {} eligibility records (threshold {})",
            records.len(),
            threshold
        );
        Self {
            threshold,
            store,
            records: Mutex::new(records),
        }
    }

    pub fn threshold(&self) -> NonZeroU32 {
        self.threshold
    }

    /// Apply one signal and persist it.
    pub async fn update(
        &self,
        user: UserId,
        eligible_now: bool,
    ) -> Result<EligibilityRecord, StoreError> {
        let mut updated = self.update_batch(vec![(user, eligible_now)]).await?;
        Ok(updated.pop().map(|(_, record)| record).unwrap_or_default())
    }

    /// Apply one cycle's signals for many users and persist them in one save.
    ///
    /// Updates are computed on a copy and only committed once the save
    /// succeeds, so a failed write leaves both memory and storage on the
    /// previous cycle.
    pub async fn update_batch(
        &self,
        signals: Vec<(UserId, bool)>,
    ) -> Result<Vec<(UserId, EligibilityRecord)>, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let mut updated = Vec::with_capacity(signals.len());

        for (user, eligible_now) in signals {
            let prior = next.get(&user).copied().unwrap_or_default();
            let record = prior.apply(eligible_now, self.threshold);

            if prior.status != record.status {
                log::info!(
                    "[tracker] User {} status {} -> {} (counter {})",
                    user,
                    prior.status,
                    record.status,
                    record.counter
                );
            } else {
                log::debug!(
                    "[tracker] User {} status {} counter {} -> {}",
                    user,
                    record.status,
                    prior.counter,
                    record.counter
                );
            }

            next.insert(user, record);
            updated.push((user, record));
        }

        self.store.save(&next).await?;
        *records = next;

        Ok(updated)
    }

    pub async fn get(&self, user: UserId) -> Option<EligibilityRecord> {
        self.records.lock().await.get(&user).copied()
    }

    pub async fn snapshot(&self) -> EligibilityTable {
        self.records.lock().await.clone()
    }
}
