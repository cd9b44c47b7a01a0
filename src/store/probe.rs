// Lockbox: Storage self-test
//
// `test_storage` claims a synthetic (identity, provider) pair that no real
// caller can hold, runs store -> get -> delete against it, and always removes
// the probe before returning, whatever happened in between.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::adapter::{StorageAdapter, StorageKind};
use super::models::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTestStage {
    Store,
    Get,
    Delete,
    Cleanup,
}

impl fmt::Display for SelfTestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Store => "store",
            Self::Get => "get",
            Self::Delete => "delete",
            Self::Cleanup => "cleanup",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelfTestOutcome {
    Passed,
    Failed { stage: SelfTestStage, reason: String },
    /// The adapter keeps no server-side secrets.
    Unsupported,
}

impl SelfTestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// A disposable probe pair, unique per call.
struct ProbeKey {
    identity: Identity,
    provider: String,
    value: String,
}

impl ProbeKey {
    fn acquire() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            identity: Identity::new(format!("lockbox-selftest+{}@probe.invalid", id)),
            provider: format!("selftest-{}", &id[..12]),
            value: format!("probe-{}", id),
        }
    }

    async fn exercise(&self, adapter: &dyn StorageAdapter) -> Result<(), (SelfTestStage, String)> {
        adapter
            .store_secret(&self.identity, &self.provider, &self.value)
            .await
            .map_err(|e| (SelfTestStage::Store, e.to_string()))?;

        let read = adapter
            .get_secret(&self.identity, &self.provider)
            .await
            .map_err(|e| (SelfTestStage::Get, e.to_string()))?;
        match read {
            Some(v) if v.as_str() == self.value => {}
            Some(_) => return Err((SelfTestStage::Get, "value read back does not match".into())),
            None => return Err((SelfTestStage::Get, "stored value not found".into())),
        }

        let removed = adapter
            .delete_secret(&self.identity, &self.provider)
            .await
            .map_err(|e| (SelfTestStage::Delete, e.to_string()))?;
        if !removed {
            return Err((SelfTestStage::Delete, "delete reported nothing removed".into()));
        }
        Ok(())
    }

    /// Make sure the probe is gone. Idempotent.
    async fn release(self, adapter: &dyn StorageAdapter) -> Result<(), String> {
        adapter
            .delete_secret(&self.identity, &self.provider)
            .await
            .map_err(|e| e.to_string())?;
        match adapter.get_secret(&self.identity, &self.provider).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err("probe still present after delete".into()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Exercise store/get/delete end to end against `adapter`.
pub async fn test_storage(adapter: &dyn StorageAdapter) -> SelfTestOutcome {
    if adapter.kind() == StorageKind::ClientManaged {
        return SelfTestOutcome::Unsupported;
    }

    let probe = ProbeKey::acquire();
    let exercised = probe.exercise(adapter).await;
    let released = probe.release(adapter).await;

    let outcome = match (exercised, released) {
        (Ok(()), Ok(())) => SelfTestOutcome::Passed,
        (Ok(()), Err(reason)) => SelfTestOutcome::Failed {
            stage: SelfTestStage::Cleanup,
            reason,
        },
        (Err((stage, reason)), cleanup) => {
            if let Err(cleanup_err) = cleanup {
                tracing::error!(error = %cleanup_err, "Self-test probe cleanup failed");
            }
            SelfTestOutcome::Failed { stage, reason }
        }
    };

    match &outcome {
        SelfTestOutcome::Failed { stage, reason } => {
            tracing::warn!(backend = %adapter.kind(), %stage, %reason, "Storage self-test failed")
        }
        _ => tracing::info!(backend = %adapter.kind(), "Storage self-test passed"),
    }
    outcome
}

// ─── Tests ───────────────────────────────────────────────────────────────────
