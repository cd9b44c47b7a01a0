// Lockbox: Client-managed storage
//
// Nothing is stored server-side. Callers carry credentials with each request,
// so the secret operations refuse with `Unsupported` instead of pretending to
// succeed. Auditing of client-supplied credentials belongs to the caller.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::Span;
use zeroize::Zeroizing;

use super::adapter::{HealthDetails, HealthReport, StorageAdapter, StorageKind};
use super::models::{Identity, Operation};
use super::StoreError;

pub struct NullAdapter {
    span: Span,
}

impl NullAdapter {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    fn refuse(&self, operation: Operation) -> StoreError {
        self.span.in_scope(|| {
            tracing::debug!(operation = %operation, "Refused: credentials are client managed");
        });
        StoreError::Unsupported(operation)
    }
}

#[async_trait]
impl StorageAdapter for NullAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::ClientManaged
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.span
            .in_scope(|| tracing::info!("Client-managed storage selected; nothing to initialize"));
        Ok(())
    }

    async fn store_secret(
        &self,
        _identity: &Identity,
        _provider: &str,
        _value: &str,
    ) -> Result<(), StoreError> {
        Err(self.refuse(Operation::Store))
    }

    async fn get_secret(
        &self,
        _identity: &Identity,
        _provider: &str,
    ) -> Result<Option<Zeroizing<String>>, StoreError> {
        Err(self.refuse(Operation::Get))
    }

    async fn delete_secret(&self, _identity: &Identity, _provider: &str) -> Result<bool, StoreError> {
        Err(self.refuse(Operation::Delete))
    }

    /// No server-side credentials exist for anyone.
    async fn list_providers(&self, identity: &Identity) -> Result<BTreeSet<String>, StoreError> {
        identity.resolve()?;
        Ok(BTreeSet::new())
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::healthy(
            StorageKind::ClientManaged,
            HealthDetails {
                message: Some("credentials are supplied per request".to_string()),
                ..HealthDetails::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_secret_operations_are_unsupported() {
        let adapter = NullAdapter::new(Span::none());
        adapter.initialize().await.unwrap();
        let alice = Identity::from("alice@x.com");

        assert!(matches!(
            adapter.store_secret(&alice, "anthropic", "sk").await,
            Err(StoreError::Unsupported(Operation::Store))
        ));
        assert!(matches!(
            adapter.get_secret(&alice, "anthropic").await,
            Err(StoreError::Unsupported(Operation::Get))
        ));
        assert!(matches!(
            adapter.delete_secret(&alice, "anthropic").await,
            Err(StoreError::Unsupported(Operation::Delete))
        ));
    }

    #[tokio::test]
    async fn test_list_is_empty_and_health_is_healthy() {
        let adapter = NullAdapter::new(Span::none());
        assert!(adapter
            .list_providers(&"alice@x.com".into())
            .await
            .unwrap()
            .is_empty());

        let report = adapter.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.backend, StorageKind::ClientManaged);
    }
}
