//! Configuration for the per-entity storage adapter.

use crate::error::{CoreError, CoreResult};
use crate::id::EntityKind;
use crate::retry::RetryPolicy;

/// Configuration for an [`crate::EntityStore`].
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Kind namespace of the stored entities.
    pub kind: EntityKind,
    /// Id of the legacy aggregate document, `None` to skip migration.
    pub legacy_doc_id: Option<String>,
    /// Field of the legacy document holding the entity array.
    pub legacy_field: String,
    /// Retry budgets.
    pub retry: RetryPolicy,
}

impl AdapterConfig {
    /// Creates a configuration for `kind`.
    ///
    /// The legacy aggregate defaults to the document `"<kind>s"` holding its
    /// entities under `items`.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            legacy_doc_id: Some(format!("{kind}s")),
            legacy_field: "items".to_string(),
            kind,
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a configuration for the kind named `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] for an invalid kind name.
    pub fn for_kind(kind: &str) -> CoreResult<Self> {
        Ok(Self::new(EntityKind::new(kind)?))
    }

    /// Sets the legacy aggregate document and the field holding its items.
    pub fn with_legacy(mut self, doc_id: impl Into<String>, field: impl Into<String>) -> Self {
        self.legacy_doc_id = Some(doc_id.into());
        self.legacy_field = field.into();
        self
    }

    /// Disables legacy migration.
    pub fn without_legacy(mut self) -> Self {
        self.legacy_doc_id = None;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks that the legacy document lives outside the kind namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] when a legacy document id would be
    /// picked up by range scans of this kind.
    pub fn validate(&self) -> CoreResult<()> {
        match &self.legacy_doc_id {
            Some(id) if self.kind.owns(id) => Err(CoreError::InvalidId {
                id: id.clone(),
                reason: "legacy document id is inside the kind namespace",
            }),
            Some(id) if id.is_empty() => Err(CoreError::InvalidId {
                id: id.clone(),
                reason: "legacy document id is empty",
            }),
            _ => Ok(()),
        }
    }
}
