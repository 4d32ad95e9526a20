//! Requirement rules gating whether a batch may start or resume.
//!
//! Rules run in registration order and stop at the first failure. A failing
//! rule leaves the batch QUEUED with the rule's reason attached to its status.

use async_trait::async_trait;
use std::sync::Arc;

use crate::model::{BatchStatus, FileRecord};
use crate::storage::FileStorage;

/// One predicate over a batch about to run.
#[async_trait]
pub trait RequirementRule: Send + Sync {
    fn name(&self) -> &str;

    /// Ok to let the batch run, or a human-readable reason why it may not.
    async fn check(&self, batch: &BatchStatus, files: &[FileRecord]) -> Result<(), String>;
}

/// Ordered rule chain shared by every batch of a manager.
#[derive(Clone, Default)]
pub struct RequirementRules {
    rules: Vec<Arc<dyn RequirementRule>>,
}

impl RequirementRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: impl RequirementRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn push(&mut self, rule: Arc<dyn RequirementRule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RequirementRule>> {
        self.rules.iter()
    }

    /// Evaluate every rule in order, stopping at the first failure.
    pub async fn check(&self, batch: &BatchStatus, files: &[FileRecord]) -> Result<(), String> {
        for rule in &self.rules {
            if let Err(reason) = rule.check(batch, files).await {
                tracing::debug!(batch_id = %batch.id, rule = rule.name(), %reason, "requirement not met");
                return Err(reason);
            }
        }
        Ok(())
    }
}

/// Free space at the storage root must cover the remaining known bytes plus a reserve.
pub struct StorageSpaceRule {
    storage: Arc<dyn FileStorage>,
    reserve_bytes: u64,
}

impl StorageSpaceRule {
    pub fn new(storage: Arc<dyn FileStorage>, reserve_bytes: u64) -> Self {
        Self {
            storage,
            reserve_bytes,
        }
    }
}

#[async_trait]
impl RequirementRule for StorageSpaceRule {
    fn name(&self) -> &str {
        "storage_space"
    }

    async fn check(&self, batch: &BatchStatus, files: &[FileRecord]) -> Result<(), String> {
        let remaining: u64 = files
            .iter()
            .filter_map(|f| f.size.known().map(|s| s.saturating_sub(f.bytes_downloaded)))
            .sum();
        let needed = remaining.saturating_add(self.reserve_bytes);
        let available = self
            .storage
            .available_space(&batch.storage_root)
            .await
            .map_err(|e| format!("cannot determine free space: {e}"))?;
        if available < needed {
            return Err(format!(
                "insufficient storage: {needed} bytes needed, {available} available"
            ));
        }
        Ok(())
    }
}

type RuleFn = dyn Fn(&BatchStatus, &[FileRecord]) -> Result<(), String> + Send + Sync;

/// Adapter turning a closure into a rule.
pub struct FnRule {
    name: String,
    f: Box<RuleFn>,
}

impl FnRule {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&BatchStatus, &[FileRecord]) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl RequirementRule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, batch: &BatchStatus, files: &[FileRecord]) -> Result<(), String> {
        (self.f)(batch, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::model::BatchRequest;
    use crate::storage::FileWriter;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSpace(u64);

    #[async_trait]
    impl FileStorage for FixedSpace {
        async fn open_writer(
            &self,
            _destination: &Path,
            _offset: u64,
        ) -> Result<Box<dyn FileWriter>, StorageError> {
            Err(StorageError::write_failure("read-only"))
        }
        async fn finalize(&self, _destination: &Path) -> Result<(), StorageError> {
            Ok(())
        }
        async fn delete(&self, _destination: &Path) -> Result<(), StorageError> {
            Ok(())
        }
        async fn available_space(&self, _root: &Path) -> Result<u64, StorageError> {
            Ok(self.0)
        }
    }

    fn batch() -> (BatchStatus, Vec<FileRecord>) {
        BatchRequest::new("t", "/data")
            .file_with_size("http://x/a", "a", 600)
            .file_with_size("http://x/b", "b", 400)
            .file("http://x/c", "c")
            .into_records(0)
    }

    #[tokio::test]
    async fn storage_rule_counts_remaining_bytes_and_reserve() {
        let (status, mut files) = batch();
        files[0].bytes_downloaded = 500;
        // remaining = 100 + 400, reserve 100
        let ok = StorageSpaceRule::new(Arc::new(FixedSpace(600)), 100);
        assert!(ok.check(&status, &files).await.is_ok());
        let short = StorageSpaceRule::new(Arc::new(FixedSpace(599)), 100);
        let reason = short.check(&status, &files).await.unwrap_err();
        assert!(reason.contains("insufficient storage"), "{reason}");
    }

    #[tokio::test]
    async fn chain_short_circuits_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let rules = RequirementRules::new()
            .with(FnRule::new("first", |_, _| Err("first failed".to_string())))
            .with(FnRule::new("second", move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        let (status, files) = batch();
        assert_eq!(rules.check(&status, &files).await.unwrap_err(), "first failed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_passes() {
        let (status, files) = batch();
        assert!(RequirementRules::new().check(&status, &files).await.is_ok());
    }
}
