//! Transaction committer
//!
//! A committer collects business objects (and hooks contributing extra
//! operations) into one unit of work. `commit` either moves every
//! participant to its persisted state or leaves all of them as they were,
//! with the rollback transition applied to each.

use crate::business_object::BusinessObject;
use crate::context::BoContext;
use crate::data_store::{PendingOperation, Row};
use std::collections::HashSet;
use std::sync::Arc;
use stowage_core::{PropValue, StowageError, StowageResult};
use uuid::Uuid;

/// Side effect committed in the same batch as the business objects
pub trait TransactionalHook: Send + Sync {
    fn name(&self) -> &str;

    /// Extra operations for this batch
    fn pending_operations(&self, participants: &[BusinessObject]) -> StowageResult<Vec<PendingOperation>>;

    fn after_commit(&self, _participants: &[BusinessObject]) {}

    fn after_rollback(&self, _participants: &[BusinessObject]) {}
}

pub struct TransactionCommitter {
    context: BoContext,
    participants: Vec<BusinessObject>,
    seen: HashSet<usize>,
    hooks: Vec<Arc<dyn TransactionalHook>>,
}

impl TransactionCommitter {
    pub fn new(context: &BoContext) -> Self {
        Self {
            context: context.clone(),
            participants: Vec::new(),
            seen: HashSet::new(),
            hooks: Vec::new(),
        }
    }

    /// Add a participant; adding the same object twice is a no-op
    pub fn add_business_object(&mut self, bo: &BusinessObject) {
        if self.seen.insert(bo.addr()) {
            self.participants.push(bo.clone());
        }
    }

    pub fn add_hook(&mut self, hook: Arc<dyn TransactionalHook>) {
        self.hooks.push(hook);
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn participants(&self) -> &[BusinessObject] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Commit every participant in one batch
    ///
    /// Clean participants are skipped. An invalid participant fails the
    /// commit before anything is checked or written. Any failure after that
    /// is reported as `CommitFailed` once every participant was rolled back.
    pub fn commit(&mut self) -> StowageResult<()> {
        let participants: Vec<BusinessObject> = std::mem::take(&mut self.participants)
            .into_iter()
            .filter(|bo| bo.is_deleted() || bo.pending_operation().is_some())
            .collect();
        self.seen.clear();
        if participants.is_empty() {
            return Ok(());
        }

        for bo in &participants {
            let message = bo.is_valid_message();
            if !message.is_empty() {
                return Err(StowageError::BusinessObjectInvalid {
                    class: bo.class_name().to_string(),
                    message,
                });
            }
        }

        match self.persist(&participants) {
            Ok(operations) => {
                for bo in &participants {
                    bo.update_state_as_persisted();
                }
                for hook in &self.hooks {
                    hook.after_commit(&participants);
                }
                tracing::info!(
                    participants = participants.len(),
                    operations,
                    "transaction committed"
                );
                Ok(())
            }
            Err(source) => {
                for bo in &participants {
                    if let Err(e) = bo.update_as_transaction_rolled_back() {
                        tracing::warn!(
                            class = %bo.class_name(),
                            key = %bo.key_string(),
                            error = %e,
                            "rollback transition failed"
                        );
                    }
                }
                for hook in &self.hooks {
                    hook.after_rollback(&participants);
                }
                tracing::warn!(participants = participants.len(), error = %source, "transaction rolled back");
                Err(StowageError::CommitFailed {
                    participants: participants.len(),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Check, stamp and write; returns the number of operations executed
    fn persist(&self, participants: &[BusinessObject]) -> StowageResult<usize> {
        for bo in participants {
            self.context
                .concurrency_for(bo.class_name())
                .check_concurrency_before_persisting(bo)?;
        }
        for bo in participants {
            self.context
                .concurrency_for(bo.class_name())
                .update_properties_with_latest_concurrency_info_before_persisting(bo)?;
        }

        let mut operations: Vec<PendingOperation> = participants
            .iter()
            .filter_map(BusinessObject::pending_operation)
            .collect();
        for hook in &self.hooks {
            operations.extend(hook.pending_operations(participants)?);
        }

        if !operations.is_empty() {
            tracing::debug!(operations = operations.len(), "executing batch");
            self.context.store().execute(&operations)?;
        }
        Ok(operations.len())
    }
}

impl std::fmt::Debug for TransactionCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCommitter")
            .field("participants", &self.participants)
            .field("hooks", &self.hook_names())
            .finish()
    }
}

// ============================================================================
// TransactionLog
// ============================================================================

/// Records one log row per written participant in the same batch
///
/// Each row carries the object's class and key, the action, a timestamp and
/// the changed properties as JSON.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    table: String,
}

impl TransactionLog {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Logged action and the key the object is stored under
    fn describe(op: &PendingOperation) -> (&'static str, &str) {
        match op {
            PendingOperation::Insert { key, .. } => ("Created", key),
            PendingOperation::Update { key, .. } => ("Updated", key),
            PendingOperation::Delete { key, .. } => ("Deleted", key),
        }
    }
}

impl TransactionalHook for TransactionLog {
    fn name(&self) -> &str {
        "transaction_log"
    }

    fn pending_operations(&self, participants: &[BusinessObject]) -> StowageResult<Vec<PendingOperation>> {
        let timestamp = chrono::Utc::now();
        let mut operations = Vec::new();
        for bo in participants {
            let Some(op) = bo.pending_operation() else {
                continue;
            };
            let (action, key) = Self::describe(&op);
            let changes = serde_json::to_string(&bo.changes())?;
            let log_id = Uuid::new_v4();
            let row = Row::from([
                ("LogID".to_string(), PropValue::Guid(log_id)),
                ("BusinessObjectClass".to_string(), PropValue::from(bo.class_name())),
                ("BusinessObjectKey".to_string(), PropValue::from(key)),
                ("Action".to_string(), PropValue::from(action)),
                ("Timestamp".to_string(), PropValue::DateTime(timestamp)),
                ("Changes".to_string(), PropValue::String(changes)),
            ]);
            operations.push(PendingOperation::Insert {
                class: self.table.clone(),
                key: format!("LogID={}", log_id),
                row,
            });
        }
        Ok(operations)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use stowage_core::StowageConfig;

    fn person(ctx: &BoContext, id: i64, surname: &str) -> BusinessObject {
        let bo = ctx.create("Person").unwrap();
        bo.set_property_value("ID", id).unwrap();
        bo.set_property_value("Surname", surname).unwrap();
        bo
    }

    #[test]
    fn test_participants_are_deduplicated() {
        let (ctx, _store) = fixtures::context();
        let bo = person(&ctx, 1, "Smith");
        let mut committer = ctx.committer();
        committer.add_business_object(&bo);
        committer.add_business_object(&bo.clone());
        assert_eq!(committer.len(), 1);
    }

    #[test]
    fn test_commit_is_one_batch() {
        let (ctx, store) = fixtures::context();
        let a = person(&ctx, 1, "Smith");
        let b = person(&ctx, 2, "Jones");
        let mut committer = ctx.committer();
        committer.add_business_object(&a);
        committer.add_business_object(&b);

        committer.commit().unwrap();
        assert_eq!(store.batches().len(), 1);
        assert_eq!(store.len("Person"), 2);
        assert!(!a.is_new());
        assert!(!b.is_new());
        assert!(committer.is_empty());
    }

    #[test]
    fn test_clean_participants_are_skipped() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 1, "Smith");
        let clean = fixtures::load_person(&ctx, &store, 1);
        let mut committer = ctx.committer();
        committer.add_business_object(&clean);

        committer.commit().unwrap();
        assert!(store.batches().is_empty());
    }

    #[test]
    fn test_failure_rolls_back_everyone() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 2, "Jones");
        let fresh = person(&ctx, 1, "Smith");
        let clash = person(&ctx, 2, "Again");
        let mut committer = ctx.committer();
        committer.add_business_object(&fresh);
        committer.add_business_object(&clash);

        let err = committer.commit().unwrap_err();
        assert!(matches!(err, StowageError::CommitFailed { participants: 2, .. }));
        assert!(err.is_concurrency());
        assert!(fresh.is_new());
        assert!(clash.is_new());
        assert_eq!(store.len("Person"), 1);
    }

    #[test]
    fn test_invalid_participant_stops_commit() {
        let (ctx, store) = fixtures::context();
        let valid = person(&ctx, 1, "Smith");
        let invalid = ctx.create("Person").unwrap();
        invalid.set_property_value("ID", 2).unwrap();
        let mut committer = ctx.committer();
        committer.add_business_object(&valid);
        committer.add_business_object(&invalid);

        let err = committer.commit().unwrap_err();
        assert!(matches!(err, StowageError::BusinessObjectInvalid { .. }));
        assert!(store.batches().is_empty());
        assert!(valid.is_new());
    }

    #[derive(Default)]
    struct Audit {
        seen: Mutex<Vec<String>>,
    }

    impl TransactionalHook for Audit {
        fn name(&self) -> &str {
            "audit"
        }

        fn pending_operations(&self, _participants: &[BusinessObject]) -> StowageResult<Vec<PendingOperation>> {
            Ok(Vec::new())
        }

        fn after_commit(&self, participants: &[BusinessObject]) {
            self.seen.lock().unwrap().push(format!("commit:{}", participants.len()));
        }

        fn after_rollback(&self, participants: &[BusinessObject]) {
            self.seen.lock().unwrap().push(format!("rollback:{}", participants.len()));
        }
    }

    #[test]
    fn test_hooks_see_outcome() {
        let (ctx, store) = fixtures::context();
        let audit = Arc::new(Audit::default());

        let mut committer = ctx.committer();
        committer.add_hook(audit.clone());
        committer.add_business_object(&person(&ctx, 1, "Smith"));
        committer.commit().unwrap();

        store.fail_next_commit();
        committer.add_business_object(&person(&ctx, 2, "Jones"));
        assert!(committer.commit().is_err());

        assert_eq!(*audit.seen.lock().unwrap(), vec!["commit:1", "rollback:1"]);
    }

    #[test]
    fn test_transaction_log_rows() {
        let mut config = StowageConfig::default();
        config.transaction_log.enabled = true;
        config.transaction_log.table = "audit_log".into();
        let (ctx, store) = fixtures::context_with_config(config);

        let bo = person(&ctx, 1, "Smith");
        bo.save().unwrap();
        bo.set_property_value("Surname", "Jones").unwrap();
        bo.save().unwrap();

        let rows = store.rows("audit_log");
        assert_eq!(rows.len(), 2);
        let mut actions: Vec<String> = rows
            .iter()
            .map(|row| row["Action"].to_string())
            .collect();
        actions.sort();
        assert_eq!(actions, vec!["Created", "Updated"]);

        let update = rows
            .iter()
            .find(|row| row["Action"] == PropValue::from("Updated"))
            .unwrap();
        assert_eq!(update["BusinessObjectClass"], PropValue::from("Person"));
        assert_eq!(update["BusinessObjectKey"], PropValue::from("ID=1"));
        let changes: serde_json::Value =
            serde_json::from_str(update["Changes"].as_str().unwrap()).unwrap();
        assert_eq!(changes["Surname"]["new"]["value"], serde_json::json!("Jones"));
        assert_eq!(store.last_batch().unwrap().len(), 2);
    }
}
