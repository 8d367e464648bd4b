//! In-memory implementations of the persistence, object-store, and owner traits.
//!
//! The fakes mirror the guarded updates of the database adapter so orchestration
//! tests exercise the same state machine, and expose failure injection hooks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replica_core::{
    BlobTransfer, CopyError, CopyOperation, CopyResult, CopyStatus, EntityMapping, EntityRow,
    EntityType, HistoryEntry, HistoryLog, MappingRegistry, NewCopyOperation, NewHistoryEntry,
    ObjectStore, ObjectStoreError, OperationRepository, OwnerRequest, OwnerResolver,
    PipelineCatalog, TargetOwner,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    operations: Vec<CopyOperation>,
    claims: HashMap<Uuid, Uuid>,
    mappings: Vec<EntityMapping>,
    history: Vec<HistoryEntry>,
    rows: BTreeMap<(EntityType, i64), EntityRow>,
    persisted: Vec<(EntityType, i64)>,
    next_row_id: i64,
    next_mapping_id: i64,
    next_history_id: i64,
    persist_failures: Vec<EntityType>,
    history_unavailable: bool,
}

impl StoreState {
    fn operation_mut(&mut self, id: Uuid) -> Option<&mut CopyOperation> {
        self.operations.iter_mut().find(|operation| operation.id == id)
    }

    /// The operation, when it is `IN_PROGRESS` under `claim_id`.
    fn held_mut(&mut self, id: Uuid, claim_id: Uuid) -> CopyResult<&mut CopyOperation> {
        let held = self.claims.get(&id) == Some(&claim_id);
        self.operations
            .iter_mut()
            .find(|operation| {
                held && operation.id == id && operation.status == CopyStatus::InProgress
            })
            .ok_or_else(|| CopyError::ConcurrentModification {
                resource: "operation",
                id: id.to_string(),
                expected: CopyStatus::InProgress,
            })
    }

    fn active_for(&self, source_training_id: i64, owner: &TargetOwner) -> Option<&CopyOperation> {
        self.operations.iter().find(|operation| {
            operation.source_training_id == source_training_id
                && operation.target == *owner
                && operation.status.is_active()
        })
    }

    fn mapping_mut(
        &mut self,
        mapping: &EntityMapping,
        expected: CopyStatus,
    ) -> CopyResult<&mut EntityMapping> {
        self.mappings
            .iter_mut()
            .find(|stored| stored.id == mapping.id && stored.status == expected)
            .ok_or_else(|| CopyError::ConcurrentModification {
                resource: "mapping",
                id: mapping.id.to_string(),
                expected,
            })
    }

    fn allocate_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

/// In-memory copy ledger and pipeline graph.
#[derive(Clone, Default)]
pub struct MemoryCopyStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryCopyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a source row, returning its id.
    pub async fn insert_source(&self, row: EntityRow) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.allocate_row_id();
        state.rows.insert((row.entity_type(), id), row);
        id
    }

    /// Remove a row from the graph, simulating a dangling reference.
    pub async fn remove_row(&self, entity_type: EntityType, id: i64) {
        self.state.lock().await.rows.remove(&(entity_type, id));
    }

    /// Read any row, source or copied.
    pub async fn row(&self, entity_type: EntityType, id: i64) -> Option<EntityRow> {
        self.state.lock().await.rows.get(&(entity_type, id)).cloned()
    }

    /// Rows written through `persist_target`, in write order.
    pub async fn persisted_rows(&self) -> Vec<(EntityType, i64)> {
        self.state.lock().await.persisted.clone()
    }

    /// Fail the next `persist_target` call for `entity_type`.
    pub async fn fail_next_persist(&self, entity_type: EntityType) {
        self.state.lock().await.persist_failures.push(entity_type);
    }

    /// Make history appends fail until switched back.
    pub async fn set_history_unavailable(&self, unavailable: bool) {
        self.state.lock().await.history_unavailable = unavailable;
    }

    /// Overwrite an operation's status and heartbeat, simulating a crashed worker.
    pub async fn force_operation_state(
        &self,
        id: Uuid,
        status: CopyStatus,
        updated_at: DateTime<Utc>,
    ) {
        if let Some(operation) = self.state.lock().await.operation_mut(id) {
            operation.status = status;
            operation.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl OperationRepository for MemoryCopyStore {
    async fn insert_operation(&self, operation: &NewCopyOperation) -> CopyResult<CopyOperation> {
        let mut state = self.state.lock().await;
        if let Some(active) = state.active_for(operation.source_training_id, &operation.target) {
            return Err(CopyError::Conflict {
                source_training_id: operation.source_training_id,
                owner: operation.target.key(),
                operation_id: Some(active.id),
            });
        }
        let now = Utc::now();
        let stored = CopyOperation {
            id: operation.id,
            source_training_id: operation.source_training_id,
            target_training_id: None,
            initiated_by: operation.initiated_by,
            target: operation.target,
            comment: operation.comment.clone(),
            status: CopyStatus::Pending,
            error_message: None,
            plan: operation.plan.clone(),
            created_at: now,
            updated_at: now,
        };
        state.operations.push(stored.clone());
        Ok(stored)
    }

    async fn find_active_operation(
        &self,
        source_training_id: i64,
        owner: &TargetOwner,
    ) -> CopyResult<Option<CopyOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .active_for(source_training_id, owner)
            .cloned())
    }

    async fn get_operation(&self, id: Uuid) -> CopyResult<Option<CopyOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .iter()
            .find(|operation| operation.id == id)
            .cloned())
    }

    async fn claim_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> CopyResult<Option<CopyOperation>> {
        let mut state = self.state.lock().await;
        let Some(current) = state.operations.iter().find(|operation| operation.id == id) else {
            return Ok(None);
        };
        let claimable = match current.status {
            CopyStatus::Pending | CopyStatus::Failed => true,
            CopyStatus::InProgress => current.updated_at < stale_before,
            CopyStatus::Completed => false,
        };
        if !claimable {
            return Ok(None);
        }
        if current.status == CopyStatus::Failed {
            let (source, owner) = (current.source_training_id, current.target);
            if let Some(active) = state.active_for(source, &owner) {
                return Err(CopyError::Conflict {
                    source_training_id: source,
                    owner: owner.key(),
                    operation_id: Some(active.id),
                });
            }
        }
        let Some(operation) = state.operation_mut(id) else {
            return Ok(None);
        };
        operation.status = CopyStatus::InProgress;
        operation.updated_at = Utc::now();
        let claimed = operation.clone();
        state.claims.insert(id, claim_id);
        Ok(Some(claimed))
    }

    async fn heartbeat(&self, id: Uuid, claim_id: Uuid) -> CopyResult<()> {
        let mut state = self.state.lock().await;
        state.held_mut(id, claim_id)?.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        status: CopyStatus,
        error_message: Option<&str>,
        target_training_id: Option<i64>,
    ) -> CopyResult<CopyOperation> {
        CopyStatus::InProgress.ensure_transition(status)?;
        let mut state = self.state.lock().await;
        let operation = state.held_mut(id, claim_id)?;
        operation.status = status;
        operation.error_message = error_message.map(str::to_string);
        if target_training_id.is_some() {
            operation.target_training_id = target_training_id;
        }
        operation.updated_at = Utc::now();
        let finished = operation.clone();
        state.claims.remove(&id);
        Ok(finished)
    }

    async fn list_initiated_by(&self, user_id: Uuid) -> CopyResult<Vec<CopyOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .iter()
            .rev()
            .filter(|operation| operation.initiated_by == user_id)
            .cloned()
            .collect())
    }

    async fn list_received_by(&self, owner: &TargetOwner) -> CopyResult<Vec<CopyOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .iter()
            .rev()
            .filter(|operation| operation.target == *owner)
            .cloned()
            .collect())
    }

    async fn list_claimable(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CopyResult<Vec<Uuid>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state
            .lock()
            .await
            .operations
            .iter()
            .filter(|operation| match operation.status {
                CopyStatus::Pending => true,
                CopyStatus::InProgress => operation.updated_at < stale_before,
                CopyStatus::Completed | CopyStatus::Failed => false,
            })
            .take(limit)
            .map(|operation| operation.id)
            .collect())
    }
}

#[async_trait]
impl MappingRegistry for MemoryCopyStore {
    async fn find_or_create(
        &self,
        operation_id: Uuid,
        entity_type: EntityType,
        source_entity_id: i64,
    ) -> CopyResult<EntityMapping> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.mappings.iter().find(|mapping| {
            mapping.operation_id == operation_id
                && mapping.entity_type == entity_type
                && mapping.source_entity_id == source_entity_id
        }) {
            return Ok(existing.clone());
        }
        state.next_mapping_id += 1;
        let mapping = EntityMapping {
            id: state.next_mapping_id,
            operation_id,
            entity_type,
            source_entity_id,
            target_entity_id: None,
            blobs: Vec::new(),
            status: CopyStatus::Pending,
            error_message: None,
            attempts: 0,
            updated_at: Utc::now(),
        };
        state.mappings.push(mapping.clone());
        Ok(mapping)
    }

    async fn mark_in_progress(&self, mapping: &EntityMapping) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::InProgress)?;
        let mut state = self.state.lock().await;
        let stored = state.mapping_mut(mapping, mapping.status)?;
        stored.status = CopyStatus::InProgress;
        stored.attempts += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn mark_completed(
        &self,
        mapping: &EntityMapping,
        target_entity_id: i64,
        blobs: &[BlobTransfer],
    ) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::Completed)?;
        let mut state = self.state.lock().await;
        let stored = state.mapping_mut(mapping, CopyStatus::InProgress)?;
        stored.status = CopyStatus::Completed;
        stored.target_entity_id = Some(target_entity_id);
        stored.blobs = blobs.to_vec();
        stored.error_message = None;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn mark_failed(&self, mapping: &EntityMapping, error: &str) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::Failed)?;
        let mut state = self.state.lock().await;
        let stored = state.mapping_mut(mapping, CopyStatus::InProgress)?;
        stored.status = CopyStatus::Failed;
        stored.error_message = Some(error.to_string());
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn list_mappings(&self, operation_id: Uuid) -> CopyResult<Vec<EntityMapping>> {
        Ok(self
            .state
            .lock()
            .await
            .mappings
            .iter()
            .filter(|mapping| mapping.operation_id == operation_id)
            .cloned()
            .collect())
    }

    async fn is_fully_complete(&self, operation_id: Uuid) -> CopyResult<bool> {
        let state = self.state.lock().await;
        let mut mappings = state
            .mappings
            .iter()
            .filter(|mapping| mapping.operation_id == operation_id)
            .peekable();
        Ok(mappings.peek().is_some() && mappings.all(EntityMapping::is_completed))
    }

    async fn has_any_failed(&self, operation_id: Uuid) -> CopyResult<bool> {
        Ok(self.state.lock().await.mappings.iter().any(|mapping| {
            mapping.operation_id == operation_id && mapping.status == CopyStatus::Failed
        }))
    }
}

#[async_trait]
impl HistoryLog for MemoryCopyStore {
    async fn append_history(&self, entry: &NewHistoryEntry) -> CopyResult<HistoryEntry> {
        let mut state = self.state.lock().await;
        if state.history_unavailable {
            return Err(CopyError::store(
                "copy_history.append",
                io::Error::other("history table unavailable"),
            ));
        }
        state.next_history_id += 1;
        let stored = HistoryEntry {
            id: state.next_history_id,
            operation_id: entry.operation_id,
            action: entry.action,
            actor: entry.actor,
            recorded_at: Utc::now(),
            detail: entry.detail.clone(),
        };
        state.history.push(stored.clone());
        Ok(stored)
    }

    async fn list_history(&self, operation_id: Uuid) -> CopyResult<Vec<HistoryEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .history
            .iter()
            .filter(|entry| entry.operation_id == operation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PipelineCatalog for MemoryCopyStore {
    async fn load_row(&self, entity_type: EntityType, id: i64) -> CopyResult<Option<EntityRow>> {
        Ok(self.row(entity_type, id).await)
    }

    async fn model_for_training(&self, training_id: i64) -> CopyResult<Option<i64>> {
        Ok(self
            .state
            .lock()
            .await
            .rows
            .iter()
            .find_map(|((entity_type, id), row)| match row {
                EntityRow::Model(model)
                    if *entity_type == EntityType::Model && model.training_id == training_id =>
                {
                    Some(*id)
                }
                _ => None,
            }))
    }

    async fn persist_target(&self, mapping: &EntityMapping, row: &EntityRow) -> CopyResult<i64> {
        let mut state = self.state.lock().await;
        let entity_type = row.entity_type();
        if let Some(index) = state
            .persist_failures
            .iter()
            .position(|failing| *failing == entity_type)
        {
            state.persist_failures.remove(index);
            return Err(CopyError::store(
                "pipeline.persist.insert",
                io::Error::other("injected relational failure"),
            ));
        }
        let target_id = state.next_row_id + 1;
        let stored = state.mapping_mut(mapping, CopyStatus::InProgress)?;
        if stored.target_entity_id.is_some() {
            return Err(CopyError::ConcurrentModification {
                resource: "mapping",
                id: mapping.id.to_string(),
                expected: CopyStatus::InProgress,
            });
        }
        stored.target_entity_id = Some(target_id);
        state.next_row_id = target_id;
        state.rows.insert((entity_type, target_id), row.clone());
        state.persisted.push((entity_type, target_id));
        Ok(target_id)
    }
}

#[derive(Default)]
struct ObjectState {
    objects: HashMap<(String, String), Vec<u8>>,
    copy_failures: HashMap<String, u32>,
    copy_calls: u32,
}

/// In-memory object store keyed by `(bucket, key)`.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<ObjectState>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object.
    pub async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.state
            .lock()
            .await
            .objects
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
    }

    /// Read an object.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Whether an object exists.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).await.is_some()
    }

    /// Keys stored in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(stored_bucket, _)| stored_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Fail the next `times` copies whose source key is `source_key`.
    pub async fn fail_copies_of(&self, source_key: &str, times: u32) {
        self.state
            .lock()
            .await
            .copy_failures
            .insert(source_key.to_string(), times);
    }

    /// Number of `copy_object` calls received.
    pub async fn copy_calls(&self) -> u32 {
        self.state.lock().await.copy_calls
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<String, ObjectStoreError> {
        let mut state = self.state.lock().await;
        state.copy_calls += 1;
        if let Some(remaining) = state.copy_failures.get_mut(source_key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ObjectStoreError::transport(
                "copy_object",
                source_bucket,
                source_key,
                io::Error::other("injected transport failure"),
            ));
        }
        let bytes = state
            .objects
            .get(&(source_bucket.to_string(), source_key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: source_bucket.to_string(),
                key: source_key.to_string(),
            })?;
        state
            .objects
            .insert((target_bucket.to_string(), target_key.to_string()), bytes);
        Ok(target_key.to_string())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.contains(bucket, key).await)
    }
}

/// Owner resolver backed by fixed user and group tables.
#[derive(Debug, Clone, Default)]
pub struct StaticOwnerResolver {
    users: HashMap<String, Uuid>,
    groups: HashSet<i64>,
}

impl StaticOwnerResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    #[must_use]
    pub fn with_user(mut self, username: &str, id: Uuid) -> Self {
        self.users.insert(username.to_string(), id);
        self
    }

    /// Register a group.
    #[must_use]
    pub fn with_group(mut self, id: i64) -> Self {
        self.groups.insert(id);
        self
    }
}

#[async_trait]
impl OwnerResolver for StaticOwnerResolver {
    async fn resolve(&self, request: &OwnerRequest) -> CopyResult<TargetOwner> {
        match request {
            OwnerRequest::Username(username) => self
                .users
                .get(username)
                .copied()
                .map(TargetOwner::User)
                .ok_or_else(|| CopyError::not_found("user", username)),
            OwnerRequest::Group(id) => self
                .groups
                .contains(id)
                .then_some(TargetOwner::Group(*id))
                .ok_or_else(|| CopyError::not_found("group", id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{CopyPlan, PlannedEntity};

    fn new_operation(source: i64, owner: TargetOwner) -> NewCopyOperation {
        NewCopyOperation {
            id: Uuid::new_v4(),
            source_training_id: source,
            initiated_by: Uuid::new_v4(),
            target: owner,
            comment: None,
            plan: CopyPlan {
                root_training_id: source,
                entities: vec![PlannedEntity::root(EntityType::Training, source)],
            },
        }
    }

    #[tokio::test]
    async fn active_operations_conflict_per_pair() {
        let store = MemoryCopyStore::new();
        let owner = TargetOwner::Group(4);
        let first = store
            .insert_operation(&new_operation(1, owner))
            .await
            .expect("first insert");
        let err = store
            .insert_operation(&new_operation(1, owner))
            .await
            .expect_err("duplicate active copy");
        assert!(matches!(
            err,
            CopyError::Conflict { operation_id: Some(id), .. } if id == first.id
        ));
        store
            .insert_operation(&new_operation(2, owner))
            .await
            .expect("different training");
    }

    #[tokio::test]
    async fn reclaim_fences_off_the_previous_worker() {
        let store = MemoryCopyStore::new();
        let operation = store
            .insert_operation(&new_operation(5, TargetOwner::Group(1)))
            .await
            .expect("insert");
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let stale_before = Utc::now() - chrono::TimeDelta::minutes(15);
        store
            .claim_operation(operation.id, first, stale_before)
            .await
            .expect("claim")
            .expect("pending is claimable");
        store
            .force_operation_state(
                operation.id,
                CopyStatus::InProgress,
                Utc::now() - chrono::TimeDelta::hours(1),
            )
            .await;
        store
            .claim_operation(operation.id, second, stale_before)
            .await
            .expect("reclaim")
            .expect("stale run is claimable");

        let err = store
            .heartbeat(operation.id, first)
            .await
            .expect_err("old claim cannot heartbeat");
        assert!(matches!(err, CopyError::ConcurrentModification { .. }));
        store
            .finish_operation(operation.id, first, CopyStatus::Failed, Some("stalled"), None)
            .await
            .expect_err("old claim cannot finish");

        store.heartbeat(operation.id, second).await.expect("heartbeat");
        let finished = store
            .finish_operation(operation.id, second, CopyStatus::Completed, None, Some(8))
            .await
            .expect("finish");
        assert_eq!(finished.status, CopyStatus::Completed);
        assert_eq!(finished.target_training_id, Some(8));
    }

    #[tokio::test]
    async fn mapping_updates_are_guarded_by_status() {
        let store = MemoryCopyStore::new();
        let operation = Uuid::new_v4();
        let pending = store
            .find_or_create(operation, EntityType::Dataset, 3)
            .await
            .expect("create mapping");
        let running = store.mark_in_progress(&pending).await.expect("claim mapping");
        assert_eq!(running.attempts, 1);

        let stale = store.mark_in_progress(&pending).await.expect_err("stale copy");
        assert!(matches!(stale, CopyError::ConcurrentModification { .. }));

        let err = store
            .mark_completed(&pending, 9, &[])
            .await
            .expect_err("pending cannot complete");
        assert!(matches!(err, CopyError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn injected_copy_failures_are_consumed() {
        let objects = MemoryObjectStore::new();
        objects.put("models", "a.bin", b"x").await;
        objects.fail_copies_of("a.bin", 1).await;
        let first = objects.copy_object("models", "a.bin", "models", "b.bin").await;
        assert!(matches!(first, Err(ObjectStoreError::Transport { .. })));
        objects
            .copy_object("models", "a.bin", "models", "b.bin")
            .await
            .expect("second copy succeeds");
        assert_eq!(objects.get("models", "b.bin").await, Some(b"x".to_vec()));
        assert_eq!(objects.copy_calls().await, 2);

        let missing = objects
            .copy_object("models", "none", "models", "c.bin")
            .await
            .expect_err("missing source");
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn static_resolver_reports_unknown_owners() {
        let user = Uuid::new_v4();
        let resolver = StaticOwnerResolver::new().with_user("ada", user).with_group(2);
        assert_eq!(
            resolver
                .resolve(&OwnerRequest::Username("ada".into()))
                .await
                .expect("known user"),
            TargetOwner::User(user)
        );
        let err = resolver
            .resolve(&OwnerRequest::Group(3))
            .await
            .expect_err("unknown group");
        assert!(matches!(err, CopyError::NotFound { resource: "group", .. }));
    }
}
