//! Storage scopes: units of work batching entity mutations before commit.
//!
//! # Responsibility
//! - Track registered objects with the snapshot they were read with.
//! - Collect pending inserts, updates and deletes for the coordinator.
//! - Absorb changes committed elsewhere (auto-merge and clean propagation).
//!
//! # Invariants
//! - An object is pending when it was inserted, deleted, or its values
//!   differ from its snapshot.
//! - A scope never reaches into the coordinator; every engine operation is
//!   driven by `StoreCoordinator` with the scope as a parameter.

use super::merge::MergePolicy;
use super::{StoreError, StoreResult};
use crate::model::entity::{Entity, EntitySchema, FieldValues, ObjectId};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use uuid::Uuid;

/// Stable identity of one scope, used in logs and to skip the saver when
/// publishing changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(Uuid);

impl ScopeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) enum ScopeParent {
    /// Saves commit to the store backend.
    Store,
    /// Saves push pending changes into another scope.
    Scope(Arc<Scope>),
}

/// Registration of one object inside a scope.
#[derive(Debug, Clone)]
pub(crate) struct ManagedObject {
    pub(crate) schema: &'static EntitySchema,
    /// Registration order; pending changes commit in this order.
    pub(crate) seq: u64,
    pub(crate) inserted: bool,
    pub(crate) deleted: bool,
    /// Values as last seen in the parent.
    pub(crate) snapshot: FieldValues,
    pub(crate) values: FieldValues,
}

impl ManagedObject {
    pub(crate) fn is_modified(&self) -> bool {
        !self.inserted && self.values != self.snapshot
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.inserted || self.deleted || self.is_modified()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Insert,
    Update,
    Delete,
}

/// One pending mutation collected for commit.
#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub(crate) object_id: ObjectId,
    pub(crate) schema: &'static EntitySchema,
    pub(crate) kind: PendingKind,
    pub(crate) snapshot: FieldValues,
    pub(crate) values: FieldValues,
}

/// Changes committed by one save or clean, as seen by other scopes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeSet {
    pub(crate) written: Vec<(ObjectId, FieldValues)>,
    pub(crate) deleted: Vec<ObjectId>,
}

impl ChangeSet {
    pub(crate) fn deletions(deleted: Vec<ObjectId>) -> Self {
        Self {
            written: Vec::new(),
            deleted,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty()
    }
}

/// What a scope keeps for an object once its pending change is settled.
#[derive(Debug, Clone)]
pub(crate) enum Settled {
    /// The object is clean with these values.
    Clean(ObjectId, FieldValues),
    /// The object no longer exists in the parent.
    Forget(ObjectId),
}

pub(crate) struct ScopeState {
    pub(crate) registered: HashMap<ObjectId, ManagedObject>,
    pub(crate) merge_policy: MergePolicy,
    next_seq: u64,
}

impl ScopeState {
    fn new(merge_policy: MergePolicy) -> Self {
        Self {
            registered: HashMap::new(),
            merge_policy,
            next_seq: 0,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.registered.values().any(ManagedObject::has_changes)
    }

    pub(crate) fn has_changes_for(&self, schema: &EntitySchema) -> bool {
        self.registered
            .values()
            .any(|object| object.schema == schema && object.has_changes())
    }

    /// Registers a freshly created object as a pending insert.
    pub(crate) fn insert_new(
        &mut self,
        schema: &'static EntitySchema,
        object_id: ObjectId,
        values: FieldValues,
    ) {
        let seq = self.bump_seq();
        self.registered.insert(
            object_id,
            ManagedObject {
                schema,
                seq,
                inserted: true,
                deleted: false,
                snapshot: values.clone(),
                values,
            },
        );
    }

    /// Registers an object read from the parent. Pending objects keep their
    /// local state; clean ones are refreshed.
    pub(crate) fn register_fetched(
        &mut self,
        schema: &'static EntitySchema,
        object_id: ObjectId,
        values: &FieldValues,
    ) {
        if let Some(object) = self.registered.get_mut(&object_id) {
            if !object.has_changes() {
                object.snapshot = values.clone();
                object.values = values.clone();
            }
            return;
        }

        let seq = self.bump_seq();
        self.registered.insert(
            object_id,
            ManagedObject {
                schema,
                seq,
                inserted: false,
                deleted: false,
                snapshot: values.clone(),
                values: values.clone(),
            },
        );
    }

    /// Marks an object deleted; a pending insert is simply dropped.
    pub(crate) fn mark_deleted(&mut self, object_id: ObjectId) -> StoreResult<()> {
        let Some(object) = self.registered.get_mut(&object_id) else {
            return Err(StoreError::ObjectNotInScope(object_id));
        };
        if object.inserted {
            self.registered.remove(&object_id);
        } else {
            object.deleted = true;
        }
        Ok(())
    }

    /// Stages values pushed by a child save. `base` is this scope's view of
    /// the object before the push.
    pub(crate) fn stage_values(
        &mut self,
        schema: &'static EntitySchema,
        object_id: ObjectId,
        base: FieldValues,
        values: FieldValues,
    ) {
        if let Some(object) = self.registered.get_mut(&object_id) {
            if !object.has_changes() {
                object.snapshot = base;
            }
            object.values = values;
            return;
        }

        let seq = self.bump_seq();
        self.registered.insert(
            object_id,
            ManagedObject {
                schema,
                seq,
                inserted: false,
                deleted: false,
                snapshot: base,
                values,
            },
        );
    }

    /// Stages a delete pushed by a child save.
    pub(crate) fn stage_delete(
        &mut self,
        schema: &'static EntitySchema,
        object_id: ObjectId,
        base: FieldValues,
    ) {
        if self.registered.contains_key(&object_id) {
            let _ = self.mark_deleted(object_id);
            return;
        }

        let seq = self.bump_seq();
        self.registered.insert(
            object_id,
            ManagedObject {
                schema,
                seq,
                inserted: false,
                deleted: true,
                snapshot: base.clone(),
                values: base,
            },
        );
    }

    /// Pending mutations in registration order.
    pub(crate) fn pending_changes(&self) -> Vec<PendingChange> {
        let mut pending = self
            .registered
            .iter()
            .filter(|(_, object)| object.has_changes())
            .map(|(object_id, object)| {
                let kind = if object.inserted {
                    PendingKind::Insert
                } else if object.deleted {
                    PendingKind::Delete
                } else {
                    PendingKind::Update
                };
                (
                    object.seq,
                    PendingChange {
                        object_id: *object_id,
                        schema: object.schema,
                        kind,
                        snapshot: object.snapshot.clone(),
                        values: object.values.clone(),
                    },
                )
            })
            .collect::<Vec<_>>();
        pending.sort_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(_, change)| change).collect()
    }

    /// Applies the outcome of a successful commit.
    pub(crate) fn settle(&mut self, outcomes: Vec<Settled>) {
        for outcome in outcomes {
            match outcome {
                Settled::Clean(object_id, values) => {
                    if let Some(object) = self.registered.get_mut(&object_id) {
                        object.inserted = false;
                        object.deleted = false;
                        object.snapshot = values.clone();
                        object.values = values;
                    }
                }
                Settled::Forget(object_id) => {
                    self.registered.remove(&object_id);
                }
            }
        }
    }

    /// Absorbs changes committed by another scope.
    ///
    /// Deleted objects are unregistered. Written objects take the new values
    /// on every field this scope has not modified locally.
    pub(crate) fn merge_changes(&mut self, changes: &ChangeSet) {
        for object_id in &changes.deleted {
            self.registered.remove(object_id);
        }

        for (object_id, values) in &changes.written {
            let Some(object) = self.registered.get_mut(object_id) else {
                continue;
            };
            if object.inserted {
                continue;
            }
            let merged = values
                .iter()
                .enumerate()
                .map(|(index, incoming)| {
                    let local = object.values.get(index);
                    let locally_modified = local != object.snapshot.get(index);
                    match local {
                        Some(local) if locally_modified => local.clone(),
                        _ => incoming.clone(),
                    }
                })
                .collect();
            object.snapshot = values.clone();
            object.values = merged;
        }
    }

    /// Drops every pending change and clean registration.
    pub(crate) fn reset(&mut self) {
        self.registered.clear();
    }
}

/// A unit of work over its parent: another scope or the store itself.
pub struct Scope {
    id: ScopeId,
    pub(crate) parent: ScopeParent,
    auto_merge: bool,
    state: Mutex<ScopeState>,
    children: Mutex<Vec<Weak<Scope>>>,
}

impl Scope {
    pub(crate) fn new_root(merge_policy: MergePolicy, auto_merge: bool) -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::new(),
            parent: ScopeParent::Store,
            auto_merge,
            state: Mutex::new(ScopeState::new(merge_policy)),
            children: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new_child(
        parent: &Arc<Scope>,
        merge_policy: MergePolicy,
        auto_merge: bool,
    ) -> Arc<Self> {
        let child = Arc::new(Self {
            id: ScopeId::new(),
            parent: ScopeParent::Scope(Arc::clone(parent)),
            auto_merge,
            state: Mutex::new(ScopeState::new(merge_policy)),
            children: Mutex::new(Vec::new()),
        });
        lock(&parent.children).push(Arc::downgrade(&child));
        child
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Parent scope; `None` when saves commit straight to the store.
    pub fn parent(&self) -> Option<&Arc<Scope>> {
        match &self.parent {
            ScopeParent::Store => None,
            ScopeParent::Scope(parent) => Some(parent),
        }
    }

    pub fn auto_merges(&self) -> bool {
        self.auto_merge
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.lock_state().merge_policy
    }

    pub fn set_merge_policy(&self, merge_policy: MergePolicy) {
        self.lock_state().merge_policy = merge_policy;
    }

    pub fn has_changes(&self) -> bool {
        self.lock_state().has_changes()
    }

    /// Number of objects currently registered, pending or clean.
    pub fn registered_count(&self) -> usize {
        self.lock_state().registered.len()
    }

    /// Records the entity's current field values as a pending change.
    pub fn stage<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        let object_id = entity.object_id();
        let mut state = self.lock_state();
        let object = state
            .registered
            .get_mut(&object_id)
            .filter(|object| object.schema == E::SCHEMA && !object.deleted)
            .ok_or(StoreError::ObjectNotInScope(object_id))?;
        object.values = entity.values();
        Ok(())
    }

    /// Marks the entity deleted in this scope; the next save commits it.
    pub fn delete<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        self.lock_state().mark_deleted(entity.object_id())
    }

    /// Current in-scope state of a registered object.
    pub fn object<E: Entity>(&self, object_id: ObjectId) -> StoreResult<Option<E>> {
        let state = self.lock_state();
        match state.registered.get(&object_id) {
            Some(object) if object.schema == E::SCHEMA && !object.deleted => {
                Ok(Some(E::from_values(object_id, &object.values)?))
            }
            _ => Ok(None),
        }
    }

    /// Discards every pending change and forgets registered objects.
    pub fn rollback(&self) {
        self.lock_state().reset();
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ScopeState> {
        lock(&self.state)
    }

    /// Live children that merge changes automatically.
    pub(crate) fn auto_merge_children(&self) -> Vec<Arc<Scope>> {
        let mut children = lock(&self.children);
        children.retain(|child| child.strong_count() > 0);
        children
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|child| child.auto_merge)
            .collect()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("auto_merge", &self.auto_merge)
            .field("child", &self.parent().is_some())
            .finish()
    }
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{ChangeSet, PendingKind, Scope};
    use crate::model::entity::{Entity, Value};
    use crate::model::post::{PostEntity, POST_SCHEMA};
    use crate::store::merge::MergePolicy;
    use crate::store::StoreError;
    use uuid::Uuid;

    fn values(id: i64, title: &str, body: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::from(title), Value::from(body)]
    }

    #[test]
    fn pending_changes_follow_registration_order() {
        let scope = Scope::new_root(MergePolicy::Error, false);
        let fetched = Uuid::new_v4();
        let inserted = Uuid::new_v4();
        {
            let mut state = scope.lock_state();
            state.register_fetched(&POST_SCHEMA, fetched, &values(1, "a", "b"));
            state.insert_new(&POST_SCHEMA, inserted, values(2, "c", "d"));
            state.registered.get_mut(&fetched).unwrap().values = values(1, "changed", "b");
        }

        let pending = scope.lock_state().pending_changes();
        let kinds = pending.iter().map(|change| change.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![PendingKind::Update, PendingKind::Insert]);
    }

    #[test]
    fn stage_and_delete_require_registration() {
        let scope = Scope::new_root(MergePolicy::Error, false);
        let stranger = PostEntity::new_empty(Uuid::new_v4());
        assert!(matches!(
            scope.stage(&stranger),
            Err(StoreError::ObjectNotInScope(_))
        ));
        assert!(matches!(
            scope.delete(&stranger),
            Err(StoreError::ObjectNotInScope(_))
        ));
    }

    #[test]
    fn deleting_a_pending_insert_leaves_no_changes() {
        let scope = Scope::new_root(MergePolicy::Error, false);
        let entity = PostEntity::new_empty(Uuid::new_v4());
        scope
            .lock_state()
            .insert_new(&POST_SCHEMA, entity.object_id(), entity.values());
        assert!(scope.has_changes());

        scope.delete(&entity).unwrap();
        assert!(!scope.has_changes());
        assert_eq!(scope.registered_count(), 0);
    }

    #[test]
    fn merge_keeps_locally_modified_fields() {
        let scope = Scope::new_root(MergePolicy::Error, true);
        let object_id = Uuid::new_v4();
        let gone = Uuid::new_v4();
        {
            let mut state = scope.lock_state();
            state.register_fetched(&POST_SCHEMA, object_id, &values(1, "a", "b"));
            state.register_fetched(&POST_SCHEMA, gone, &values(2, "x", "y"));
            state.registered.get_mut(&object_id).unwrap().values = values(1, "local", "b");
        }

        let changes = ChangeSet {
            written: vec![(object_id, values(1, "remote", "remote body"))],
            deleted: vec![gone],
        };
        scope.lock_state().merge_changes(&changes);

        let state = scope.lock_state();
        let object = &state.registered[&object_id];
        assert_eq!(object.values, values(1, "local", "remote body"));
        assert_eq!(object.snapshot, values(1, "remote", "remote body"));
        assert!(!state.registered.contains_key(&gone));
    }

    #[test]
    fn children_are_tracked_weakly() {
        let parent = Scope::new_root(MergePolicy::Error, true);
        let child = Scope::new_child(&parent, MergePolicy::MergeByPropertyObjectTrump, true);
        assert_eq!(parent.auto_merge_children().len(), 1);
        assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));

        drop(child);
        assert!(parent.auto_merge_children().is_empty());
    }
}
