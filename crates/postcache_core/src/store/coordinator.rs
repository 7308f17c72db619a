//! Store coordinator: the engine entry point over one physical store.
//!
//! # Responsibility
//! - Open the configured backend and verify every registered entity table.
//! - Run fetch, count, create, save, delete and clean against a scope.
//! - Publish committed changes to auto-merging scopes.
//!
//! # Invariants
//! - A `None` scope always means the view scope.
//! - A save either applies every pending change of the scope or none.
//! - Change publication runs after every scope and backend lock is released.

use super::backend::{commit_mirrored, open_backend, BulkDelete, StoreBackend, StoreKind};
use super::merge::{self, MergePolicy, Resolution};
use super::query::{CompiledPredicate, CompiledRequest, FetchRequest, Predicate};
use super::scope::{
    lock, ChangeSet, PendingChange, PendingKind, Scope, ScopeParent, ScopeState, Settled,
};
use super::sql::{self, StoredRow};
use super::{SaveStatus, StoreError, StoreResult};
use crate::config::StoreConfig;
use crate::model::entity::{Entity, EntitySchema, FieldValues, ObjectId};
use crate::model::MODEL_SCHEMAS;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

/// Mediates every access to the physical store.
///
/// Constructed once and shared as `Arc<StoreCoordinator>`.
pub struct StoreCoordinator {
    kind: StoreKind,
    auto_merge: bool,
    backend: Mutex<Box<dyn StoreBackend>>,
    view_scope: Arc<Scope>,
    /// Store-parented scopes that receive committed changes.
    observers: Mutex<Vec<Weak<Scope>>>,
}

enum CommitStep {
    Insert {
        object_id: ObjectId,
        schema: &'static EntitySchema,
        values: FieldValues,
    },
    Write {
        object_id: ObjectId,
        schema: &'static EntitySchema,
        base: FieldValues,
        values: FieldValues,
    },
    Delete {
        object_id: ObjectId,
        schema: &'static EntitySchema,
        base: FieldValues,
    },
    Discard {
        object_id: ObjectId,
        current: Option<FieldValues>,
    },
}

impl StoreCoordinator {
    /// Opens the configured store and its view scope.
    pub fn open(config: StoreConfig) -> StoreResult<Arc<Self>> {
        let kind = config.kind();
        info!(
            "event=store_open module=store status=start kind={} model={}",
            kind,
            config.model()
        );

        let path = config.store_path()?;
        let backend = match open_backend(kind, path.as_deref()) {
            Ok(backend) => backend,
            Err(err) => {
                error!(
                    "event=store_open module=store status=error kind={} error={}",
                    kind, err
                );
                return Err(err.into());
            }
        };
        for &schema in MODEL_SCHEMAS {
            sql::ensure_entity_table(backend.connection(), schema)?;
        }

        let view_scope = Scope::new_root(MergePolicy::Error, config.auto_merge());
        let coordinator = Self {
            kind,
            auto_merge: config.auto_merge(),
            backend: Mutex::new(backend),
            observers: Mutex::new(vec![Arc::downgrade(&view_scope)]),
            view_scope,
        };
        info!(
            "event=store_open module=store status=ok kind={} entities={}",
            kind,
            MODEL_SCHEMAS.len()
        );
        Ok(Arc::new(coordinator))
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Primary read scope used whenever no scope is given.
    pub fn view_scope(&self) -> &Arc<Scope> {
        &self.view_scope
    }

    /// Creates a scope whose saves push into `parent` (or the view scope).
    ///
    /// Defaults to `MergeByPropertyObjectTrump`.
    pub fn child_scope(
        &self,
        parent: Option<&Arc<Scope>>,
        merge_policy: Option<MergePolicy>,
    ) -> Arc<Scope> {
        let parent = self.scope_or_view(parent);
        let policy = merge_policy.unwrap_or(MergePolicy::MergeByPropertyObjectTrump);
        let child = Scope::new_child(&parent, policy, self.auto_merge);
        debug!(
            "event=scope_create module=store status=ok scope={} parent={} policy={}",
            child.id(),
            parent.id(),
            policy
        );
        child
    }

    /// Creates a scope whose saves commit straight to the store.
    ///
    /// Defaults to `Error`.
    pub fn coordinator_scope(
        &self,
        merge_policy: Option<MergePolicy>,
        auto_merge: bool,
    ) -> Arc<Scope> {
        let policy = merge_policy.unwrap_or(MergePolicy::Error);
        let scope = Scope::new_root(policy, auto_merge);
        let mut observers = lock(&self.observers);
        observers.retain(|observer| observer.strong_count() > 0);
        observers.push(Arc::downgrade(&scope));
        debug!(
            "event=scope_create module=store status=ok scope={} parent=store policy={}",
            scope.id(),
            policy
        );
        scope
    }

    /// Fetches matching entities; errors are logged and yield an empty result.
    pub fn fetch<E: Entity>(&self, request: &FetchRequest, scope: Option<&Arc<Scope>>) -> Vec<E> {
        match self.try_fetch(request, scope) {
            Ok(entities) => entities,
            Err(err) => {
                error!(
                    "event=fetch module=store status=error entity={} error={}",
                    E::SCHEMA.name,
                    err
                );
                Vec::new()
            }
        }
    }

    /// Fetches matching entities, surfacing store errors.
    pub fn try_fetch<E: Entity>(
        &self,
        request: &FetchRequest,
        scope: Option<&Arc<Scope>>,
    ) -> StoreResult<Vec<E>> {
        let scope = self.scope_or_view(scope);
        let compiled = request.compile(E::SCHEMA)?;
        let mut state = scope.lock_state();
        let rows = self.rows_with_state(&state, &scope.parent, E::SCHEMA, &compiled)?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            state.register_fetched(E::SCHEMA, row.object_id, &row.values);
            entities.push(E::from_values(row.object_id, &row.values)?);
        }
        Ok(entities)
    }

    /// First entity of the request, if any.
    pub fn fetch_one<E: Entity>(
        &self,
        request: &FetchRequest,
        scope: Option<&Arc<Scope>>,
    ) -> Option<E> {
        let request = request.clone().limit(1);
        self.fetch(&request, scope).into_iter().next()
    }

    /// Number of entities matching `predicate` as seen from the scope.
    pub fn count<E: Entity>(
        &self,
        predicate: &Predicate,
        scope: Option<&Arc<Scope>>,
    ) -> StoreResult<usize> {
        let scope = self.scope_or_view(scope);
        let compiled = predicate.compile(E::SCHEMA)?;
        let state = scope.lock_state();
        self.count_with_state(&state, &scope.parent, E::SCHEMA, &compiled)
    }

    /// Inserts an empty entity into the scope. Populate it and call
    /// `Scope::stage` before saving.
    pub fn new_entity<E: Entity>(&self, scope: Option<&Arc<Scope>>) -> E {
        let scope = self.scope_or_view(scope);
        let entity = E::new_empty(Uuid::new_v4());
        scope
            .lock_state()
            .insert_new(E::SCHEMA, entity.object_id(), entity.values());
        entity
    }

    /// Commits the scope's pending changes to its parent.
    pub fn save(&self, scope: Option<&Arc<Scope>>) -> SaveStatus {
        let scope = self.scope_or_view(scope);
        let committed = {
            let mut state = scope.lock_state();
            match &scope.parent {
                ScopeParent::Store => self.commit_to_store(&mut state),
                ScopeParent::Scope(parent) => self.commit_to_scope(&mut state, parent),
            }
        };

        match committed {
            Ok(None) => {
                debug!(
                    "event=scope_save module=store status=ok scope={} changes=0",
                    scope.id()
                );
                SaveStatus::HasNoChanges
            }
            Ok(Some(changes)) => {
                info!(
                    "event=scope_save module=store status=ok scope={} written={} deleted={}",
                    scope.id(),
                    changes.written.len(),
                    changes.deleted.len()
                );
                self.publish(&scope, &changes);
                SaveStatus::Saved
            }
            Err(err) => {
                error!(
                    "event=scope_save module=store status=error scope={} error={}",
                    scope.id(),
                    err
                );
                SaveStatus::Error(err)
            }
        }
    }

    /// Deletes one entity in the scope, then saves the scope.
    pub fn delete<E: Entity>(&self, entity: &E, scope: Option<&Arc<Scope>>) -> SaveStatus {
        let scope = self.scope_or_view(scope);
        let marked = self
            .adopt(&scope, E::SCHEMA, entity.object_id())
            .and_then(|()| scope.delete(entity));
        if let Err(err) = marked {
            error!(
                "event=delete module=store status=error entity={} error={}",
                E::SCHEMA.name,
                err
            );
            return SaveStatus::Error(err);
        }
        self.save(Some(&scope))
    }

    /// Deletes every entity matching `predicate`. Reports `Saved` whenever
    /// the delete ran, even if nothing matched.
    ///
    /// Backends with bulk delete remove the rows at store level and merge the
    /// deletion into `scope` and every scope in `propagate_to`. The in-memory
    /// backend marks the matches deleted in `scope` and leaves the commit to
    /// the caller's next save.
    pub fn clean<E: Entity>(
        &self,
        predicate: &Predicate,
        scope: Option<&Arc<Scope>>,
        propagate_to: &[Arc<Scope>],
    ) -> SaveStatus {
        let scope = self.scope_or_view(scope);
        let outcome = self.lock_backend().bulk_delete(E::SCHEMA, predicate);
        match outcome {
            Ok(BulkDelete::Deleted(deleted)) => {
                info!(
                    "event=clean module=store status=ok strategy=bulk_delete entity={} deleted={} propagate={}",
                    E::SCHEMA.name,
                    deleted.len(),
                    propagate_to.len()
                );
                let changes = ChangeSet::deletions(deleted);
                if !changes.is_empty() {
                    merge_into(&scope, &changes);
                    for target in propagate_to {
                        if target.id() != scope.id() {
                            merge_into(target, &changes);
                        }
                    }
                }
                SaveStatus::Saved
            }
            Ok(BulkDelete::Unsupported) => self.clean_in_scope::<E>(predicate, &scope).into(),
            Err(err) => {
                error!(
                    "event=clean module=store status=error entity={} error={}",
                    E::SCHEMA.name,
                    err
                );
                SaveStatus::Error(err)
            }
        }
    }

    /// Opens a store-parented scope on the blocking pool and runs `task`.
    ///
    /// The scope uses `merge_policy`, defaulting to `Error`.
    pub async fn background_task<T, F>(
        self: &Arc<Self>,
        merge_policy: Option<MergePolicy>,
        task: F,
    ) -> StoreResult<T>
    where
        F: FnOnce(&StoreCoordinator, &Arc<Scope>) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |coordinator| {
            let scope = coordinator.coordinator_scope(merge_policy, false);
            task(coordinator, &scope)
        })
        .await
    }

    pub async fn fetch_async<E: Entity>(
        self: &Arc<Self>,
        request: FetchRequest,
        scope: Option<Arc<Scope>>,
    ) -> Vec<E> {
        let fetched = self
            .run_blocking(move |coordinator| coordinator.fetch::<E>(&request, scope.as_ref()))
            .await;
        fetched.unwrap_or_else(|err| {
            error!(
                "event=fetch module=store status=error entity={} error={}",
                E::SCHEMA.name,
                err
            );
            Vec::new()
        })
    }

    pub async fn try_fetch_async<E: Entity>(
        self: &Arc<Self>,
        request: FetchRequest,
        scope: Option<Arc<Scope>>,
    ) -> StoreResult<Vec<E>> {
        self.run_blocking(move |coordinator| coordinator.try_fetch::<E>(&request, scope.as_ref()))
            .await?
    }

    pub async fn save_async(self: &Arc<Self>, scope: Option<Arc<Scope>>) -> SaveStatus {
        self.run_blocking(move |coordinator| coordinator.save(scope.as_ref()))
            .await
            .into()
    }

    pub async fn delete_async<E: Entity>(
        self: &Arc<Self>,
        entity: E,
        scope: Option<Arc<Scope>>,
    ) -> SaveStatus {
        self.run_blocking(move |coordinator| coordinator.delete(&entity, scope.as_ref()))
            .await
            .into()
    }

    pub async fn clean_async<E: Entity>(
        self: &Arc<Self>,
        predicate: Predicate,
        scope: Option<Arc<Scope>>,
        propagate_to: Vec<Arc<Scope>>,
    ) -> SaveStatus {
        self.run_blocking(move |coordinator| {
            coordinator.clean::<E>(&predicate, scope.as_ref(), &propagate_to)
        })
        .await
        .into()
    }

    async fn run_blocking<T, F>(self: &Arc<Self>, work: F) -> StoreResult<T>
    where
        F: FnOnce(&StoreCoordinator) -> T + Send + 'static,
        T: Send + 'static,
    {
        let coordinator = Arc::clone(self);
        let output = tokio::task::spawn_blocking(move || work(&coordinator)).await?;
        Ok(output)
    }

    fn scope_or_view(&self, scope: Option<&Arc<Scope>>) -> Arc<Scope> {
        scope.map_or_else(|| Arc::clone(&self.view_scope), Arc::clone)
    }

    fn lock_backend(&self) -> MutexGuard<'_, Box<dyn StoreBackend>> {
        lock(&self.backend)
    }

    /// Rows of `schema` visible from a scope holding `state`, with the
    /// scope's pending changes laid over its parent's rows.
    fn rows_with_state(
        &self,
        state: &ScopeState,
        parent: &ScopeParent,
        schema: &'static EntitySchema,
        request: &CompiledRequest,
    ) -> StoreResult<Vec<StoredRow>> {
        if !state.has_changes_for(schema) {
            return self.parent_rows(parent, schema, request);
        }

        let base = self.parent_rows(parent, schema, &request.unbounded())?;
        let mut seen = HashSet::with_capacity(base.len());
        let mut rows = Vec::with_capacity(base.len());
        for row in base {
            seen.insert(row.object_id);
            match state.registered.get(&row.object_id) {
                Some(object) if object.deleted => {}
                Some(object) if object.is_modified() => {
                    if request.predicate.matches(&object.values) {
                        rows.push(StoredRow {
                            object_id: row.object_id,
                            values: object.values.clone(),
                        });
                    }
                }
                _ => rows.push(row),
            }
        }

        let mut extras = state
            .registered
            .iter()
            .filter(|(object_id, object)| {
                object.schema == schema
                    && !object.deleted
                    && (object.inserted || object.is_modified())
                    && !seen.contains(*object_id)
                    && request.predicate.matches(&object.values)
            })
            .collect::<Vec<_>>();
        extras.sort_by_key(|(_, object)| object.seq);
        for (object_id, object) in extras {
            if !object.inserted && self.parent_row(parent, schema, *object_id)?.is_none() {
                continue;
            }
            rows.push(StoredRow {
                object_id: *object_id,
                values: object.values.clone(),
            });
        }

        Ok(request.order_and_window(rows, |row| row.values.as_slice()))
    }

    fn parent_rows(
        &self,
        parent: &ScopeParent,
        schema: &'static EntitySchema,
        request: &CompiledRequest,
    ) -> StoreResult<Vec<StoredRow>> {
        match parent {
            ScopeParent::Store => {
                let backend = self.lock_backend();
                sql::select_rows(backend.connection(), schema, request)
            }
            ScopeParent::Scope(scope) => {
                let state = scope.lock_state();
                self.rows_with_state(&state, &scope.parent, schema, request)
            }
        }
    }

    fn parent_row(
        &self,
        parent: &ScopeParent,
        schema: &'static EntitySchema,
        object_id: ObjectId,
    ) -> StoreResult<Option<FieldValues>> {
        match parent {
            ScopeParent::Store => {
                let backend = self.lock_backend();
                let row = sql::select_row(backend.connection(), schema, object_id)?;
                Ok(row.map(|row| row.values))
            }
            ScopeParent::Scope(scope) => {
                let state = scope.lock_state();
                self.row_with_state(&state, &scope.parent, schema, object_id)
            }
        }
    }

    fn row_with_state(
        &self,
        state: &ScopeState,
        parent: &ScopeParent,
        schema: &'static EntitySchema,
        object_id: ObjectId,
    ) -> StoreResult<Option<FieldValues>> {
        match state.registered.get(&object_id) {
            Some(object) if object.deleted => Ok(None),
            Some(object) if object.inserted || object.is_modified() => {
                Ok(Some(object.values.clone()))
            }
            _ => self.parent_row(parent, schema, object_id),
        }
    }

    fn count_with_state(
        &self,
        state: &ScopeState,
        parent: &ScopeParent,
        schema: &'static EntitySchema,
        predicate: &CompiledPredicate,
    ) -> StoreResult<usize> {
        if state.has_changes_for(schema) {
            let request = CompiledRequest::matching(predicate.clone());
            return Ok(self.rows_with_state(state, parent, schema, &request)?.len());
        }

        match parent {
            ScopeParent::Store => {
                let backend = self.lock_backend();
                sql::count_rows(backend.connection(), schema, predicate)
            }
            ScopeParent::Scope(scope) => {
                let state = scope.lock_state();
                self.count_with_state(&state, &scope.parent, schema, predicate)
            }
        }
    }

    /// Registers an object the scope has not seen yet, reading it through
    /// the parent chain.
    fn adopt(
        &self,
        scope: &Arc<Scope>,
        schema: &'static EntitySchema,
        object_id: ObjectId,
    ) -> StoreResult<()> {
        let mut state = scope.lock_state();
        if state.registered.contains_key(&object_id) {
            return Ok(());
        }
        let values = self
            .parent_row(&scope.parent, schema, object_id)?
            .ok_or(StoreError::ObjectNotInScope(object_id))?;
        state.register_fetched(schema, object_id, &values);
        Ok(())
    }

    fn commit_to_store(&self, state: &mut ScopeState) -> StoreResult<Option<ChangeSet>> {
        let pending = state.pending_changes();
        if pending.is_empty() {
            return Ok(None);
        }
        let policy = state.merge_policy;

        let mut backend = self.lock_backend();
        let image = backend.image_path().map(Path::to_path_buf);
        let tx = backend.connection_mut().transaction()?;
        let steps = plan_commit(pending, policy, |schema, object_id| {
            let row = sql::select_row(&tx, schema, object_id)?;
            Ok(row.map(|row| row.values))
        })?;

        let mut changes = ChangeSet::default();
        let mut settled = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                CommitStep::Insert {
                    object_id,
                    schema,
                    values,
                } => {
                    sql::insert_row(&tx, schema, object_id, &values)?;
                    changes.written.push((object_id, values.clone()));
                    settled.push(Settled::Clean(object_id, values));
                }
                CommitStep::Write {
                    object_id,
                    schema,
                    values,
                    ..
                } => {
                    sql::update_row(&tx, schema, object_id, &values)?;
                    changes.written.push((object_id, values.clone()));
                    settled.push(Settled::Clean(object_id, values));
                }
                CommitStep::Delete {
                    object_id, schema, ..
                } => {
                    sql::delete_row(&tx, schema, object_id)?;
                    changes.deleted.push(object_id);
                    settled.push(Settled::Forget(object_id));
                }
                CommitStep::Discard { object_id, current } => {
                    settled.push(discarded(object_id, current));
                }
            }
        }
        commit_mirrored(tx, image.as_deref())?;
        drop(backend);

        state.settle(settled);
        Ok(Some(changes))
    }

    fn commit_to_scope(
        &self,
        state: &mut ScopeState,
        parent: &Arc<Scope>,
    ) -> StoreResult<Option<ChangeSet>> {
        let pending = state.pending_changes();
        if pending.is_empty() {
            return Ok(None);
        }
        let policy = state.merge_policy;

        let mut parent_state = parent.lock_state();
        let steps = plan_commit(pending, policy, |schema, object_id| {
            self.row_with_state(&parent_state, &parent.parent, schema, object_id)
        })?;

        let mut changes = ChangeSet::default();
        let mut settled = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                CommitStep::Insert {
                    object_id,
                    schema,
                    values,
                } => {
                    parent_state.insert_new(schema, object_id, values.clone());
                    changes.written.push((object_id, values.clone()));
                    settled.push(Settled::Clean(object_id, values));
                }
                CommitStep::Write {
                    object_id,
                    schema,
                    base,
                    values,
                } => {
                    parent_state.stage_values(schema, object_id, base, values.clone());
                    changes.written.push((object_id, values.clone()));
                    settled.push(Settled::Clean(object_id, values));
                }
                CommitStep::Delete {
                    object_id,
                    schema,
                    base,
                } => {
                    parent_state.stage_delete(schema, object_id, base);
                    changes.deleted.push(object_id);
                    settled.push(Settled::Forget(object_id));
                }
                CommitStep::Discard { object_id, current } => {
                    settled.push(discarded(object_id, current));
                }
            }
        }
        drop(parent_state);

        state.settle(settled);
        Ok(Some(changes))
    }

    /// Hands committed changes to the saver's auto-merging siblings.
    fn publish(&self, saver: &Arc<Scope>, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }

        let targets = match &saver.parent {
            ScopeParent::Store => {
                let mut observers = lock(&self.observers);
                observers.retain(|observer| observer.strong_count() > 0);
                observers
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|observer| observer.auto_merges())
                    .collect::<Vec<_>>()
            }
            ScopeParent::Scope(parent) => parent.auto_merge_children(),
        };

        for target in targets {
            if target.id() != saver.id() {
                merge_into(&target, changes);
            }
        }
    }

    fn clean_in_scope<E: Entity>(
        &self,
        predicate: &Predicate,
        scope: &Arc<Scope>,
    ) -> StoreResult<SaveStatus> {
        let request = FetchRequest::matching(predicate.clone());
        let matches = self.try_fetch::<E>(&request, Some(scope))?;
        for entity in &matches {
            scope.delete(entity)?;
        }
        info!(
            "event=clean module=store status=ok strategy=fetch_delete entity={} deleted={}",
            E::SCHEMA.name,
            matches.len()
        );
        Ok(SaveStatus::Saved)
    }
}

/// Resolves every pending change before anything is applied, so a conflict
/// leaves both sides untouched.
fn plan_commit(
    pending: Vec<PendingChange>,
    policy: MergePolicy,
    mut current_of: impl FnMut(&'static EntitySchema, ObjectId) -> StoreResult<Option<FieldValues>>,
) -> StoreResult<Vec<CommitStep>> {
    let mut steps = Vec::with_capacity(pending.len());
    let mut conflicts = Vec::new();
    let mut conflict_entity = "";

    for change in pending {
        let PendingChange {
            object_id,
            schema,
            kind,
            snapshot,
            values,
        } = change;
        if kind == PendingKind::Insert {
            steps.push(CommitStep::Insert {
                object_id,
                schema,
                values,
            });
            continue;
        }

        let current = current_of(schema, object_id)?;
        let delete = kind == PendingKind::Delete;
        let resolution = merge::resolve(policy, &snapshot, &values, delete, current.as_deref());
        let step = match (resolution, current) {
            (Resolution::Write(values), Some(base)) => CommitStep::Write {
                object_id,
                schema,
                base,
                values,
            },
            (Resolution::Delete, Some(base)) => CommitStep::Delete {
                object_id,
                schema,
                base,
            },
            (Resolution::Write(_) | Resolution::Delete, None) => CommitStep::Discard {
                object_id,
                current: None,
            },
            (Resolution::Discard { current }, _) => {
                warn!(
                    "event=merge module=store status=discard entity={} object_id={} policy={}",
                    schema.name, object_id, policy
                );
                CommitStep::Discard { object_id, current }
            }
            (Resolution::Conflict, _) => {
                conflict_entity = schema.name;
                conflicts.push(object_id);
                continue;
            }
        };
        steps.push(step);
    }

    if !conflicts.is_empty() {
        return Err(StoreError::MergeConflict {
            entity: conflict_entity,
            object_ids: conflicts,
        });
    }
    Ok(steps)
}

fn discarded(object_id: ObjectId, current: Option<FieldValues>) -> Settled {
    match current {
        Some(values) => Settled::Clean(object_id, values),
        None => Settled::Forget(object_id),
    }
}

/// Merges `changes` into `scope`, then into its auto-merging children.
fn merge_into(scope: &Arc<Scope>, changes: &ChangeSet) {
    scope.lock_state().merge_changes(changes);
    for child in scope.auto_merge_children() {
        merge_into(&child, changes);
    }
}

#[cfg(test)]
mod tests {
    use super::StoreCoordinator;
    use crate::config::StoreConfig;
    use crate::model::post::PostEntity;
    use crate::store::merge::MergePolicy;
    use crate::store::query::{FetchRequest, Predicate, SortDescriptor};
    use crate::store::SaveStatus;

    fn post(
        coordinator: &StoreCoordinator,
        scope: &std::sync::Arc<crate::store::Scope>,
        id: i64,
        title: &str,
    ) -> PostEntity {
        let mut entity = coordinator.new_entity::<PostEntity>(Some(scope));
        entity.id = id;
        entity.title = title.to_string();
        scope.stage(&entity).unwrap();
        entity
    }

    #[test]
    fn pending_changes_overlay_parent_rows_in_fetches() {
        let coordinator = StoreCoordinator::open(StoreConfig::in_memory("Model").unwrap()).unwrap();
        let view = coordinator.view_scope().clone();
        post(&coordinator, &view, 2, "stored");
        assert!(coordinator.save(None).is_saved());

        let child = coordinator.child_scope(None, None);
        post(&coordinator, &child, 1, "pending");
        let request = FetchRequest::all().sorted_by(SortDescriptor::asc("id"));

        let in_child = coordinator.fetch::<PostEntity>(&request, Some(&child));
        let titles = in_child.iter().map(|p| p.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["pending", "stored"]);
        assert_eq!(coordinator.fetch::<PostEntity>(&request, None).len(), 1);
        assert_eq!(coordinator.count::<PostEntity>(&Predicate::True, Some(&child)).unwrap(), 2);
    }

    #[test]
    fn child_save_pushes_into_parent_without_committing() {
        let coordinator = StoreCoordinator::open(StoreConfig::in_memory("Model").unwrap()).unwrap();
        let child = coordinator.child_scope(None, Some(MergePolicy::Error));
        post(&coordinator, &child, 7, "draft");

        assert!(coordinator.save(Some(&child)).is_saved());
        assert!(coordinator.view_scope().has_changes());
        assert!(matches!(coordinator.save(Some(&child)), SaveStatus::HasNoChanges));

        let background = coordinator.coordinator_scope(None, false);
        assert!(coordinator
            .fetch::<PostEntity>(&FetchRequest::all(), Some(&background))
            .is_empty());

        assert!(coordinator.save(None).is_saved());
        assert_eq!(
            coordinator
                .fetch::<PostEntity>(&FetchRequest::all(), Some(&background))
                .len(),
            1
        );
    }
}
