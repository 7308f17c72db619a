//! Merge policies applied when a scope saves over diverged parent state.
//!
//! # Invariants
//! - A conflict exists when the parent's current values differ from the
//!   snapshot the scope registered the object with.
//! - Property-level policies decide field by field; whole-object policies
//!   keep one side entirely.

use crate::model::entity::{FieldValues, Value};
use std::fmt::{Display, Formatter};

/// Conflict-resolution rule for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Conflicting saves fail and nothing is committed.
    Error,
    /// Fields changed in the scope win; other fields take the parent's values.
    MergeByPropertyObjectTrump,
    /// Fields changed in the parent win; fields changed only in the scope apply.
    MergeByPropertyStoreTrump,
    /// The scope's object replaces the parent's object entirely.
    Overwrite,
    /// The scope's change to a conflicting object is discarded.
    Rollback,
}

impl MergePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::MergeByPropertyObjectTrump => "property_object_trump",
            Self::MergeByPropertyStoreTrump => "property_store_trump",
            Self::Overwrite => "overwrite",
            Self::Rollback => "rollback",
        }
    }
}

impl Display for MergePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one pending update or delete.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    /// Write these values to the parent.
    Write(FieldValues),
    /// Delete the object from the parent.
    Delete,
    /// Drop the local change; the scope adopts `current` (or forgets the
    /// object when the parent no longer has it).
    Discard { current: Option<FieldValues> },
    /// Unresolvable under `MergePolicy::Error`.
    Conflict,
}

/// Resolves one pending change of an already persisted object.
pub(crate) fn resolve(
    policy: MergePolicy,
    snapshot: &[Value],
    local: &[Value],
    delete: bool,
    current: Option<&[Value]>,
) -> Resolution {
    let Some(current) = current else {
        if delete || policy != MergePolicy::Error {
            return Resolution::Discard { current: None };
        }
        return Resolution::Conflict;
    };

    if current == snapshot {
        return if delete {
            Resolution::Delete
        } else {
            Resolution::Write(local.to_vec())
        };
    }

    match (policy, delete) {
        (MergePolicy::Error, _) => Resolution::Conflict,
        (MergePolicy::Rollback, _) | (MergePolicy::MergeByPropertyStoreTrump, true) => {
            Resolution::Discard {
                current: Some(current.to_vec()),
            }
        }
        (MergePolicy::Overwrite | MergePolicy::MergeByPropertyObjectTrump, true) => {
            Resolution::Delete
        }
        (MergePolicy::Overwrite, false) => Resolution::Write(local.to_vec()),
        (MergePolicy::MergeByPropertyObjectTrump, false) => Resolution::Write(
            field_merge(snapshot, local, current, |local_changed, _| local_changed),
        ),
        (MergePolicy::MergeByPropertyStoreTrump, false) => Resolution::Write(field_merge(
            snapshot,
            local,
            current,
            |local_changed, parent_changed| local_changed && !parent_changed,
        )),
    }
}

/// Picks each field from `local` when `take_local(local_changed, parent_changed)`.
fn field_merge(
    snapshot: &[Value],
    local: &[Value],
    current: &[Value],
    take_local: impl Fn(bool, bool) -> bool,
) -> FieldValues {
    current
        .iter()
        .enumerate()
        .map(|(index, parent_value)| {
            let base = snapshot.get(index);
            let local_value = local.get(index).unwrap_or(parent_value);
            let local_changed = base != Some(local_value);
            let parent_changed = base != Some(parent_value);
            if take_local(local_changed, parent_changed) {
                local_value.clone()
            } else {
                parent_value.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{resolve, MergePolicy, Resolution};
    use crate::model::entity::Value;

    fn post(id: i64, title: &str, body: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::from(title), Value::from(body)]
    }

    #[test]
    fn unchanged_parent_applies_local_change_under_every_policy() {
        let snapshot = post(1, "a", "b");
        let local = post(1, "local", "b");
        for policy in [
            MergePolicy::Error,
            MergePolicy::MergeByPropertyObjectTrump,
            MergePolicy::MergeByPropertyStoreTrump,
            MergePolicy::Overwrite,
            MergePolicy::Rollback,
        ] {
            let resolution = resolve(policy, &snapshot, &local, false, Some(&snapshot));
            assert_eq!(resolution, Resolution::Write(local.clone()));
        }
    }

    #[test]
    fn error_policy_reports_conflicts() {
        let snapshot = post(1, "a", "b");
        let local = post(1, "local", "b");
        let current = post(1, "a", "remote");
        assert_eq!(
            resolve(MergePolicy::Error, &snapshot, &local, false, Some(&current)),
            Resolution::Conflict
        );
        assert_eq!(
            resolve(MergePolicy::Error, &snapshot, &local, false, None),
            Resolution::Conflict
        );
    }

    #[test]
    fn object_trump_merges_field_by_field() {
        let snapshot = post(1, "a", "b");
        let local = post(1, "local", "b");
        let current = post(1, "remote", "remote body");
        let resolution = resolve(
            MergePolicy::MergeByPropertyObjectTrump,
            &snapshot,
            &local,
            false,
            Some(&current),
        );
        assert_eq!(resolution, Resolution::Write(post(1, "local", "remote body")));
    }

    #[test]
    fn store_trump_keeps_parent_fields_on_overlap() {
        let snapshot = post(1, "a", "b");
        let local = post(2, "local", "b");
        let current = post(1, "remote", "b");
        let resolution = resolve(
            MergePolicy::MergeByPropertyStoreTrump,
            &snapshot,
            &local,
            false,
            Some(&current),
        );
        assert_eq!(resolution, Resolution::Write(post(2, "remote", "b")));
    }

    #[test]
    fn rollback_and_overwrite_pick_one_side() {
        let snapshot = post(1, "a", "b");
        let local = post(1, "local", "b");
        let current = post(1, "a", "remote");
        assert_eq!(
            resolve(MergePolicy::Overwrite, &snapshot, &local, false, Some(&current)),
            Resolution::Write(local.clone())
        );
        assert_eq!(
            resolve(MergePolicy::Rollback, &snapshot, &local, false, Some(&current)),
            Resolution::Discard {
                current: Some(current.clone())
            }
        );
    }

    #[test]
    fn deleting_a_vanished_object_is_not_a_conflict() {
        let snapshot = post(1, "a", "b");
        assert_eq!(
            resolve(MergePolicy::Error, &snapshot, &snapshot, true, None),
            Resolution::Discard { current: None }
        );
    }
}
