//! Query builder for entity fetch, count and clean requests.
//!
//! # Responsibility
//! - Express conjunctions/disjunctions of typed field comparisons.
//! - Validate field names and operand kinds against an entity schema.
//! - Render parameterised SQL and evaluate the same predicate in memory.
//!
//! # Invariants
//! - SQL and in-memory evaluation agree for every compiled predicate,
//!   including null handling (comparisons with null never match).
//! - An empty `all` matches everything; an empty `any` matches nothing.

use super::{StoreError, StoreResult};
use crate::model::entity::{EntitySchema, FieldKind, Value};
use std::cmp::Ordering;

/// Field comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Case-sensitive substring match on text fields.
    Contains,
    /// Case-sensitive prefix match on text fields.
    BeginsWith,
}

impl CompareOp {
    fn is_text_only(self) -> bool {
        matches!(self, Self::Contains | Self::BeginsWith)
    }
}

/// Typed predicate over entity fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Self::True
    }
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Contains, Value::Text(value.into()))
    }

    pub fn begins_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::BeginsWith, Value::Text(value.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Eq, Value::Null)
    }

    /// Conjunction of all predicates. Empty input matches everything.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And(predicates.into_iter().collect())
    }

    /// Disjunction of all predicates. Empty input matches nothing.
    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or(predicates.into_iter().collect())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            Self::True => other,
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub(crate) fn compile(&self, schema: &'static EntitySchema) -> StoreResult<CompiledPredicate> {
        let compiled = match self {
            Self::True => CompiledPredicate::True,
            Self::Compare { field, op, value } => {
                let (index, def) = schema.field(field).ok_or_else(|| StoreError::UnknownField {
                    entity: schema.name,
                    field: field.clone(),
                })?;
                let mismatch = || StoreError::TypeMismatch {
                    entity: schema.name,
                    field: def.name,
                    expected: def.kind,
                    found: value.clone(),
                };
                if op.is_text_only() && (def.kind != FieldKind::Text || value.is_null()) {
                    return Err(mismatch());
                }
                let value = def.kind.coerce(value).ok_or_else(mismatch)?;
                CompiledPredicate::Compare {
                    index,
                    column: def.name,
                    op: *op,
                    value,
                }
            }
            Self::And(items) => CompiledPredicate::And(
                items
                    .iter()
                    .map(|item| item.compile(schema))
                    .collect::<StoreResult<_>>()?,
            ),
            Self::Or(items) => CompiledPredicate::Or(
                items
                    .iter()
                    .map(|item| item.compile(schema))
                    .collect::<StoreResult<_>>()?,
            ),
            Self::Not(inner) => CompiledPredicate::Not(Box::new(inner.compile(schema)?)),
        };
        Ok(compiled)
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

/// Sort key for fetch requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Fetch request: predicate, sort order and result window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub predicate: Predicate,
    pub sort: Vec<SortDescriptor>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Request matching every object.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matching(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: SortDescriptor) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn compile(&self, schema: &'static EntitySchema) -> StoreResult<CompiledRequest> {
        let sort = self
            .sort
            .iter()
            .map(|descriptor| {
                let (index, def) =
                    schema
                        .field(&descriptor.field)
                        .ok_or_else(|| StoreError::UnknownField {
                            entity: schema.name,
                            field: descriptor.field.clone(),
                        })?;
                Ok(CompiledSort {
                    index,
                    column: def.name,
                    ascending: descriptor.ascending,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(CompiledRequest {
            predicate: self.predicate.compile(schema)?,
            sort,
            offset: self.offset,
            limit: self.limit,
        })
    }
}

/// Predicate resolved against a schema with operands coerced to field kinds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledPredicate {
    True,
    Compare {
        index: usize,
        column: &'static str,
        op: CompareOp,
        value: Value,
    },
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
    Not(Box<CompiledPredicate>),
}

impl CompiledPredicate {
    /// Renders a SQL boolean expression, appending operands to `binds`.
    pub(crate) fn to_sql(&self, binds: &mut Vec<Value>) -> String {
        match self {
            Self::True => "1".to_string(),
            Self::Compare {
                column, op, value, ..
            } => {
                if value.is_null() {
                    match op {
                        CompareOp::Eq => return format!("\"{column}\" IS NULL"),
                        CompareOp::Ne => return format!("\"{column}\" IS NOT NULL"),
                        _ => {}
                    }
                }
                binds.push(value.clone());
                let expr = match op {
                    CompareOp::Eq => format!("\"{column}\" = ?"),
                    CompareOp::Ne => format!("\"{column}\" <> ?"),
                    CompareOp::Lt => format!("\"{column}\" < ?"),
                    CompareOp::Le => format!("\"{column}\" <= ?"),
                    CompareOp::Gt => format!("\"{column}\" > ?"),
                    CompareOp::Ge => format!("\"{column}\" >= ?"),
                    CompareOp::Contains => format!("instr(\"{column}\", ?) > 0"),
                    CompareOp::BeginsWith => format!("instr(\"{column}\", ?) = 1"),
                };
                // Null comparisons collapse to false so NOT stays two-valued.
                format!("COALESCE({expr}, 0)")
            }
            Self::And(items) if items.is_empty() => "1".to_string(),
            Self::Or(items) if items.is_empty() => "0".to_string(),
            Self::And(items) => join_sql(items, " AND ", binds),
            Self::Or(items) => join_sql(items, " OR ", binds),
            Self::Not(inner) => format!("NOT ({})", inner.to_sql(binds)),
        }
    }

    /// Evaluates the predicate against values in schema order.
    pub(crate) fn matches(&self, values: &[Value]) -> bool {
        match self {
            Self::True => true,
            Self::Compare {
                index, op, value, ..
            } => {
                let field = values.get(*index).unwrap_or(&Value::Null);
                compare_values(field, *op, value)
            }
            Self::And(items) => items.iter().all(|item| item.matches(values)),
            Self::Or(items) => items.iter().any(|item| item.matches(values)),
            Self::Not(inner) => !inner.matches(values),
        }
    }
}

fn join_sql(items: &[CompiledPredicate], separator: &str, binds: &mut Vec<Value>) -> String {
    let parts = items
        .iter()
        .map(|item| format!("({})", item.to_sql(binds)))
        .collect::<Vec<_>>();
    parts.join(separator)
}

fn compare_values(field: &Value, op: CompareOp, operand: &Value) -> bool {
    if operand.is_null() {
        return match op {
            CompareOp::Eq => field.is_null(),
            CompareOp::Ne => !field.is_null(),
            _ => false,
        };
    }
    if field.is_null() {
        return false;
    }

    match op {
        CompareOp::Contains => match (field, operand) {
            (Value::Text(text), Value::Text(needle)) => text.contains(needle.as_str()),
            _ => false,
        },
        CompareOp::BeginsWith => match (field, operand) {
            (Value::Text(text), Value::Text(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        _ => match field.compare(operand) {
            Some(ordering) => match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Contains | CompareOp::BeginsWith => false,
            },
            None => false,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompiledSort {
    pub(crate) index: usize,
    pub(crate) column: &'static str,
    pub(crate) ascending: bool,
}

/// Fetch request resolved against a schema.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledRequest {
    pub(crate) predicate: CompiledPredicate,
    pub(crate) sort: Vec<CompiledSort>,
    pub(crate) offset: Option<usize>,
    pub(crate) limit: Option<usize>,
}

impl CompiledRequest {
    pub(crate) fn matching(predicate: CompiledPredicate) -> Self {
        Self {
            predicate,
            sort: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Same predicate without ordering or window.
    pub(crate) fn unbounded(&self) -> Self {
        Self::matching(self.predicate.clone())
    }

    /// Stable in-memory sort, then offset and limit.
    pub(crate) fn order_and_window<T>(
        &self,
        mut items: Vec<T>,
        values: impl Fn(&T) -> &[Value],
    ) -> Vec<T> {
        if !self.sort.is_empty() {
            items.sort_by(|a, b| {
                let (a, b) = (values(a), values(b));
                for key in &self.sort {
                    let left = a.get(key.index).unwrap_or(&Value::Null);
                    let right = b.get(key.index).unwrap_or(&Value::Null);
                    let ordering = left.sort_cmp(right);
                    let ordering = if key.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchRequest, Predicate, SortDescriptor};
    use crate::model::entity::Value;
    use crate::model::post::POST_SCHEMA;
    use crate::store::StoreError;

    const SCHEMA: &crate::model::entity::EntitySchema = &POST_SCHEMA;

    fn row(id: i64, title: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::Text(title.into()), Value::Text(String::new())]
    }

    #[test]
    fn empty_compounds_follow_and_or_identity() {
        let all = Predicate::all([]).compile(SCHEMA).unwrap();
        let any = Predicate::any([]).compile(SCHEMA).unwrap();
        assert!(all.matches(&row(1, "a")));
        assert!(!any.matches(&row(1, "a")));

        let mut binds = Vec::new();
        assert_eq!(all.to_sql(&mut binds), "1");
        assert_eq!(any.to_sql(&mut binds), "0");
        assert!(binds.is_empty());
    }

    #[test]
    fn renders_parameterised_sql() {
        let predicate = Predicate::eq("id", 1)
            .or(Predicate::begins_with("title", "Hel"))
            .compile(SCHEMA)
            .unwrap();
        let mut binds = Vec::new();
        let sql = predicate.to_sql(&mut binds);
        assert_eq!(
            sql,
            "(COALESCE(\"id\" = ?, 0)) OR (COALESCE(instr(\"title\", ?) = 1, 0))"
        );
        assert_eq!(binds, vec![Value::Integer(1), Value::Text("Hel".into())]);
    }

    #[test]
    fn in_memory_evaluation_handles_nulls_and_negation() {
        let predicate = (!Predicate::eq("title", "x")).compile(SCHEMA).unwrap();
        let null_title = vec![Value::Integer(1), Value::Null, Value::Null];
        assert!(predicate.matches(&null_title));
        assert!(!predicate.matches(&row(1, "x")));

        let is_null = Predicate::is_null("title").compile(SCHEMA).unwrap();
        assert!(is_null.matches(&null_title));
        assert!(!is_null.matches(&row(1, "")));
    }

    #[test]
    fn compile_rejects_unknown_fields_and_mismatched_operands() {
        let err = Predicate::eq("missing", 1).compile(SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));

        let err = Predicate::eq("title", 1).compile(SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { field: "title", .. }));

        let err = Predicate::contains("id", "1").compile(SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { field: "id", .. }));

        let err = FetchRequest::all()
            .sorted_by(SortDescriptor::asc("nope"))
            .compile(SCHEMA)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[test]
    fn order_and_window_is_stable() {
        let request = FetchRequest::all()
            .sorted_by(SortDescriptor::desc("id"))
            .offset(1)
            .limit(2)
            .compile(SCHEMA)
            .unwrap();
        let rows = vec![row(1, "a"), row(3, "b"), row(2, "c"), row(3, "d")];
        let ordered = request.order_and_window(rows, |values| values.as_slice());
        assert_eq!(ordered, vec![row(3, "d"), row(2, "c")]);
    }
}
