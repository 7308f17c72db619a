//! Post record and persisted post entity.
//!
//! # Responsibility
//! - Define the immutable `Post` record handed to presentation callers.
//! - Define `PostEntity`, the durable counterpart stored in `posts`.
//! - Convert between raw key-value maps, records and entities.
//!
//! # Invariants
//! - Missing or mistyped raw fields default to `0` / `""`.
//! - `id` is not unique; duplicates are legal at every layer.

use crate::model::entity::{
    Entity, EntitySchema, FieldDef, FieldKind, FieldValues, ObjectId, Value, ValueError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Raw post payload as delivered by the fetch client.
pub type RawRecord = BTreeMap<String, JsonValue>;

/// Immutable post record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    id: i64,
    title: String,
    body: String,
}

impl Post {
    pub fn new(id: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Builds a post from a raw map, defaulting absent fields.
    pub fn from_raw(data: &RawRecord) -> Self {
        Self {
            id: raw_i64(data, "id"),
            title: raw_string(data, "title"),
            body: raw_string(data, "body"),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Converts back to the raw map shape used by the fetch client.
    pub fn to_raw(&self) -> RawRecord {
        let mut data = RawRecord::new();
        data.insert("id".to_string(), JsonValue::from(self.id));
        data.insert("title".to_string(), JsonValue::from(self.title.as_str()));
        data.insert("body".to_string(), JsonValue::from(self.body.as_str()));
        data
    }
}

impl From<&PostEntity> for Post {
    fn from(entity: &PostEntity) -> Self {
        Self::new(entity.id, entity.title.clone(), entity.body.clone())
    }
}

impl From<PostEntity> for Post {
    fn from(entity: PostEntity) -> Self {
        Self {
            id: entity.id,
            title: entity.title,
            body: entity.body,
        }
    }
}

const POST_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "id",
        kind: FieldKind::Integer,
    },
    FieldDef {
        name: "title",
        kind: FieldKind::Text,
    },
    FieldDef {
        name: "body",
        kind: FieldKind::Text,
    },
];

/// Schema of the `Post` entity stored in the `posts` table.
pub const POST_SCHEMA: EntitySchema = EntitySchema {
    name: "Post",
    table: "posts",
    fields: POST_FIELDS,
};

/// Durable post entity owned by one storage scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEntity {
    object_id: ObjectId,
    pub id: i64,
    pub title: String,
    pub body: String,
}

impl PostEntity {
    /// Overwrites all fields from a raw map, defaulting absent fields.
    pub fn fill(&mut self, data: &RawRecord) {
        self.id = raw_i64(data, "id");
        self.title = raw_string(data, "title");
        self.body = raw_string(data, "body");
    }
}

impl Entity for PostEntity {
    const SCHEMA: &'static EntitySchema = &POST_SCHEMA;

    fn new_empty(object_id: ObjectId) -> Self {
        Self {
            object_id,
            id: 0,
            title: String::new(),
            body: String::new(),
        }
    }

    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn values(&self) -> FieldValues {
        vec![
            Value::Integer(self.id),
            Value::Text(self.title.clone()),
            Value::Text(self.body.clone()),
        ]
    }

    fn from_values(object_id: ObjectId, values: &[Value]) -> Result<Self, ValueError> {
        let invalid = |field: &'static str, found: Option<&Value>| ValueError {
            entity: POST_SCHEMA.name,
            field,
            found: found.cloned().unwrap_or(Value::Null),
        };

        // Null columns read back as defaults, matching the optional model attributes.
        let id = match values.first() {
            Some(Value::Integer(value)) => *value,
            Some(Value::Null) => 0,
            other => return Err(invalid("id", other)),
        };
        let title = match values.get(1) {
            Some(Value::Text(value)) => value.clone(),
            Some(Value::Null) => String::new(),
            other => return Err(invalid("title", other)),
        };
        let body = match values.get(2) {
            Some(Value::Text(value)) => value.clone(),
            Some(Value::Null) => String::new(),
            other => return Err(invalid("body", other)),
        };

        Ok(Self {
            object_id,
            id,
            title,
            body,
        })
    }
}

fn raw_i64(data: &RawRecord, key: &str) -> i64 {
    data.get(key).and_then(JsonValue::as_i64).unwrap_or(0)
}

fn raw_string(data: &RawRecord, key: &str) -> String {
    data.get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{Post, PostEntity, RawRecord};
    use crate::model::entity::{Entity, Value};
    use serde_json::json;
    use uuid::Uuid;

    fn raw(value: serde_json::Value) -> RawRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn from_raw_defaults_missing_fields() {
        let post = Post::from_raw(&raw(json!({ "title": "only title" })));
        assert_eq!(post, Post::new(0, "only title", ""));

        let post = Post::from_raw(&raw(json!({ "id": 7 })));
        assert_eq!(post, Post::new(7, "", ""));
    }

    #[test]
    fn from_raw_defaults_mistyped_fields() {
        let post = Post::from_raw(&raw(json!({ "id": "7", "title": 3, "body": null })));
        assert_eq!(post, Post::new(0, "", ""));
    }

    #[test]
    fn entity_fill_and_record_conversion_agree() {
        let data = raw(json!({ "id": 3, "title": "A", "body": "B" }));
        let mut entity = PostEntity::new_empty(Uuid::new_v4());
        entity.fill(&data);
        assert_eq!(Post::from(&entity), Post::from_raw(&data));
        assert_eq!(Post::from_raw(&data).to_raw(), data);
    }

    #[test]
    fn from_values_rejects_wrong_kind() {
        let err = PostEntity::from_values(
            Uuid::new_v4(),
            &[Value::Text("x".into()), Value::Null, Value::Null],
        )
        .unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn serializes_with_plain_field_names() {
        let text = serde_json::to_string(&Post::new(1, "A", "B")).unwrap();
        assert_eq!(text, r#"{"id":1,"title":"A","body":"B"}"#);
    }
}
