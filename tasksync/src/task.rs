//! The `task_table` entity and its remote wire representation.
//!
//! A [`Model`] row is the unit of synchronization. Its `sync_status` and
//! `deleted` columns are local bookkeeping and never leave the device; every
//! other column maps onto one key of the flat field map sent to the remote
//! document store (see [`Model::to_fields`]).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::remote::Fields;
use crate::sync_state::{SyncStatus, next_updated_at, now_millis};

/// Keys of the wire field map.
pub const WIRE_FIELDS: [&str; 17] = [
    "id",
    "title",
    "isDone",
    "firstName",
    "middleName",
    "lastName",
    "town",
    "shortName",
    "isAlive",
    "childNumber",
    "comment",
    "imageUri",
    "createdAt",
    "createdBy",
    "updatedAt",
    "parentID",
    "spouseID",
];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task_table")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    pub is_done: bool,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub town: Option<String>,
    pub short_name: Option<String>,
    pub is_alive: bool,
    pub child_number: Option<i32>,
    pub comment: Option<String>,
    /// Local URI until uploaded, then the permanent download URL.
    pub image_ref: Option<String>,
    pub sync_status: SyncStatus,
    pub deleted: bool,
    pub created_at: i64,
    pub created_by: Option<String>,
    pub updated_at: i64,
    pub parent_ref: Option<String>,
    pub spouse_ref: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Whether an image reference already points at permanent remote storage.
pub fn is_remote_image(reference: &str) -> bool {
    ["http://", "https://", "gs://"]
        .iter()
        .any(|scheme| reference.starts_with(scheme))
}

impl Model {
    /// A fresh, never-pushed task with a client-generated id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            is_done: false,
            first_name: None,
            middle_name: None,
            last_name: None,
            town: None,
            short_name: None,
            is_alive: true,
            child_number: Some(1),
            comment: None,
            image_ref: None,
            sync_status: SyncStatus::NotSynced,
            deleted: false,
            created_at: now,
            created_by: None,
            updated_at: now,
            parent_ref: None,
            spouse_ref: None,
        }
    }

    /// Same as [`Model::new`] with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(title)
        }
    }

    /// Record a local mutation: re-stamp `updated_at` and make the row dirty.
    pub fn touch(&mut self) {
        self.touch_at(now_millis());
    }

    pub fn touch_at(&mut self, now: i64) {
        self.updated_at = next_updated_at(self.updated_at, now);
        self.sync_status = self.sync_status.after_local_mutation();
    }

    /// Mark for deletion. The row stays until the remote delete is confirmed.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
    }

    /// The image reference that still has to be uploaded, if any.
    pub fn pending_local_image(&self) -> Option<&str> {
        self.image_ref
            .as_deref()
            .filter(|r| !r.is_empty() && !is_remote_image(r))
    }

    /// Derived display name: initials of first and middle name plus the last
    /// name, falling back to the title when no name parts are known.
    pub fn derive_short_name(&self) -> String {
        let initial = |part: &Option<String>| {
            part.as_deref()
                .and_then(|p| p.trim().chars().next())
                .map(|c| format!("{}.", c.to_uppercase()))
        };
        let mut parts: Vec<String> = [initial(&self.first_name), initial(&self.middle_name)]
            .into_iter()
            .flatten()
            .collect();
        if let Some(last) = self.last_name.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            parts.push(last.to_owned());
        }
        if parts.is_empty() {
            self.title.clone()
        } else {
            parts.join(" ")
        }
    }

    /// The flat field map sent to the remote document store.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("id".into(), Value::from(self.id.clone()));
        fields.insert("title".into(), Value::from(self.title.clone()));
        fields.insert("isDone".into(), Value::from(self.is_done));
        fields.insert("firstName".into(), Value::from(self.first_name.clone()));
        fields.insert("middleName".into(), Value::from(self.middle_name.clone()));
        fields.insert("lastName".into(), Value::from(self.last_name.clone()));
        fields.insert("town".into(), Value::from(self.town.clone()));
        fields.insert("shortName".into(), Value::from(self.short_name.clone()));
        fields.insert("isAlive".into(), Value::from(self.is_alive));
        fields.insert("childNumber".into(), Value::from(self.child_number));
        fields.insert("comment".into(), Value::from(self.comment.clone()));
        fields.insert("imageUri".into(), Value::from(self.image_ref.clone()));
        fields.insert("createdAt".into(), Value::from(self.created_at));
        fields.insert("createdBy".into(), Value::from(self.created_by.clone()));
        fields.insert("updatedAt".into(), Value::from(self.updated_at));
        fields.insert("parentID".into(), Value::from(self.parent_ref.clone()));
        fields.insert("spouseID".into(), Value::from(self.spouse_ref.clone()));
        fields
    }

    /// Decode a remote document into a local row marked `Synced`.
    ///
    /// `id` and `title` are required; every other field falls back to the
    /// default a freshly created task would carry.
    pub fn from_fields(doc_id: &str, fields: &Fields) -> Result<Self, SyncError> {
        let invalid = |message: String| SyncError::InvalidDocument {
            id: doc_id.to_owned(),
            message,
        };
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_owned);
        let flag = |key: &str, default: bool| {
            fields.get(key).and_then(Value::as_bool).unwrap_or(default)
        };
        let millis = |key: &str| fields.get(key).and_then(Value::as_i64).unwrap_or(0);

        let id = text("id").unwrap_or_else(|| doc_id.to_owned());
        if id != doc_id {
            return Err(invalid(format!("field id {id} does not match document id")));
        }
        let title = text("title").ok_or_else(|| invalid("missing title".into()))?;
        let child_number = match fields.get("childNumber") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| invalid(format!("childNumber is not an integer: {v}")))?,
            ),
        };
        let created_at = millis("createdAt");

        Ok(Self {
            id,
            title,
            is_done: flag("isDone", false),
            first_name: text("firstName"),
            middle_name: text("middleName"),
            last_name: text("lastName"),
            town: text("town"),
            short_name: text("shortName"),
            is_alive: flag("isAlive", true),
            child_number,
            comment: text("comment"),
            image_ref: text("imageUri"),
            sync_status: SyncStatus::Synced,
            deleted: false,
            created_at,
            created_by: text("createdBy"),
            updated_at: fields
                .get("updatedAt")
                .and_then(Value::as_i64)
                .unwrap_or(created_at),
            parent_ref: text("parentID"),
            spouse_ref: text("spouseID"),
        })
    }
}
