//! # Data Model
//!
//! Core record structures for the synchronization engine. Records carry a
//! typed identity subset (validated at the extraction boundary) plus an open
//! attribute bag for everything else the source sends along.

use crate::keys::ReconciliationKey;
use crate::temporal::{parse_instant, Instant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of the primary unit being tracked (a work item, a project)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a person associated with an entity through an allocation
/// or a usage record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which logical stream a synced table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    /// Planned per-actor (or per-entity) budget records
    Allocation,
    /// Actually-consumed amounts recorded against an actor
    Usage,
    /// Small dimension tables replaced wholesale, no reconciliation logic
    Reference,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Allocation => write!(f, "allocation"),
            StreamKind::Usage => write!(f, "usage"),
            StreamKind::Reference => write!(f, "reference"),
        }
    }
}

/// A typed attribute value retained from the source payload.
///
/// The bag is deliberately not `serde_json::Value`: rows are persisted with
/// bincode, which cannot round-trip self-describing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl AttrValue {
    /// Convert a raw JSON scalar; objects and arrays are not retained.
    pub fn from_json(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Null => Some(Self::Null),
            _ => None,
        }
    }
}

/// The open attribute bag: non-identity payload fields, keyed by source
/// field name. BTreeMap keeps persisted encodings stable across runs.
pub type AttributeBag = BTreeMap<String, AttrValue>;

/// Reason a raw source row was rejected at the extraction boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRejection {
    /// The row has no usable entity id
    MissingEntityId,
    /// The row's event timestamp is absent or unparseable
    BadOccurredAt,
    /// The row is not a JSON object
    NotAnObject,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRejection::MissingEntityId => write!(f, "missing entity id"),
            RowRejection::BadOccurredAt => write!(f, "missing or unparseable occurred_at"),
            RowRejection::NotAnObject => write!(f, "row is not an object"),
        }
    }
}

/// One row as read from the source system for a given extraction window.
///
/// The source does not reliably supply an extraction timestamp, so
/// `extracted_at` is stamped by the extractor when the page is pulled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub entity_id: EntityId,
    pub actor_id: Option<ActorId>,
    /// Category of work the amount applies to (part of allocation identity)
    pub category: Option<String>,
    /// Role under which the amount was allocated (part of allocation identity)
    pub role: Option<String>,
    /// Source-assigned unique id, supplied for usage events
    pub source_uid: Option<String>,
    /// Additive payload, held in whole minutes
    pub minutes: Option<i64>,
    /// When the record's underlying event occurred (source event time)
    pub occurred_at: Instant,
    /// When this row was pulled, stamped by the extractor
    pub extracted_at: Instant,
    pub attributes: AttributeBag,
}

/// Source field names recognized by the row parser
const FIELD_ENTITY_ID: &str = "entity_id";
const FIELD_ACTOR_ID: &str = "actor_id";
const FIELD_CATEGORY: &str = "category";
const FIELD_ROLE: &str = "role";
const FIELD_SOURCE_UID: &str = "uid";
const FIELD_MINUTES: &str = "minutes";
const FIELD_OCCURRED_AT: &str = "occurred_at";

impl SourceRecord {
    pub fn new(entity_id: EntityId, occurred_at: Instant, extracted_at: Instant) -> Self {
        Self {
            entity_id,
            actor_id: None,
            category: None,
            role: None,
            source_uid: None,
            minutes: None,
            occurred_at,
            extracted_at,
            attributes: AttributeBag::new(),
        }
    }

    pub fn with_actor(mut self, actor_id: ActorId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_source_uid(mut self, uid: impl Into<String>) -> Self {
        self.source_uid = Some(uid.into());
        self
    }

    pub fn with_minutes(mut self, minutes: i64) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Parse and validate one raw source row.
    ///
    /// The identity subset is pulled out into typed fields; every other
    /// scalar lands in the attribute bag. Rows without an entity id or a
    /// parseable event time are rejected, not repaired.
    pub fn from_raw(
        raw: &serde_json::Value,
        extracted_at: Instant,
    ) -> Result<Self, RowRejection> {
        let object = raw.as_object().ok_or(RowRejection::NotAnObject)?;

        let entity_id = object
            .get(FIELD_ENTITY_ID)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| EntityId(s.to_string()))
            .ok_or(RowRejection::MissingEntityId)?;

        let occurred_at = object
            .get(FIELD_OCCURRED_AT)
            .and_then(parse_instant)
            .ok_or(RowRejection::BadOccurredAt)?;

        let mut record = Self::new(entity_id, occurred_at, extracted_at);

        if let Some(actor) = object.get(FIELD_ACTOR_ID).and_then(|v| v.as_str()) {
            if !actor.is_empty() {
                record.actor_id = Some(ActorId(actor.to_string()));
            }
        }
        record.category = object
            .get(FIELD_CATEGORY)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        record.role = object
            .get(FIELD_ROLE)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        record.source_uid = object
            .get(FIELD_SOURCE_UID)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        record.minutes = object.get(FIELD_MINUTES).and_then(|v| v.as_i64());

        for (name, value) in object {
            match name.as_str() {
                FIELD_ENTITY_ID | FIELD_ACTOR_ID | FIELD_CATEGORY | FIELD_ROLE
                | FIELD_SOURCE_UID | FIELD_MINUTES | FIELD_OCCURRED_AT => {}
                _ => {
                    if let Some(attr) = AttrValue::from_json(value) {
                        record.attributes.insert(name.clone(), attr);
                    }
                }
            }
        }

        Ok(record)
    }
}

/// The persisted row in the target store: one row per ReconciliationKey
/// after the merger's idempotent upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub key: ReconciliationKey,
    pub entity_id: EntityId,
    pub actor_id: Option<ActorId>,
    pub category: Option<String>,
    pub role: Option<String>,
    /// Additive payload in whole minutes; zero when the source sent none
    pub minutes: i64,
    pub occurred_at: Instant,
    pub extracted_at: Instant,
    pub attributes: AttributeBag,
}

impl TargetRecord {
    /// Logical equality, ignoring when the rows were extracted.
    ///
    /// A re-extraction of an unchanged record carries a fresh
    /// `extracted_at`; treating it as a change would rewrite every row on
    /// every run.
    pub fn same_content(&self, other: &TargetRecord) -> bool {
        self.key == other.key
            && self.entity_id == other.entity_id
            && self.actor_id == other.actor_id
            && self.category == other.category
            && self.role == other.role
            && self.minutes == other.minutes
            && self.occurred_at == other.occurred_at
            && self.attributes == other.attributes
    }

    pub fn from_source(record: SourceRecord, key: ReconciliationKey) -> Self {
        Self {
            key,
            entity_id: record.entity_id,
            actor_id: record.actor_id,
            category: record.category,
            role: record.role,
            minutes: record.minutes.unwrap_or(0),
            occurred_at: record.occurred_at,
            extracted_at: record.extracted_at,
            attributes: record.attributes,
        }
    }
}
