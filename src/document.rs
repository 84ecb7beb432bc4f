//! Aggregate document model.
//!
//! One `PlannerDocument` holds every slice of planner state the app syncs:
//! the weekly board, quick tasks per day, logged task time, working hours,
//! year goals, and two legacy shapes kept for old clients. The same struct
//! is used both for the local collect/apply path and as the JSON body
//! exchanged with the remote bin (plus a `_metadata` envelope that never
//! reaches the slices).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Document format version stamped into `_metadata` on every upload.
pub const DOCUMENT_VERSION: u32 = 1;

/// Weekly capacity baseline used when no value has ever been stored.
pub const DEFAULT_WORKING_HOURS: f64 = 40.0;

/// Wire/storage names of the document fields, camelCase like the original
/// web client wrote them. Also used as slice keys by the store.
pub const WEEKLY_IMPORTANT_TASKS: &str = "weeklyImportantTasks";
pub const QUICK_TASKS: &str = "quickTasks";
pub const TASK_TIME_RECORDS: &str = "taskTimeRecords";
pub const TOTAL_WORKING_HOURS: &str = "totalWorkingHours";
pub const YEAR_GOALS: &str = "yearGoals";
pub const WEEKS: &str = "weeks";
pub const IMPORTANT_TASKS: &str = "importantTasks";
pub const TIME_RECORDS: &str = "timeRecords";
pub const SETTINGS: &str = "settings";
pub const METADATA: &str = "_metadata";

/// One of the three fixed slots on the weekly board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeekSlot {
    pub id: String,
    pub text: String,
}

/// A task row in one of the day's time slots (morning/noon/afternoon/evening).
///
/// Slot ids stay plain strings: an unknown slot name coming back from the
/// remote store must not fail ingestion of the whole day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickTask {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub completed: bool,
    /// Planned effort in hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<f64>,
    /// Logged effort in hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<f64>,
    pub delayed: bool,
    /// Id of the OKR key result this task contributes to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub okr: Option<String>,
}

impl QuickTask {
    /// Fresh empty row appended to the end of every list so the UI always
    /// has a "type to add" target.
    pub fn placeholder() -> Self {
        Self {
            id: generate_task_id(),
            ..Self::default()
        }
    }

    /// True when the row carries no user text (placeholder or cleared row).
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A year-level goal shown on the yearly overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YearGoal {
    pub id: String,
    pub title: String,
    pub date: String,
    pub color: String,
}

/// Upload envelope written alongside the document on every push and
/// stripped before the document is merged or applied.
///
/// All fields are optional on read — a bin rewritten by another client (or
/// by hand) may carry a partial or garbled envelope, and that must not stop
/// ingestion of the payload around it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub version: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_keys: Vec<String>,
}

impl DocumentMeta {
    /// Envelope for an upload happening now, on behalf of `user_id`.
    pub fn stamp(user_id: &str, doc: &PlannerDocument) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            last_updated: Some(Utc::now()),
            version: DOCUMENT_VERSION,
            data_keys: doc.present_keys().iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// The full planner state as one JSON object. Every field is independently
/// optional: a partial document applies only the slices it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerDocument {
    /// week-start date (`YYYY-MM-DD`) → the three board slots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_important_tasks: Option<BTreeMap<String, Vec<WeekSlot>>>,
    /// day date → slot id → task rows (last row is always a placeholder).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_tasks: Option<BTreeMap<String, BTreeMap<String, Vec<QuickTask>>>>,
    /// task id → accumulated minutes, logged in discrete increments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_time_records: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_working_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_goals: Option<Vec<YearGoal>>,
    /// Legacy week map from the pre-board data shape. Merged per key,
    /// otherwise carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weeks: Option<BTreeMap<String, Value>>,
    /// Legacy flat task list, entries keyed by their `id` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub important_tasks: Option<Vec<Value>>,
    /// Legacy time-record list, entries keyed by their `id` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_records: Option<Vec<Value>>,
    /// Opaque app settings blob, replaced wholesale on merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl PlannerDocument {
    /// True when no field is present at all.
    pub fn is_empty(&self) -> bool {
        self.present_keys().is_empty()
    }

    /// Wire names of the fields present in this document, in a fixed order.
    pub fn present_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.weekly_important_tasks.is_some() {
            keys.push(WEEKLY_IMPORTANT_TASKS);
        }
        if self.quick_tasks.is_some() {
            keys.push(QUICK_TASKS);
        }
        if self.task_time_records.is_some() {
            keys.push(TASK_TIME_RECORDS);
        }
        if self.total_working_hours.is_some() {
            keys.push(TOTAL_WORKING_HOURS);
        }
        if self.year_goals.is_some() {
            keys.push(YEAR_GOALS);
        }
        if self.weeks.is_some() {
            keys.push(WEEKS);
        }
        if self.important_tasks.is_some() {
            keys.push(IMPORTANT_TASKS);
        }
        if self.time_records.is_some() {
            keys.push(TIME_RECORDS);
        }
        if self.settings.is_some() {
            keys.push(SETTINGS);
        }
        keys
    }

    /// Re-establish the placeholder invariant on every quick-task list:
    /// blank rows are dropped and exactly one fresh placeholder is appended.
    pub fn normalize_quick_tasks(&mut self) {
        if let Some(days) = self.quick_tasks.as_mut() {
            for slots in days.values_mut() {
                for list in slots.values_mut() {
                    normalize_task_list(list);
                }
            }
        }
    }

    /// Decompose a raw remote payload into document + envelope.
    ///
    /// Ingestion is lenient field by field: a field that does not match its
    /// expected shape is dropped (treated as absent) rather than failing the
    /// whole payload — a garbled bin must never break the merge step. The
    /// typed map fields go one step finer: a malformed entry loses only its
    /// own key, not the whole map. A non-object payload yields an empty
    /// document.
    pub fn from_remote_value(value: Value) -> (Self, Option<DocumentMeta>) {
        let mut obj = match value {
            Value::Object(map) => map,
            _ => return (Self::default(), None),
        };

        let meta = obj
            .remove(METADATA)
            .and_then(|v| serde_json::from_value::<DocumentMeta>(v).ok());

        let doc = Self {
            weekly_important_tasks: take_map_field(&mut obj, WEEKLY_IMPORTANT_TASKS),
            quick_tasks: take_map_field(&mut obj, QUICK_TASKS),
            task_time_records: take_map_field(&mut obj, TASK_TIME_RECORDS),
            total_working_hours: take_field(&mut obj, TOTAL_WORKING_HOURS),
            year_goals: take_field(&mut obj, YEAR_GOALS),
            weeks: take_field(&mut obj, WEEKS),
            important_tasks: take_field(&mut obj, IMPORTANT_TASKS),
            time_records: take_field(&mut obj, TIME_RECORDS),
            settings: obj.remove(SETTINGS).filter(Value::is_object),
        };

        (doc, meta)
    }

    /// Compose the JSON body for an upload: the document fields plus the
    /// `_metadata` envelope.
    pub fn to_remote_value(&self, meta: &DocumentMeta) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Value::Object(ref mut map) = value {
            map.insert(
                METADATA.to_string(),
                serde_json::to_value(meta).unwrap_or(Value::Null),
            );
        }
        value
    }
}

/// Drop blank rows and make sure exactly one placeholder closes the list.
/// An already well-formed list passes through unchanged, so writing the
/// same data twice does not churn placeholder ids.
pub fn normalize_task_list(list: &mut Vec<QuickTask>) {
    let trailing = match list.last() {
        Some(last) if last.is_blank() => list.pop(),
        _ => None,
    };
    list.retain(|t| !t.is_blank());
    list.push(trailing.unwrap_or_else(QuickTask::placeholder));
}

/// Id for a new task row: millisecond timestamp plus a short random suffix,
/// matching the ids the original client generated.
pub fn generate_task_id() -> String {
    format!(
        "{}-{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

fn take_field<T: serde::de::DeserializeOwned>(
    obj: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Option<T> {
    match serde_json::from_value::<T>(obj.remove(key)?) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("dropping malformed remote field {key:?}: {err}");
            None
        }
    }
}

/// Like [`take_field`] for the map-shaped fields, but lenient per entry: a
/// key whose value does not parse is dropped on its own instead of taking
/// the whole map down with it.
fn take_map_field<V: serde::de::DeserializeOwned>(
    obj: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Option<BTreeMap<String, V>> {
    let raw: BTreeMap<String, Value> = take_field(obj, key)?;
    let map = raw
        .into_iter()
        .filter_map(|(entry_key, value)| match serde_json::from_value(value) {
            Ok(value) => Some((entry_key, value)),
            Err(err) => {
                debug!("dropping malformed entry {entry_key:?} in remote field {key:?}: {err}");
                None
            }
        })
        .collect();
    Some(map)
}
