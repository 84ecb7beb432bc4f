//! Local planner store.
//!
//! Every slice of planner state lives under its own key in a single redb
//! database, serialized as JSON bytes — the same named-slice layout the
//! original web client kept in browser local storage. Reads are
//! self-healing: a slice that fails to parse is reset to its default and
//! re-persisted instead of erroring, so one corrupt entry can never wedge
//! the app.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::document::{
    QuickTask, WeekSlot, YearGoal, DEFAULT_WORKING_HOURS, IMPORTANT_TASKS, QUICK_TASKS, SETTINGS,
    TASK_TIME_RECORDS, TIME_RECORDS, TOTAL_WORKING_HOURS, WEEKLY_IMPORTANT_TASKS, WEEKS,
    YEAR_GOALS,
};

/// Planner slices, JSON bytes keyed by the slice's wire name.
const SLICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("slices");

/// Small sync-bookkeeping strings (remote pointer, identity, last-seen).
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_DOCUMENT_ID: &str = "remote_document_id";
const META_LAST_SEEN: &str = "remote_last_seen";
const META_IDENTITY: &str = "identity";
const META_PENDING: &str = "pending_unverified";

static TEMP_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct PlannerStore {
    db: Database,
}

impl PlannerStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("failed to open planner store at {}", path.display()))?;

        // Create the tables up front so reads never fail on a fresh file.
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(SLICES_TABLE)?;
            let _ = txn.open_table(META_TABLE)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    /// Open the store in the platform data directory.
    pub fn open_default() -> Result<Self> {
        let dir = default_data_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Self::open(&dir.join("planner.redb"))
    }

    /// Throwaway store under a unique temp path, for tests and dry runs.
    pub fn open_temp() -> Result<Self> {
        let id = TEMP_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "cadence-store-{}-{}.redb",
            std::process::id(),
            id
        ));
        Self::open(&path)
    }

    // Slice accessors. Each slice is independent; writing one never touches
    // the others.

    pub fn weekly_important_tasks(&self) -> Result<BTreeMap<String, Vec<WeekSlot>>> {
        self.get_slice(WEEKLY_IMPORTANT_TASKS, BTreeMap::new)
    }

    pub fn set_weekly_important_tasks(
        &self,
        tasks: &BTreeMap<String, Vec<WeekSlot>>,
    ) -> Result<()> {
        self.put_slice(WEEKLY_IMPORTANT_TASKS, tasks)
    }

    pub fn quick_tasks(&self) -> Result<BTreeMap<String, BTreeMap<String, Vec<QuickTask>>>> {
        self.get_slice(QUICK_TASKS, BTreeMap::new)
    }

    /// Persist quick tasks, re-establishing the trailing-placeholder
    /// invariant on every list first.
    pub fn set_quick_tasks(
        &self,
        tasks: &BTreeMap<String, BTreeMap<String, Vec<QuickTask>>>,
    ) -> Result<()> {
        let mut normalized = tasks.clone();
        for slots in normalized.values_mut() {
            for list in slots.values_mut() {
                crate::document::normalize_task_list(list);
            }
        }
        self.put_slice(QUICK_TASKS, &normalized)
    }

    pub fn task_time_records(&self) -> Result<BTreeMap<String, u64>> {
        self.get_slice(TASK_TIME_RECORDS, BTreeMap::new)
    }

    pub fn set_task_time_records(&self, records: &BTreeMap<String, u64>) -> Result<()> {
        self.put_slice(TASK_TIME_RECORDS, records)
    }

    /// Add logged minutes to a task's running total and return the new total.
    pub fn add_time_record(&self, task_id: &str, minutes: u64) -> Result<u64> {
        let mut records = self.task_time_records()?;
        let total = records.entry(task_id.to_string()).or_insert(0);
        *total += minutes;
        let total = *total;
        self.set_task_time_records(&records)?;
        Ok(total)
    }

    pub fn total_working_hours(&self) -> Result<f64> {
        self.get_slice(TOTAL_WORKING_HOURS, || DEFAULT_WORKING_HOURS)
    }

    pub fn set_total_working_hours(&self, hours: f64) -> Result<()> {
        self.put_slice(TOTAL_WORKING_HOURS, &hours)
    }

    pub fn year_goals(&self) -> Result<Vec<YearGoal>> {
        self.get_slice(YEAR_GOALS, Vec::new)
    }

    pub fn set_year_goals(&self, goals: &[YearGoal]) -> Result<()> {
        self.put_slice(YEAR_GOALS, goals)
    }

    pub fn weeks(&self) -> Result<BTreeMap<String, Value>> {
        self.get_slice(WEEKS, BTreeMap::new)
    }

    pub fn set_weeks(&self, weeks: &BTreeMap<String, Value>) -> Result<()> {
        self.put_slice(WEEKS, weeks)
    }

    pub fn important_tasks(&self) -> Result<Vec<Value>> {
        self.get_slice(IMPORTANT_TASKS, Vec::new)
    }

    pub fn set_important_tasks(&self, tasks: &[Value]) -> Result<()> {
        self.put_slice(IMPORTANT_TASKS, tasks)
    }

    pub fn time_records(&self) -> Result<Vec<Value>> {
        self.get_slice(TIME_RECORDS, Vec::new)
    }

    pub fn set_time_records(&self, records: &[Value]) -> Result<()> {
        self.put_slice(TIME_RECORDS, records)
    }

    pub fn settings(&self) -> Result<Value> {
        self.get_slice(SETTINGS, || Value::Object(Default::default()))
    }

    pub fn set_settings(&self, settings: &Value) -> Result<()> {
        self.put_slice(SETTINGS, settings)
    }

    // Sync bookkeeping.

    /// Cached id of this user's document on the remote store.
    pub fn remote_document_id(&self) -> Result<Option<String>> {
        self.get_meta(META_DOCUMENT_ID)
    }

    pub fn set_remote_document_id(&self, id: Option<&str>) -> Result<()> {
        self.set_meta(META_DOCUMENT_ID, id)
    }

    /// Timestamp of the newest remote state this device has already
    /// ingested (or produced). Polls at or below this mark are no-ops.
    pub fn last_seen_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get_meta(META_LAST_SEEN)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(err) => {
                warn!("ignoring unparseable last-seen timestamp {raw:?}: {err}");
                Ok(None)
            }
        }
    }

    pub fn set_last_seen_updated(&self, ts: Option<DateTime<Utc>>) -> Result<()> {
        match ts {
            Some(ts) => self.set_meta(META_LAST_SEEN, Some(&ts.to_rfc3339())),
            None => self.set_meta(META_LAST_SEEN, None),
        }
    }

    /// Identity hash the store was last used with.
    pub fn identity(&self) -> Result<Option<String>> {
        self.get_meta(META_IDENTITY)
    }

    pub fn set_identity(&self, identity: &str) -> Result<()> {
        self.set_meta(META_IDENTITY, Some(identity))
    }

    /// True while local state carries changes not yet confirmed by a
    /// successful upload.
    pub fn pending_unverified(&self) -> Result<bool> {
        Ok(self.get_meta(META_PENDING)?.is_some())
    }

    pub fn set_pending_unverified(&self, pending: bool) -> Result<()> {
        self.set_meta(META_PENDING, pending.then_some("1"))
    }

    /// Drop everything: all slices and all sync bookkeeping.
    pub fn wipe(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(SLICES_TABLE)?;
        txn.delete_table(META_TABLE)?;
        {
            let _ = txn.open_table(SLICES_TABLE)?;
            let _ = txn.open_table(META_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get_slice<T, D>(&self, key: &str, default: D) -> Result<T>
    where
        T: DeserializeOwned + Serialize,
        D: FnOnce() -> T,
    {
        let raw = {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SLICES_TABLE)?;
            table.get(key)?.map(|v| v.value().to_vec())
        };

        let Some(raw) = raw else {
            return Ok(default());
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!("resetting corrupt slice {key:?}: {err}");
                let fresh = default();
                self.put_slice(key, &fresh)?;
                Ok(fresh)
            }
        }
    }

    fn put_slice<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).with_context(|| format!("failed to encode slice {key:?}"))?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SLICES_TABLE)?;
            table.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn set_meta(&self, key: &str, value: Option<&str>) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(META_TABLE)?;
            match value {
                Some(value) => {
                    table.insert(key, value)?;
                }
                None => {
                    table.remove(key)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("could not determine platform data directory")?
        .join("cadence"))
}

#[cfg(test)]
mod tests {
    use super::*;

    impl PlannerStore {
        /// Write raw bytes under a slice key, bypassing serialization.
        fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<()> {
            let txn = self.db.begin_write()?;
            {
                let mut table = txn.open_table(SLICES_TABLE)?;
                table.insert(key, bytes)?;
            }
            txn.commit()?;
            Ok(())
        }

        fn raw_slice(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SLICES_TABLE)?;
            Ok(table.get(key)?.map(|v| v.value().to_vec()))
        }
    }

    #[test]
    fn test_missing_slices_return_defaults() {
        let store = PlannerStore::open_temp().unwrap();

        assert!(store.weekly_important_tasks().unwrap().is_empty());
        assert!(store.quick_tasks().unwrap().is_empty());
        assert!(store.task_time_records().unwrap().is_empty());
        assert_eq!(store.total_working_hours().unwrap(), DEFAULT_WORKING_HOURS);
        assert!(store.year_goals().unwrap().is_empty());
        assert_eq!(store.settings().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_slice_roundtrip() {
        let store = PlannerStore::open_temp().unwrap();

        store.set_total_working_hours(45.0).unwrap();
        assert_eq!(store.total_working_hours().unwrap(), 45.0);

        let goals = vec![YearGoal {
            id: "g1".to_string(),
            title: "Ship the rewrite".to_string(),
            date: "2025-09-01".to_string(),
            color: "green".to_string(),
        }];
        store.set_year_goals(&goals).unwrap();
        assert_eq!(store.year_goals().unwrap(), goals);

        let mut weeks = BTreeMap::new();
        weeks.insert("2025-01-06".to_string(), serde_json::json!({"theme": "focus"}));
        store.set_weeks(&weeks).unwrap();
        assert_eq!(store.weeks().unwrap(), weeks);
    }

    #[test]
    fn test_corrupt_slice_heals_to_default() {
        let store = PlannerStore::open_temp().unwrap();

        store.put_raw(YEAR_GOALS, b"{not json").unwrap();
        assert!(store.year_goals().unwrap().is_empty());

        // The default was re-persisted, not just returned.
        let raw = store.raw_slice(YEAR_GOALS).unwrap().unwrap();
        assert_eq!(raw, b"[]");
    }

    #[test]
    fn test_wrong_shape_slice_heals_to_default() {
        let store = PlannerStore::open_temp().unwrap();

        // Valid JSON, wrong shape: an object where an array belongs.
        store.put_raw(YEAR_GOALS, b"{}").unwrap();
        assert!(store.year_goals().unwrap().is_empty());
        assert_eq!(store.raw_slice(YEAR_GOALS).unwrap().unwrap(), b"[]");

        store.put_raw(TOTAL_WORKING_HOURS, b"\"forty\"").unwrap();
        assert_eq!(store.total_working_hours().unwrap(), DEFAULT_WORKING_HOURS);
    }

    #[test]
    fn test_corrupt_slice_leaves_other_slices_alone() {
        let store = PlannerStore::open_temp().unwrap();

        store.set_total_working_hours(50.0).unwrap();
        store.put_raw(QUICK_TASKS, b"\xff\xfe").unwrap();

        assert!(store.quick_tasks().unwrap().is_empty());
        assert_eq!(store.total_working_hours().unwrap(), 50.0);
    }

    #[test]
    fn test_add_time_record_accumulates() {
        let store = PlannerStore::open_temp().unwrap();

        assert_eq!(store.add_time_record("t1", 30).unwrap(), 30);
        assert_eq!(store.add_time_record("t1", 30).unwrap(), 60);
        assert_eq!(store.add_time_record("t2", 15).unwrap(), 15);

        let records = store.task_time_records().unwrap();
        assert_eq!(records.get("t1"), Some(&60));
        assert_eq!(records.get("t2"), Some(&15));
    }

    #[test]
    fn test_set_quick_tasks_enforces_placeholder() {
        let store = PlannerStore::open_temp().unwrap();

        let mut slots = BTreeMap::new();
        slots.insert(
            "morning".to_string(),
            vec![
                QuickTask {
                    id: "a".to_string(),
                    text: "standup".to_string(),
                    ..Default::default()
                },
                QuickTask {
                    id: "b".to_string(),
                    text: "  ".to_string(),
                    ..Default::default()
                },
            ],
        );
        let mut days = BTreeMap::new();
        days.insert("2025-01-06".to_string(), slots);

        store.set_quick_tasks(&days).unwrap();

        let stored = store.quick_tasks().unwrap();
        let list = &stored["2025-01-06"]["morning"];
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].text, "standup");
        assert!(list[1].is_blank());
    }

    #[test]
    fn test_meta_roundtrip_and_clear() {
        let store = PlannerStore::open_temp().unwrap();

        assert!(store.remote_document_id().unwrap().is_none());
        store.set_remote_document_id(Some("bin-123")).unwrap();
        assert_eq!(store.remote_document_id().unwrap().as_deref(), Some("bin-123"));
        store.set_remote_document_id(None).unwrap();
        assert!(store.remote_document_id().unwrap().is_none());

        let ts = Utc::now();
        store.set_last_seen_updated(Some(ts)).unwrap();
        assert_eq!(store.last_seen_updated().unwrap(), Some(ts));

        store.set_identity("u-deadbeef").unwrap();
        assert_eq!(store.identity().unwrap().as_deref(), Some("u-deadbeef"));
    }

    #[test]
    fn test_wipe_clears_everything() {
        let store = PlannerStore::open_temp().unwrap();

        store.set_total_working_hours(45.0).unwrap();
        store.set_remote_document_id(Some("bin-123")).unwrap();
        store.set_identity("u-cafe").unwrap();

        store.wipe().unwrap();

        assert_eq!(store.total_working_hours().unwrap(), DEFAULT_WORKING_HOURS);
        assert!(store.remote_document_id().unwrap().is_none());
        assert!(store.identity().unwrap().is_none());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let id = TEMP_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "cadence-store-reopen-{}-{}.redb",
            std::process::id(),
            id
        ));

        {
            let store = PlannerStore::open(&path).unwrap();
            store.set_total_working_hours(37.5).unwrap();
        }

        let store = PlannerStore::open(&path).unwrap();
        assert_eq!(store.total_working_hours().unwrap(), 37.5);
    }
}
