//! Last-write-wins merge of two aggregate documents.
//!
//! The remote side wins every conflict, at the granularity the original
//! client used: per key for map fields (a whole day of quick tasks is
//! replaced, never combined), per id for legacy lists, wholesale for
//! scalars and for `year_goals`. That makes the merge lossy in known ways —
//! a local year goal disappears when the remote array wins — and the tests
//! below pin that behavior down rather than papering over it. There is no
//! per-entry clock to arbitrate anything finer.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::PlannerDocument;

/// Merge `remote` into `local`, returning the combined document. Both
/// inputs are untouched. A field absent on one side passes through from
/// the other; a field absent on both stays absent.
pub fn merge_documents(local: &PlannerDocument, remote: &PlannerDocument) -> PlannerDocument {
    PlannerDocument {
        weekly_important_tasks: merge_maps(
            &local.weekly_important_tasks,
            &remote.weekly_important_tasks,
        ),
        quick_tasks: merge_maps(&local.quick_tasks, &remote.quick_tasks),
        task_time_records: merge_maps(&local.task_time_records, &remote.task_time_records),
        total_working_hours: remote.total_working_hours.or(local.total_working_hours),
        year_goals: remote.year_goals.clone().or_else(|| local.year_goals.clone()),
        weeks: merge_maps(&local.weeks, &remote.weeks),
        important_tasks: merge_id_lists(&local.important_tasks, &remote.important_tasks),
        time_records: merge_id_lists(&local.time_records, &remote.time_records),
        settings: remote.settings.clone().or_else(|| local.settings.clone()),
    }
}

/// Per-key union, remote entry replacing the local one on a shared key.
/// Values are opaque here: no sub-key merge happens.
fn merge_maps<V: Clone>(
    local: &Option<BTreeMap<String, V>>,
    remote: &Option<BTreeMap<String, V>>,
) -> Option<BTreeMap<String, V>> {
    match (local, remote) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => {
            let mut merged = l.clone();
            for (key, value) in r {
                merged.insert(key.clone(), value.clone());
            }
            Some(merged)
        }
    }
}

/// De-duplicate by each entry's `id` field: local entries load first and
/// keep their order, remote entries overwrite a matching id in place and
/// append otherwise. Entries without a usable id share one slot, exactly
/// like the map the original client built.
fn merge_id_lists(
    local: &Option<Vec<Value>>,
    remote: &Option<Vec<Value>>,
) -> Option<Vec<Value>> {
    match (local, remote) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => {
            let mut merged: Vec<Value> = Vec::with_capacity(l.len() + r.len());
            let mut slots: BTreeMap<String, usize> = BTreeMap::new();
            for entry in l.iter().chain(r.iter()) {
                let key = id_key(entry);
                match slots.get(&key) {
                    Some(&slot) => merged[slot] = entry.clone(),
                    None => {
                        slots.insert(key, merged.len());
                        merged.push(entry.clone());
                    }
                }
            }
            Some(merged)
        }
    }
}

fn id_key(entry: &Value) -> String {
    match entry.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{WeekSlot, YearGoal};
    use serde_json::json;

    fn week_slot(id: &str, text: &str) -> WeekSlot {
        WeekSlot {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    fn goal(id: &str, title: &str) -> YearGoal {
        YearGoal {
            id: id.to_string(),
            title: title.to_string(),
            date: "2025-12-31".to_string(),
            color: "blue".to_string(),
        }
    }

    #[test]
    fn test_disjoint_map_keys_union_commutatively() {
        let mut a = PlannerDocument::default();
        a.weekly_important_tasks = Some(BTreeMap::from([(
            "2025-01-06".to_string(),
            vec![week_slot("w1", "plan sprint")],
        )]));
        let mut b = PlannerDocument::default();
        b.weekly_important_tasks = Some(BTreeMap::from([(
            "2025-01-13".to_string(),
            vec![week_slot("w2", "review goals")],
        )]));

        let ab = merge_documents(&a, &b);
        let ba = merge_documents(&b, &a);

        for merged in [&ab, &ba] {
            let weeks = merged.weekly_important_tasks.as_ref().unwrap();
            assert_eq!(weeks.len(), 2);
            assert!(weeks.contains_key("2025-01-06"));
            assert!(weeks.contains_key("2025-01-13"));
        }
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_overlapping_day_replaced_wholesale_by_remote() {
        let day = "2025-01-07".to_string();
        let local_day = BTreeMap::from([(
            "morning".to_string(),
            vec![crate::document::QuickTask {
                id: "l1".to_string(),
                text: "local edit".to_string(),
                ..Default::default()
            }],
        )]);
        let remote_day = BTreeMap::from([(
            "evening".to_string(),
            vec![crate::document::QuickTask {
                id: "r1".to_string(),
                text: "remote edit".to_string(),
                ..Default::default()
            }],
        )]);

        let mut local = PlannerDocument::default();
        local.quick_tasks = Some(BTreeMap::from([(day.clone(), local_day)]));
        let mut remote = PlannerDocument::default();
        remote.quick_tasks = Some(BTreeMap::from([(day.clone(), remote_day.clone())]));

        let merged = merge_documents(&local, &remote);

        // The whole day comes from remote: the local morning edit is gone.
        assert_eq!(merged.quick_tasks.as_ref().unwrap()[&day], remote_day);
    }

    #[test]
    fn test_scalar_and_array_fields_remote_wins_outright() {
        let mut local = PlannerDocument::default();
        local.total_working_hours = Some(40.0);
        local.year_goals = Some(vec![goal("g1", "Run 5k")]);
        local.settings = Some(json!({"theme": "light"}));

        let mut remote = PlannerDocument::default();
        remote.total_working_hours = Some(45.0);
        remote.year_goals = Some(vec![goal("g2", "Read 12 books")]);
        remote.settings = Some(json!({"theme": "dark"}));

        let merged = merge_documents(&local, &remote);

        assert_eq!(merged.total_working_hours, Some(45.0));
        // g1 is lost: year goals replace as one value, they do not union.
        assert_eq!(merged.year_goals, Some(vec![goal("g2", "Read 12 books")]));
        assert_eq!(merged.settings, Some(json!({"theme": "dark"})));
    }

    #[test]
    fn test_absent_remote_field_keeps_local() {
        let mut local = PlannerDocument::default();
        local.total_working_hours = Some(38.5);
        local.year_goals = Some(vec![goal("g1", "Run 5k")]);

        let merged = merge_documents(&local, &PlannerDocument::default());
        assert_eq!(merged, local);
    }

    #[test]
    fn test_empty_local_takes_remote() {
        let mut remote = PlannerDocument::default();
        remote.task_time_records = Some(BTreeMap::from([("t1".to_string(), 90)]));
        remote.total_working_hours = Some(42.0);

        let merged = merge_documents(&PlannerDocument::default(), &remote);
        assert_eq!(merged, remote);
    }

    #[test]
    fn test_time_record_keys_union_remote_wins() {
        let mut local = PlannerDocument::default();
        local.task_time_records = Some(BTreeMap::from([
            ("t1".to_string(), 30),
            ("t2".to_string(), 60),
        ]));
        let mut remote = PlannerDocument::default();
        remote.task_time_records = Some(BTreeMap::from([
            ("t2".to_string(), 90),
            ("t3".to_string(), 15),
        ]));

        let merged = merge_documents(&local, &remote);
        let records = merged.task_time_records.unwrap();

        assert_eq!(records["t1"], 30);
        assert_eq!(records["t2"], 90);
        assert_eq!(records["t3"], 15);
    }

    #[test]
    fn test_id_list_overwrites_in_place_and_appends() {
        let mut local = PlannerDocument::default();
        local.important_tasks = Some(vec![
            json!({"id": "a", "text": "local a"}),
            json!({"id": "b", "text": "local b"}),
        ]);
        let mut remote = PlannerDocument::default();
        remote.important_tasks = Some(vec![
            json!({"id": "b", "text": "remote b"}),
            json!({"id": "c", "text": "remote c"}),
        ]);

        let merged = merge_documents(&local, &remote);
        let tasks = merged.important_tasks.unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0]["text"], "local a");
        assert_eq!(tasks[1]["text"], "remote b"); // overwritten, position kept
        assert_eq!(tasks[2]["text"], "remote c");
    }

    #[test]
    fn test_id_list_numeric_ids_match_string_forms() {
        let mut local = PlannerDocument::default();
        local.time_records = Some(vec![json!({"id": 7, "minutes": 10})]);
        let mut remote = PlannerDocument::default();
        remote.time_records = Some(vec![json!({"id": 7, "minutes": 25})]);

        let merged = merge_documents(&local, &remote);
        let records = merged.time_records.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["minutes"], 25);
    }

    #[test]
    fn test_both_absent_stays_absent() {
        let merged = merge_documents(&PlannerDocument::default(), &PlannerDocument::default());
        assert!(merged.is_empty());
    }
}
