//! Collect/apply between the slice store and the aggregate document.
//!
//! The aggregate is derived, never stored: `collect` rebuilds it from the
//! slices on every sync cycle, and `apply` decomposes an incoming document
//! back into slice writes. Applying is partial — only fields present in the
//! document touch their slice, everything else keeps its prior value.

use anyhow::Result;

use crate::document::PlannerDocument;
use crate::store::PlannerStore;

/// Assemble the full aggregate from every slice. Array- and map-typed
/// fields come back present-and-empty rather than absent, and the working
/// hours baseline falls back to its default, so the uploaded document
/// always carries the complete picture.
pub fn collect(store: &PlannerStore) -> Result<PlannerDocument> {
    Ok(PlannerDocument {
        weekly_important_tasks: Some(store.weekly_important_tasks()?),
        quick_tasks: Some(store.quick_tasks()?),
        task_time_records: Some(store.task_time_records()?),
        total_working_hours: Some(store.total_working_hours()?),
        year_goals: Some(store.year_goals()?),
        weeks: Some(store.weeks()?),
        important_tasks: Some(store.important_tasks()?),
        time_records: Some(store.time_records()?),
        settings: Some(store.settings()?),
    })
}

/// Write each field present in `doc` to its slice. Also flags the store as
/// pending-unverified: applied state has not been confirmed against the
/// remote until the next successful upload clears it.
pub fn apply(store: &PlannerStore, doc: &PlannerDocument) -> Result<()> {
    if let Some(tasks) = &doc.weekly_important_tasks {
        store.set_weekly_important_tasks(tasks)?;
    }
    if let Some(tasks) = &doc.quick_tasks {
        store.set_quick_tasks(tasks)?;
    }
    if let Some(records) = &doc.task_time_records {
        store.set_task_time_records(records)?;
    }
    if let Some(hours) = doc.total_working_hours {
        store.set_total_working_hours(hours)?;
    }
    if let Some(goals) = &doc.year_goals {
        store.set_year_goals(goals)?;
    }
    if let Some(weeks) = &doc.weeks {
        store.set_weeks(weeks)?;
    }
    if let Some(tasks) = &doc.important_tasks {
        store.set_important_tasks(tasks)?;
    }
    if let Some(records) = &doc.time_records {
        store.set_time_records(records)?;
    }
    if let Some(settings) = &doc.settings {
        store.set_settings(settings)?;
    }
    store.set_pending_unverified(true)?;
    Ok(())
}
