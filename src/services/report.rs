//! Time-breakdown reporting.
//!
//! [`build_report`] is pure: it takes tasks, entries and saved queries and buckets
//! minutes per calendar day, per saved query and into an "Other" bucket for entries
//! whose task matched none of the queries. [`ReportService`] loads the inputs.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::db::Store;
use crate::models::saved_query::SavedQuery;
use crate::models::task::{Task, TimeEntry};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Saved query not found: {0}")]
    SavedQueryNotFound(i32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for ReportError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for ReportError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub saved_query_ids: Vec<i32>,
    pub excluded_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTime {
    pub query_id: i32,
    pub name: String,
    pub time: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBreakdown {
    /// `M/D/YYYY`
    pub date: String,
    pub total: i64,
    pub query_times: Vec<QueryTime>,
    pub other_time: i64,
    pub other_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTotal {
    pub query_id: i32,
    pub name: String,
    pub total: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: Vec<DayBreakdown>,
    pub query_totals: Vec<QueryTotal>,
    pub other_total: i64,
    pub other_percentage: f64,
    pub grand_total: i64,
}

/// `start` at 00:00:00 UTC through `end` at 23:59:59.999999999 UTC.
#[must_use]
pub fn report_window(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    (
        start.and_time(NaiveTime::MIN).and_utc(),
        end.and_time(last).and_utc(),
    )
}

#[must_use]
pub fn format_day(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

#[derive(Default)]
struct Bucket {
    time: i64,
    tags: BTreeSet<String>,
}

#[derive(Default)]
struct Day {
    total: i64,
    queries: Vec<Bucket>,
    other: Bucket,
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let ratio = part as f64 / whole as f64;
        ratio * 100.0
    }
}

/// Buckets `entries` by the calendar date of their timestamp in `tz`.
///
/// Entries outside the normalized window, of unknown tasks or of tasks carrying any
/// of `excluded_tags` are ignored. Only days with a positive total are emitted.
pub fn build_report<Tz: TimeZone>(
    request: &ReportRequest,
    queries: &[SavedQuery],
    tasks: &[Task],
    entries: &[TimeEntry],
    tz: &Tz,
) -> Report {
    let (start, end) = report_window(request.start, request.end);

    let tasks: HashMap<i32, &Task> = tasks
        .iter()
        .filter(|t| !t.has_any_tag(&request.excluded_tags))
        .map(|t| (t.id, t))
        .collect();

    let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();

    for entry in entries {
        if entry.created_at < start || entry.created_at > end {
            continue;
        }
        let Some(task) = tasks.get(&entry.task_id) else {
            continue;
        };
        let minutes = i64::from(entry.duration_minutes);
        let date = entry.created_at.with_timezone(tz).date_naive();

        let day = days.entry(date).or_insert_with(|| Day {
            queries: queries.iter().map(|_| Bucket::default()).collect(),
            ..Day::default()
        });
        day.total += minutes;

        let mut matched = false;
        for (query, bucket) in queries.iter().zip(day.queries.iter_mut()) {
            if query.matches(&task.tags) {
                matched = true;
                bucket.time += minutes;
                bucket.tags.extend(
                    task.tags
                        .iter()
                        .filter(|tag| !query.is_filter_tag(tag))
                        .cloned(),
                );
            }
        }
        if !matched {
            day.other.time += minutes;
            day.other.tags.extend(task.tags.iter().cloned());
        }
    }

    let mut query_sums = vec![0_i64; queries.len()];
    let mut other_total = 0;
    let mut grand_total = 0;

    let days: Vec<DayBreakdown> = days
        .into_iter()
        .filter(|(_, day)| day.total > 0)
        .map(|(date, day)| {
            grand_total += day.total;
            other_total += day.other.time;
            let query_times = queries
                .iter()
                .zip(day.queries)
                .zip(query_sums.iter_mut())
                .map(|((query, bucket), sum)| {
                    *sum += bucket.time;
                    QueryTime {
                        query_id: query.id,
                        name: query.name.clone(),
                        time: bucket.time,
                        tags: bucket.tags.into_iter().collect(),
                    }
                })
                .collect();

            DayBreakdown {
                date: format_day(date),
                total: day.total,
                query_times,
                other_time: day.other.time,
                other_tags: day.other.tags.into_iter().collect(),
            }
        })
        .collect();

    let query_totals = queries
        .iter()
        .zip(query_sums)
        .map(|(query, total)| QueryTotal {
            query_id: query.id,
            name: query.name.clone(),
            total,
            percentage: percentage(total, grand_total),
        })
        .collect();

    Report {
        start,
        end,
        days,
        query_totals,
        other_total,
        other_percentage: percentage(other_total, grand_total),
        grand_total,
    }
}

/// Loads report inputs from the store. Days are bucketed in the server's local zone.
#[derive(Clone)]
pub struct ReportService {
    store: Store,
}

impl ReportService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn time_breakdown(&self, request: &ReportRequest) -> Result<Report, ReportError> {
        if request.end < request.start {
            return Err(ReportError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }

        let mut ids: Vec<i32> = Vec::with_capacity(request.saved_query_ids.len());
        for id in &request.saved_query_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        let queries = self.store.saved_queries().get_many(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !queries.iter().any(|q| q.id == **id)) {
            return Err(ReportError::SavedQueryNotFound(*missing));
        }

        let (start, end) = report_window(request.start, request.end);
        let tasks = self.store.tasks().list_all().await?;
        let entries = self.store.time_entries().list_between(start, end).await?;
        debug!(
            tasks = tasks.len(),
            entries = entries.len(),
            queries = queries.len(),
            "Building time breakdown"
        );

        Ok(build_report(request, &queries, &tasks, &entries, &Local))
    }
}
