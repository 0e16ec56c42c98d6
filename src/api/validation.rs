use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::ApiError;
use super::types::{FieldError, TaskListQuery};
use crate::domain::{Permission, Priority, SortOrder, TaskStatus};
use crate::models::task::{TaskFilter, TaskSortField, normalize_tags};

pub const MAX_LIMIT: u64 = 1000;

pub fn validate_id(field: &str, id: i32) -> Result<i32, ApiError> {
    if id <= 0 {
        return Err(ApiError::validation(
            field,
            format!("invalid ID {id}, must be a positive integer"),
        ));
    }
    Ok(id)
}

pub fn validate_required<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(field, "is required"));
    }
    Ok(trimmed)
}

pub fn validate_search_query(query: &str) -> Result<&str, ApiError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("q", "search query cannot be empty"));
    }
    Ok(trimmed)
}

pub fn parse_status(value: &str) -> Result<TaskStatus, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation("status", format!("unknown status {value:?}")))
}

pub fn parse_priority(value: &str) -> Result<Priority, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation("priority", format!("unknown priority {value:?}")))
}

/// `YYYY-MM-DD`.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(field, "expected a date in YYYY-MM-DD format"))
}

/// Noon UTC on `date`, so the entry stays on that calendar day in most zones.
#[must_use]
pub fn date_at_noon(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default())
        .and_utc()
}

/// Splits a comma-separated list, dropping blanks.
#[must_use]
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| normalize_tags(v.split(',')))
        .unwrap_or_default()
}

pub fn parse_id_list(field: &str, value: Option<&str>) -> Result<Vec<i32>, ApiError> {
    split_list(value)
        .iter()
        .map(|raw| {
            raw.parse::<i32>()
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| ApiError::validation(field, format!("invalid ID {raw:?}")))
        })
        .collect()
}

pub fn parse_permissions(values: &[String]) -> Result<Vec<Permission>, ApiError> {
    let mut details = Vec::new();
    let mut permissions = Vec::new();
    for value in values {
        match value.parse::<Permission>() {
            Ok(p) if !permissions.contains(&p) => permissions.push(p),
            Ok(_) => {}
            Err(_) => details.push(FieldError::new(
                "permissions",
                format!("unknown permission {value:?}"),
            )),
        }
    }
    if details.is_empty() {
        Ok(permissions)
    } else {
        Err(ApiError::invalid_fields(details))
    }
}

/// Turns list query parameters into a filter, reporting every bad field at once.
pub fn task_filter(query: &TaskListQuery) -> Result<TaskFilter, ApiError> {
    let mut details = Vec::new();
    let mut filter = TaskFilter {
        tags: split_list(query.tags.as_deref()),
        search: query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        ..TaskFilter::default()
    };

    if let Some(status) = non_empty(query.status.as_deref()) {
        match status.parse() {
            Ok(s) => filter.status = Some(s),
            Err(_) => details.push(FieldError::new("status", format!("unknown status {status:?}"))),
        }
    }
    if let Some(priority) = non_empty(query.priority.as_deref()) {
        match priority.parse() {
            Ok(p) => filter.priority = Some(p),
            Err(_) => details.push(FieldError::new(
                "priority",
                format!("unknown priority {priority:?}"),
            )),
        }
    }
    if let Some(limit) = non_empty(query.limit.as_deref()) {
        match limit.parse::<u64>() {
            Ok(n) if (1..=MAX_LIMIT).contains(&n) => filter.limit = Some(n),
            _ => details.push(FieldError::new(
                "limit",
                format!("must be between 1 and {MAX_LIMIT}"),
            )),
        }
    }
    if let Some(offset) = non_empty(query.offset.as_deref()) {
        match offset.parse::<u64>() {
            Ok(n) => filter.offset = Some(n),
            Err(_) => details.push(FieldError::new("offset", "must be a non-negative integer")),
        }
    }
    if let Some(sort) = non_empty(query.sort.as_deref()) {
        match sort.parse::<TaskSortField>() {
            Ok(s) => filter.sort = s,
            Err(_) => details.push(FieldError::new("sort", format!("unknown sort field {sort:?}"))),
        }
    }
    if let Some(order) = non_empty(query.order.as_deref()) {
        match order.parse::<SortOrder>() {
            Ok(o) => filter.order = o,
            Err(_) => details.push(FieldError::new("order", "must be asc or desc")),
        }
    }

    if details.is_empty() {
        Ok(filter)
    } else {
        Err(ApiError::invalid_fields(details))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
