use axum::{
    Extension, Json,
    extract::{Query, State},
};
use std::sync::Arc;

use super::auth::require_permission;
use super::types::{FieldError, TimeBreakdownQuery};
use super::validation::{parse_date, parse_id_list, split_list};
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::services::{Report, ReportRequest};

fn report_request(query: &TimeBreakdownQuery) -> Result<ReportRequest, ApiError> {
    let mut details = Vec::new();

    let mut date = |field: &str, value: Option<&str>| match value.map(str::trim) {
        Some(v) if !v.is_empty() => match parse_date(field, v) {
            Ok(d) => Some(d),
            Err(_) => {
                details.push(FieldError::new(field, "expected a date in YYYY-MM-DD format"));
                None
            }
        },
        _ => {
            details.push(FieldError::new(field, "is required"));
            None
        }
    };
    let start = date("start_date", query.start_date.as_deref());
    let end = date("end_date", query.end_date.as_deref());

    let saved_query_ids = match parse_id_list("saved_query_ids", query.saved_query_ids.as_deref()) {
        Ok(ids) => ids,
        Err(_) => {
            details.push(FieldError::new(
                "saved_query_ids",
                "expected a comma-separated list of positive IDs",
            ));
            Vec::new()
        }
    };

    match (start, end) {
        (Some(start), Some(end)) if details.is_empty() => Ok(ReportRequest {
            start,
            end,
            saved_query_ids,
            excluded_tags: split_list(query.excluded_tags.as_deref()),
        }),
        _ => Err(ApiError::invalid_fields(details)),
    }
}

/// GET /reports/time-breakdown
/// Minutes per day, per saved query and "Other" over an inclusive date range.
pub async fn time_breakdown(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<TimeBreakdownQuery>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    require_permission(&ctx, Permission::TimeRead)?;
    let request = report_request(&query)?;
    let report = state.reports.time_breakdown(&request).await?;

    tracing::debug!(
        user_id = ctx.user.id,
        days = report.days.len(),
        grand_total = report.grand_total,
        "Time breakdown generated"
    );

    Ok(Json(ApiResponse::success(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn query(start: Option<&str>, end: Option<&str>, ids: Option<&str>) -> TimeBreakdownQuery {
        TimeBreakdownQuery {
            start_date: start.map(str::to_string),
            end_date: end.map(str::to_string),
            saved_query_ids: ids.map(str::to_string),
            excluded_tags: Some("archived, internal".to_string()),
        }
    }

    #[test]
    fn parses_a_complete_query() {
        let request = report_request(&query(Some("2024-01-15"), Some("2024-01-16"), Some("2,1")))
            .expect("valid request");
        assert_eq!(request.start, NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"));
        assert_eq!(request.end, NaiveDate::from_ymd_opt(2024, 1, 16).expect("date"));
        assert_eq!(request.saved_query_ids, vec![2, 1]);
        assert_eq!(
            request.excluded_tags,
            vec!["archived".to_string(), "internal".to_string()]
        );
    }

    #[test]
    fn reports_every_bad_parameter() {
        match report_request(&query(None, Some("16/01/2024"), Some("x"))) {
            Err(ApiError::Validation { details, .. }) => {
                let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
                assert_eq!(fields, vec!["start_date", "end_date", "saved_query_ids"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
