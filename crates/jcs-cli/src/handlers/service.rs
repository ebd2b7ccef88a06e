//! Service-level handlers (ListBuckets)

use crate::{ApiError, AppState};
use crate::xml;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use jcs_core::User;

/// GET / - List the caller's buckets.
///
/// Answered from the metadata store rather than the primary backend, which
/// holds every tenant's buckets.
pub async fn list_buckets(state: &AppState, user: &User) -> Result<Response, ApiError> {
    let buckets = state.metadata.get_user_buckets(&user.username).await?;
    let body = xml::list_all_my_buckets(&user.username, &buckets)
        .map_err(|e| ApiError::Internal(format!("failed to render bucket list: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response())
}
