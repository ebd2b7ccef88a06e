//! Request orchestration
//!
//! Every request goes through the same pipeline: classify, authenticate,
//! authorize against bucket ownership (of the copy source too), forward to
//! the primary backend, and for object reads and writes, synchronize with
//! the bucket's clouds.

use crate::auth::MetadataSecrets;
use crate::classify::{RequestKind, S3Request, SyncAction};
use crate::handlers::service;
use crate::middleware::RequestId;
use crate::{xml, ApiError, AppState, S3ErrorCode};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Method, Request},
    response::Response,
};
use chrono::Utc;
use jcs_core::{Bucket, CoreError, RestoreOutcome, SyncEngine, SyncMode, User};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// S3 caps a multi-object delete at 1000 keys
const MAX_DELETE_REQUEST_BYTES: usize = 2 * 1024 * 1024;
const MAX_DELETE_RESULT_BYTES: usize = 8 * 1024 * 1024;

/// Fallback handler serving every S3 request
pub async fn handle(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let is_head = request.method() == Method::HEAD;
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match dispatch(&state, request).await {
        Ok(response) => response,
        Err(err) => err.to_response(is_head, &request_id),
    }
}

async fn dispatch(state: &Arc<AppState>, request: Request<Body>) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let s3 = state
        .classifier
        .classify(&parts.method, &parts.uri, &parts.headers);
    debug!(kind = ?s3.kind, bucket = %s3.bucket, key = %s3.key, "request classified");

    if s3.kind == RequestKind::NotImplemented {
        return Err(ApiError::s3_with_resource(
            S3ErrorCode::NotImplemented,
            format!("{} {} is not supported", parts.method, parts.uri.path()),
            s3.resource(),
        ));
    }

    let secrets = MetadataSecrets(Arc::clone(&state.metadata));
    let access_key = state
        .verifier
        .verify(&parts.method, &parts.uri, &parts.headers, Utc::now(), &secrets)
        .await
        .map_err(|e| {
            debug!(reason = %e, "signature verification failed");
            ApiError::s3(S3ErrorCode::InvalidAccessKeyId, "signature verification failed")
        })?;

    let user = match state.metadata.get_user_by_access_key(&access_key).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            return Err(ApiError::s3(
                S3ErrorCode::InvalidAccessKeyId,
                format!("no user for access key {}", access_key),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    if s3.kind == RequestKind::ListBuckets {
        return service::list_buckets(state, &user).await;
    }

    let bucket = owned_bucket(state, &s3.bucket, &user, &s3).await?;
    if let Some(source) = &s3.copy_source {
        owned_bucket(state, &source.bucket, &user, &s3).await?;
    }

    if s3.needs_restore() {
        restore(state, &bucket, &s3).await?;
    }

    let action = s3.sync_action();
    let (body, batch_keys) = match action {
        Some(SyncAction::BatchDelete) => {
            let bytes = to_bytes(body, MAX_DELETE_REQUEST_BYTES).await.map_err(|e| {
                ApiError::s3(S3ErrorCode::IncompleteBody, format!("reading delete request: {}", e))
            })?;
            let keys = xml::delete_request_keys(&bytes).map_err(|e| {
                ApiError::s3_with_resource(S3ErrorCode::MalformedXML, e.to_string(), s3.resource())
            })?;
            (Body::from(bytes), keys)
        }
        _ => (body, Vec::new()),
    };

    let response = state
        .proxy
        .forward(parts.method.clone(), &parts.uri, &parts.headers, body)
        .await?;

    match action {
        Some(SyncAction::BatchDelete) if response.status().is_success() => {
            let (response, deleted) = confirmed_deletes(response, batch_keys).await?;
            synchronize(state, bucket, deleted, SyncAction::Delete).await?;
            Ok(response)
        }
        Some(action) if response.status().is_success() => {
            synchronize(state, bucket, vec![s3.key.clone()], action).await?;
            Ok(response)
        }
        _ => Ok(response),
    }
}

/// Look up `name` and check that `user` owns it
async fn owned_bucket(
    state: &AppState,
    name: &str,
    user: &User,
    s3: &S3Request,
) -> Result<Bucket, ApiError> {
    let bucket = match state.metadata.get_bucket(name).await {
        Ok(bucket) => bucket,
        Err(e) if e.is_not_found() => {
            return Err(ApiError::s3_with_resource(
                S3ErrorCode::NotFound,
                format!("bucket {} is not registered", name),
                s3.resource(),
            ))
        }
        Err(e) => {
            return Err(ApiError::s3(
                S3ErrorCode::InternalError,
                format!("bucket lookup failed: {}", e),
            ))
        }
    };

    if !bucket.is_owned_by(&user.username) {
        debug!(user = %user.username, owner = %bucket.owner, bucket = %bucket.name, "bucket owned by another user");
        return Err(ApiError::s3_with_resource(
            S3ErrorCode::AccessDenied,
            format!("{} does not own bucket {}", user.username, bucket.name),
            s3.resource(),
        ));
    }
    Ok(bucket)
}

/// Drop the keys the primary reported as failed from a batch delete.
///
/// The response body is buffered and handed back unchanged.
async fn confirmed_deletes(
    response: Response,
    mut keys: Vec<String>,
) -> Result<(Response, Vec<String>), ApiError> {
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_DELETE_RESULT_BYTES)
        .await
        .map_err(|e| ApiError::s3(S3ErrorCode::InternalError, format!("reading delete result: {}", e)))?;

    match xml::delete_result_failed_keys(&bytes) {
        Ok(failed) => keys.retain(|key| !failed.contains(key)),
        Err(e) => warn!(error = %e, "unreadable delete result, propagating every key"),
    }
    Ok((Response::from_parts(parts, Body::from(bytes)), keys))
}

/// Bring an object back onto the primary before it is read
async fn restore(state: &AppState, bucket: &Bucket, s3: &S3Request) -> Result<(), ApiError> {
    let sync = Arc::clone(&state.sync);
    let (task_bucket, key) = (bucket.clone(), s3.key.clone());
    let always = state.config.always_restore;

    // Detached so a client disconnect does not abort a half-written restore
    let outcome = tokio::spawn(async move { sync.restore(&task_bucket, &key, always).await })
        .await
        .map_err(|e| ApiError::Internal(format!("restore task failed: {}", e)))?
        .map_err(|e| sync_failure("restore", e))?;

    if let RestoreOutcome::Restored { size } = outcome {
        info!(bucket = %bucket.name, key = %s3.key, size, "object restored before read");
    }
    Ok(())
}

/// Run the post-write synchronization according to the configured mode
async fn synchronize(
    state: &AppState,
    bucket: Bucket,
    keys: Vec<String>,
    action: SyncAction,
) -> Result<(), ApiError> {
    let sync = Arc::clone(&state.sync);
    let name = bucket.name.clone();
    let count = keys.len();
    let task = tokio::spawn(async move { run_sync(&sync, &bucket, &keys, action).await });

    match state.config.sync_mode {
        SyncMode::Synchronous => task
            .await
            .map_err(|e| ApiError::Internal(format!("sync task failed: {}", e)))?
            .map_err(|e| sync_failure("sync", e)),
        SyncMode::Asynchronous => {
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(bucket = %name, keys = count, ?action, error = %e, "background sync failed"),
                    Err(e) => error!(bucket = %name, keys = count, ?action, error = %e, "background sync task failed"),
                }
            });
            Ok(())
        }
    }
}

async fn run_sync(
    sync: &SyncEngine,
    bucket: &Bucket,
    keys: &[String],
    action: SyncAction,
) -> Result<(), CoreError> {
    for key in keys {
        match action {
            SyncAction::Upload => {
                sync.upload(bucket, key).await?;
            }
            SyncAction::Delete | SyncAction::BatchDelete => {
                sync.delete(bucket, key).await?;
            }
        }
    }
    Ok(())
}

/// Sync errors surface as InternalError even when the primary succeeded
fn sync_failure(operation: &str, err: CoreError) -> ApiError {
    ApiError::s3(
        S3ErrorCode::InternalError,
        format!("{} failed: {}", operation, err),
    )
}
