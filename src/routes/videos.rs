use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::cdn::{lifecycle_for_code, Lifecycle, StreamClient};
use crate::errors::AppError;
use crate::routes::{timeout_query, QUERY_TIMEOUT};
use crate::session::require_session;
use crate::InnerState;

pub const NOT_FOUND_OR_DENIED: &str = "Video not found or access denied";

/// Reported when the CDN status endpoint cannot be reached. Distinct from
/// the stored lifecycle `error` state: this one means "retry on the next
/// poll", not "encoding failed".
pub const STATUS_UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
    pub status: String,
    pub duration: Option<f64>,
    pub views: i64,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub video_id: Uuid,
    pub upload_url: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub is_processed: bool,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVisibilityRequest {
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDetailsRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub visibility: String,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: Uuid,
    pub video_id: Uuid,
    pub content: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Mutation responses carry the view keys the caller should invalidate, so
/// cache invalidation is an explicit contract instead of a hidden side
/// effect.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMutation {
    pub video: Video,
    pub invalidated: Vec<String>,
}

fn invalidated_views(video_id: Uuid, owner_id: &str) -> Vec<String> {
    vec![
        format!("/videos/{}", video_id),
        "/videos".to_string(),
        format!("/users/{}/videos", owner_id),
    ]
}

/// Allocates a video identity, records it as `uploading`, and hands the
/// client a direct CDN upload target. The identity is generated before the
/// insert, but the target is only returned once the row exists, so a failed
/// insert can never leak a usable upload URL.
#[tracing::instrument(name = "Begin video upload", skip(cookies, inner))]
pub async fn begin_upload(
    cookies: Cookies,
    State(inner): State<InnerState>,
) -> Result<Json<UploadTicket>, AppError> {
    let InnerState { db, stream, .. } = inner;

    let user_id = require_session(&cookies)?;
    let video_id = Uuid::new_v4();

    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(
            r#"INSERT INTO videos (id, user_id, title, is_public, status)
               VALUES ($1, $2, 'Untitled Video', FALSE, $3)"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .bind(Lifecycle::Uploading.as_str())
        .execute(&db),
    )
    .await?;

    tracing::info!(%video_id, "Created uploading video record");

    Ok(Json(UploadTicket {
        video_id,
        upload_url: stream.upload_target(video_id),
        headers: stream.upload_headers(),
    }))
}

/// Reconciles the CDN-reported encoding state onto the stored record. The
/// caller polls this on a timer, so a CDN failure degrades to an
/// `{isProcessed: false, status: "unavailable"}` body instead of an error
/// response, and terminal states are never overwritten.
#[tracing::instrument(name = "Check processing status", skip(cookies, inner))]
pub async fn check_processing_status(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<ProcessingStatus>, AppError> {
    let InnerState { db, stream, .. } = inner;

    require_session(&cookies)?;

    let encoding = match stream.fetch_status(video_id).await {
        Ok(encoding) => encoding,
        Err(e) => {
            tracing::warn!(%video_id, error = %e, "CDN status unavailable, reporting degraded result");
            return Ok(Json(ProcessingStatus {
                is_processed: false,
                status: STATUS_UNAVAILABLE.to_string(),
            }));
        }
    };

    let lifecycle = lifecycle_for_code(encoding.status);

    match lifecycle {
        Lifecycle::Ready => {
            // Guarded so repeated polls after completion neither regress the
            // state nor rewrite the duration.
            timeout_query(
                QUERY_TIMEOUT,
                sqlx::query(
                    r#"UPDATE videos SET status = 'ready', duration = $2
                       WHERE id = $1 AND status NOT IN ('ready', 'error')"#,
                )
                .bind(video_id)
                .bind(encoding.duration)
                .execute(&db),
            )
            .await?;
        }
        Lifecycle::Error => {
            timeout_query(
                QUERY_TIMEOUT,
                sqlx::query(
                    r#"UPDATE videos SET status = 'error'
                       WHERE id = $1 AND status NOT IN ('ready', 'error')"#,
                )
                .bind(video_id)
                .execute(&db),
            )
            .await?;
        }
        _ => {
            timeout_query(
                QUERY_TIMEOUT,
                sqlx::query(r#"UPDATE videos SET status = 'processing' WHERE id = $1 AND status = 'uploading'"#)
                    .bind(video_id)
                    .execute(&db),
            )
            .await?;
        }
    }

    Ok(Json(ProcessingStatus {
        is_processed: lifecycle == Lifecycle::Ready,
        status: lifecycle.as_str().to_string(),
    }))
}

/// Fetches a video visible to the caller (public, or owned by them) and
/// counts the view with an atomic in-place increment.
#[tracing::instrument(name = "Get video", skip(cookies, inner))]
pub async fn get_video(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<Video>, AppError> {
    let InnerState { db, .. } = inner;

    let user_id = require_session(&cookies)?;

    let video = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(
            r#"SELECT * FROM videos WHERE id = $1 AND (is_public OR user_id = $2)"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .fetch_optional(&db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()))?;

    // views = views + 1 in the store, never read-modify-write here.
    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(r#"UPDATE videos SET views = views + 1 WHERE id = $1"#)
            .bind(video_id)
            .execute(&db),
    )
    .await?;

    Ok(Json(video))
}

#[tracing::instrument(name = "Update video visibility", skip(cookies, inner))]
pub async fn update_visibility(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
    Json(payload): Json<UpdateVisibilityRequest>,
) -> Result<Json<VideoMutation>, AppError> {
    let InnerState { db, .. } = inner;

    let user_id = require_session(&cookies)?;

    // Ownership is enforced by the update filter itself; a non-owner gets
    // zero rows, indistinguishable from a missing record.
    let video = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(
            r#"UPDATE videos SET is_public = $3
               WHERE id = $1 AND user_id = $2
               RETURNING *"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .bind(payload.is_public)
        .fetch_optional(&db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()))?;

    let invalidated = invalidated_views(video.id, &video.user_id);
    Ok(Json(VideoMutation { video, invalidated }))
}

#[tracing::instrument(name = "Save video details", skip(cookies, inner, payload))]
pub async fn save_details(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
    Json(payload): Json<SaveDetailsRequest>,
) -> Result<Json<VideoMutation>, AppError> {
    let InnerState { db, .. } = inner;

    let user_id = require_session(&cookies)?;
    let is_public = validate_details(&payload)?;

    // Finalizing details publishes the record: one atomic statement writes
    // every field and the `ready` state together.
    let video = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(
            r#"UPDATE videos
               SET title = $3, description = $4, tags = $5, is_public = $6, status = 'ready'
               WHERE id = $1 AND user_id = $2
               RETURNING *"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .bind(payload.title.trim())
        .bind(&payload.description)
        .bind(&payload.tags)
        .bind(is_public)
        .fetch_optional(&db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()))?;

    let invalidated = invalidated_views(video.id, &video.user_id);
    Ok(Json(VideoMutation { video, invalidated }))
}

/// Two-phase delete: the CDN asset is purged first, and the row is only
/// removed once the CDN confirms (404 counts as already purged). A CDN
/// outage aborts the operation and leaves the record in place, so no asset
/// can be orphaned behind a missing record.
#[tracing::instrument(name = "Delete video", skip(cookies, inner))]
pub async fn delete_video(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let InnerState { db, stream, .. } = inner;

    let user_id = require_session(&cookies)?;

    let owned: Option<Uuid> = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar(r#"SELECT id FROM videos WHERE id = $1 AND user_id = $2"#)
            .bind(video_id)
            .bind(&user_id)
            .fetch_optional(&db),
    )
    .await?;

    if owned.is_none() {
        return Err(AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()));
    }

    stream.delete_video(video_id).await?;

    timeout_query(
        QUERY_TIMEOUT,
        sqlx::query(r#"DELETE FROM videos WHERE id = $1 AND user_id = $2"#)
            .bind(video_id)
            .bind(&user_id)
            .execute(&db),
    )
    .await?;

    tracing::info!(%video_id, "Deleted video record and CDN asset");

    Ok(Json(json!({
        "success": true,
        "invalidated": invalidated_views(video_id, &user_id)
    })))
}

#[tracing::instrument(name = "Get video transcript", skip(cookies, inner))]
pub async fn get_transcript(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<Transcript>, AppError> {
    let InnerState { db, .. } = inner;

    let user_id = require_session(&cookies)?;

    let transcript = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Transcript>(
            r#"SELECT t.id, t.video_id, t.content, t.language, t.created_at
               FROM transcripts t
               JOIN videos v ON v.id = t.video_id
               WHERE t.video_id = $1 AND (v.is_public OR v.user_id = $2)"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .fetch_optional(&db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Transcript not found".to_string()))?;

    Ok(Json(transcript))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailTicket {
    pub upload_url: String,
    pub headers: HashMap<String, String>,
    pub thumbnail_url: String,
}

fn thumbnail_ticket(stream: &StreamClient, video_id: Uuid) -> ThumbnailTicket {
    ThumbnailTicket {
        upload_url: stream.thumbnail_target(video_id),
        headers: stream.upload_headers(),
        thumbnail_url: stream.thumbnail_url(video_id),
    }
}

/// Hands the owner a direct CDN target for the thumbnail. Issuing a target
/// writes nothing; the record only points at the thumbnail once the owner
/// confirms the upload, so an abandoned upload cannot leave the record
/// referencing a missing image.
#[tracing::instrument(name = "Get thumbnail upload target", skip(cookies, inner))]
pub async fn thumbnail_upload_target(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<ThumbnailTicket>, AppError> {
    let InnerState { db, stream, .. } = inner;

    let user_id = require_session(&cookies)?;

    let owned: Option<Uuid> = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_scalar(r#"SELECT id FROM videos WHERE id = $1 AND user_id = $2"#)
            .bind(video_id)
            .bind(&user_id)
            .fetch_optional(&db),
    )
    .await?;

    if owned.is_none() {
        return Err(AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()));
    }

    Ok(Json(thumbnail_ticket(&stream, video_id)))
}

/// Records the uploaded thumbnail on the row, after the owner has pushed the
/// bytes to the CDN target.
#[tracing::instrument(name = "Confirm thumbnail upload", skip(cookies, inner))]
pub async fn confirm_thumbnail(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<VideoMutation>, AppError> {
    let InnerState { db, stream, .. } = inner;

    let user_id = require_session(&cookies)?;
    let thumbnail_url = stream.thumbnail_url(video_id);

    let video = timeout_query(
        QUERY_TIMEOUT,
        sqlx::query_as::<_, Video>(
            r#"UPDATE videos SET thumbnail_url = $3
               WHERE id = $1 AND user_id = $2
               RETURNING *"#,
        )
        .bind(video_id)
        .bind(&user_id)
        .bind(&thumbnail_url)
        .fetch_optional(&db),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(NOT_FOUND_OR_DENIED.to_string()))?;

    let invalidated = invalidated_views(video.id, &video.user_id);
    Ok(Json(VideoMutation { video, invalidated }))
}

fn validate_details(payload: &SaveDetailsRequest) -> Result<bool, AppError> {
    let mut errors: HashMap<String, Vec<String>> = HashMap::new();

    if payload.title.trim().is_empty() {
        errors
            .entry("title".to_string())
            .or_default()
            .push("Title must not be empty".to_string());
    }

    let is_public = match payload.visibility.as_str() {
        "public" => Some(true),
        "private" => Some(false),
        _ => {
            errors
                .entry("visibility".to_string())
                .or_default()
                .push("Visibility must be 'public' or 'private'".to_string());
            None
        }
    };

    if !errors.is_empty() {
        return Err(AppError::ValidationErrors(errors));
    }

    // errors is empty, so visibility parsed
    Ok(is_public.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(title: &str, visibility: &str) -> SaveDetailsRequest {
        SaveDetailsRequest {
            title: title.to_string(),
            description: None,
            tags: vec![],
            visibility: visibility.to_string(),
        }
    }

    #[test]
    fn empty_title_is_a_field_level_error() {
        let err = validate_details(&details("   ", "public")).unwrap_err();
        match err {
            AppError::ValidationErrors(errors) => assert!(errors.contains_key("title")),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn unknown_visibility_is_a_field_level_error() {
        let err = validate_details(&details("Demo", "unlisted")).unwrap_err();
        match err {
            AppError::ValidationErrors(errors) => assert!(errors.contains_key("visibility")),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn valid_details_resolve_visibility() {
        assert!(validate_details(&details("Demo", "public")).unwrap());
        assert!(!validate_details(&details("Demo", "private")).unwrap());
    }

    #[test]
    fn degraded_sentinel_is_distinct_from_lifecycle_error() {
        // A poller must be able to tell "CDN unreachable, retry later" from
        // "encoding permanently failed".
        let degraded = ProcessingStatus {
            is_processed: false,
            status: STATUS_UNAVAILABLE.to_string(),
        };
        let failed = ProcessingStatus {
            is_processed: false,
            status: Lifecycle::Error.as_str().to_string(),
        };
        assert_ne!(
            serde_json::to_value(&degraded).unwrap(),
            serde_json::to_value(&failed).unwrap()
        );
    }

    #[test]
    fn thumbnail_ticket_composes_targets_without_record_state() {
        let stream = StreamClient::new(crate::config::StreamConfig {
            base_url: url::Url::parse("https://video.example.com").unwrap(),
            library_id: "lib-123".to_string(),
            access_key: secrecy::Secret::new("key-abc".to_string()),
        })
        .unwrap();
        let id = Uuid::parse_str("6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b").unwrap();

        let ticket = thumbnail_ticket(&stream, id);
        assert_eq!(
            ticket.upload_url,
            "https://video.example.com/library/lib-123/videos/6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b/thumbnail"
        );
        assert_eq!(
            ticket.thumbnail_url,
            "https://video.example.com/library/lib-123/videos/6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b/thumbnail.jpg"
        );
        assert!(ticket.headers.contains_key("AccessKey"));
    }

    #[test]
    fn mutations_invalidate_detail_listing_and_profile_views() {
        let id = Uuid::parse_str("6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b").unwrap();
        let keys = invalidated_views(id, "user-1");
        assert_eq!(
            keys,
            vec![
                "/videos/6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b".to_string(),
                "/videos".to_string(),
                "/users/user-1/videos".to_string(),
            ]
        );
    }
}
