use axum::extract::{Path, Query, State};
use axum::Json;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tower_cookies::Cookies;

use crate::errors::AppError;
use crate::routes::videos::Video;
use crate::routes::{timeout_query, QUERY_TIMEOUT};
use crate::session::require_session;
use crate::InnerState;

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;
const DEFAULT_SORT_FIELD: &str = "created_at";

static SORTABLE_FIELDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from(["created_at", "title", "views", "likes", "duration"])
});

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQueryOptions {
    pub search_query: Option<String>,
    pub sort_filter: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPage {
    pub videos: Vec<Video>,
    pub total_count: i64,
}

enum ListScope {
    Public,
    /// All videos of one owner; private rows only when the owner themself
    /// is asking.
    Owner {
        user_id: String,
        include_private: bool,
    },
}

/// Parses a `"<field>-<direction>"` sort filter. Unknown fields fall back to
/// creation time and only an explicit `-asc` suffix selects ascending order.
fn parse_sort_filter(filter: Option<&str>) -> (&'static str, &'static str) {
    let raw = filter.unwrap_or("").trim();

    let (field, direction) = match raw.rsplit_once('-') {
        Some((field, direction)) => (field, direction),
        None => (raw, ""),
    };

    let field = SORTABLE_FIELDS
        .get(field)
        .copied()
        .unwrap_or(DEFAULT_SORT_FIELD);
    let direction = if direction == "asc" { "ASC" } else { "DESC" };

    (field, direction)
}

fn push_scope(builder: &mut QueryBuilder<'_, Postgres>, scope: &ListScope) {
    match scope {
        ListScope::Public => {
            builder.push(" WHERE is_public = TRUE");
        }
        ListScope::Owner {
            user_id,
            include_private,
        } => {
            builder.push(" WHERE user_id = ");
            builder.push_bind(user_id.clone());
            if !include_private {
                builder.push(" AND is_public = TRUE");
            }
        }
    }
}

fn push_search(builder: &mut QueryBuilder<'_, Postgres>, options: &VideoQueryOptions) {
    if let Some(search) = &options.search_query {
        let search = search.trim();
        if !search.is_empty() {
            builder.push(" AND title ILIKE ");
            builder.push_bind(format!("%{}%", search));
        }
    }
}

fn build_page_query(scope: &ListScope, options: &VideoQueryOptions) -> QueryBuilder<'static, Postgres> {
    let (sort_field, sort_direction) = parse_sort_filter(options.sort_filter.as_deref());
    let limit = options.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = options.offset.unwrap_or(0).max(0);

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM videos");
    push_scope(&mut builder, scope);
    push_search(&mut builder, options);

    // Secondary id key keeps the ordering total, so pages stay stable when
    // the sort field has ties.
    builder.push(format!(" ORDER BY {} {}, id DESC", sort_field, sort_direction));
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);

    builder
}

fn build_count_query(scope: &ListScope, options: &VideoQueryOptions) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM videos");
    push_scope(&mut builder, scope);
    push_search(&mut builder, options);
    builder
}

async fn fetch_page(
    db: &PgPool,
    scope: ListScope,
    options: &VideoQueryOptions,
) -> Result<VideoPage, AppError> {
    let mut page_query = build_page_query(&scope, options);
    let videos = timeout_query(
        QUERY_TIMEOUT,
        page_query.build_query_as::<Video>().fetch_all(db),
    )
    .await
    .inspect_err(|e| tracing::error!("Video page query failed: {:?}", e))?;

    let mut count_query = build_count_query(&scope, options);
    let total_count = timeout_query(
        QUERY_TIMEOUT,
        count_query.build_query_scalar::<i64>().fetch_one(db),
    )
    .await
    .inspect_err(|e| tracing::error!("Video count query failed: {:?}", e))?;

    Ok(VideoPage {
        videos,
        total_count,
    })
}

#[tracing::instrument(name = "List public videos", skip(cookies, inner))]
pub async fn list_public_videos(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(options): Query<VideoQueryOptions>,
) -> Result<Json<VideoPage>, AppError> {
    let InnerState { db, .. } = inner;

    require_session(&cookies)?;

    let page = fetch_page(&db, ListScope::Public, &options).await?;
    Ok(Json(page))
}

#[tracing::instrument(name = "List videos by owner", skip(cookies, inner))]
pub async fn list_user_videos(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(user_id): Path<String>,
    Query(options): Query<VideoQueryOptions>,
) -> Result<Json<VideoPage>, AppError> {
    let InnerState { db, .. } = inner;

    let session_user = require_session(&cookies)?;
    let scope = ListScope::Owner {
        include_private: session_user == user_id,
        user_id,
    };

    let page = fetch_page(&db, scope, &options).await?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_sort_filter_defaults_to_created_at_descending() {
        assert_eq!(parse_sort_filter(None), ("created_at", "DESC"));
        assert_eq!(parse_sort_filter(Some("")), ("created_at", "DESC"));
    }

    #[test]
    fn asc_suffix_selects_ascending() {
        assert_eq!(parse_sort_filter(Some("title-asc")), ("title", "ASC"));
        assert_eq!(parse_sort_filter(Some("created_at-asc")), ("created_at", "ASC"));
    }

    #[test]
    fn anything_but_asc_is_descending() {
        assert_eq!(parse_sort_filter(Some("views-desc")), ("views", "DESC"));
        assert_eq!(parse_sort_filter(Some("views-down")), ("views", "DESC"));
        assert_eq!(parse_sort_filter(Some("views")), ("views", "DESC"));
    }

    #[test]
    fn unknown_sort_field_falls_back_to_created_at() {
        assert_eq!(parse_sort_filter(Some("user_id-asc")), ("created_at", "ASC"));
        assert_eq!(
            parse_sort_filter(Some("drop table-asc")),
            ("created_at", "ASC")
        );
    }

    #[test]
    fn public_page_query_orders_with_id_tiebreak() {
        let query = build_page_query(&ListScope::Public, &VideoQueryOptions::default());
        let sql = query.sql();
        assert!(sql.contains("WHERE is_public = TRUE"));
        assert!(sql.contains("ORDER BY created_at DESC, id DESC"));
        assert!(sql.contains("LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn search_adds_case_insensitive_title_match() {
        let options = VideoQueryOptions {
            search_query: Some("demo".to_string()),
            ..Default::default()
        };
        let query = build_page_query(&ListScope::Public, &options);
        assert!(query.sql().contains("title ILIKE $1"));
    }

    #[test]
    fn owner_scope_without_privileges_restricts_to_public_rows() {
        let scope = ListScope::Owner {
            user_id: "user-1".to_string(),
            include_private: false,
        };
        let query = build_count_query(&scope, &VideoQueryOptions::default());
        let sql = query.sql();
        assert!(sql.contains("WHERE user_id = $1"));
        assert!(sql.contains("AND is_public = TRUE"));
    }

    #[test]
    fn owner_scope_for_self_includes_private_rows() {
        let scope = ListScope::Owner {
            user_id: "user-1".to_string(),
            include_private: true,
        };
        let query = build_count_query(&scope, &VideoQueryOptions::default());
        assert!(!query.sql().contains("is_public"));
    }
}
