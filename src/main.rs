mod cdn;
mod config;
mod db;
mod errors;
mod routes;
mod session;
mod system;

use std::error::Error;

use axum::routing::{get, patch, post};
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::PgPool;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cdn::StreamClient;
use crate::config::StreamConfig;
use crate::db::init_db;
use crate::routes::listing::{list_public_videos, list_user_videos};
use crate::routes::videos::{
    begin_upload, check_processing_status, confirm_thumbnail, delete_video, get_transcript,
    get_video, save_details, thumbnail_upload_target, update_visibility,
};
use crate::system::health_check::health_check;

#[derive(Clone)]
pub struct InnerState {
    pub db: PgPool,
    pub stream: StreamClient,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_castify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Required configuration is resolved before anything is served; a
    // missing CDN credential or database URL aborts here.
    let stream_config = StreamConfig::from_env()?;
    let stream = StreamClient::new(stream_config)?;
    let db = init_db().await?;

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app_state = InnerState { db, stream };

    let app = Router::new()
        .route("/videos/upload", post(begin_upload))
        .route("/videos", get(list_public_videos))
        .route(
            "/videos/:video_id",
            get(get_video).put(save_details).delete(delete_video),
        )
        .route("/videos/:video_id/status", get(check_processing_status))
        .route("/videos/:video_id/visibility", patch(update_visibility))
        .route("/videos/:video_id/transcript", get(get_transcript))
        .route(
            "/videos/:video_id/thumbnail",
            post(thumbnail_upload_target).put(confirm_thumbnail),
        )
        .route("/users/:user_id/videos", get(list_user_videos))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(prometheus_layer)
        .layer(CookieManagerLayer::new())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;

    tracing::debug!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
