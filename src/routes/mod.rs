pub mod listing;
pub mod videos;

use crate::errors::AppError;

pub(crate) const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub(crate) async fn timeout_query<T, F>(duration: std::time::Duration, fut: F) -> Result<T, AppError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(AppError::from(e)),
        Err(elapsed) => Err(AppError::Timeout(elapsed)),
    }
}
