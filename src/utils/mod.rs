pub mod db_connect;
pub mod env;
pub mod logging;
pub mod matcher_config;

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

/// Bounds a collaborator call; an elapsed timer becomes an error naming the call.
pub async fn with_timeout<T, F>(limit: Duration, label: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {:?}", label, limit)),
    }
}
