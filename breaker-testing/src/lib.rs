//! Disposable Redis fixture for integration tests that need a real C2 store.

use std::sync::atomic::{AtomicU32, Ordering};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Produces a unique breaker name per test so parallel tests never share buckets.
pub fn unique_breaker_name(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{id}")
}

pub struct RedisFixture {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    url: String,
}

impl RedisFixture {
    pub fn url(&self) -> &str {
        &self.url
    }
}

static REDIS: OnceCell<Option<RedisFixture>> = OnceCell::const_new();

/// Starts (once per process) a disposable Redis container and returns its connection URL.
/// Returns `None` if Docker is unavailable in the current environment.
pub async fn redis() -> Option<&'static RedisFixture> {
    REDIS
        .get_or_init(|| async {
            match Redis::default().start().await {
                Ok(container) => {
                    let port = match container.get_host_port_ipv4(6379).await {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!("failed to get Redis port: {e:?}");
                            return None;
                        }
                    };
                    let url = format!("redis://localhost:{port}");

                    if let Err(e) = verify_connection(&url).await {
                        tracing::warn!("Redis connection verification failed: {e:?}");
                        return None;
                    }

                    tracing::info!("Redis fixture started on port {port}");
                    Some(RedisFixture { container, url })
                }
                Err(e) => {
                    tracing::warn!("failed to start Redis container: {e:?}");
                    None
                }
            }
        })
        .await
        .as_ref()
}

async fn verify_connection(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_do_not_collide() {
        let a = unique_breaker_name("svc");
        let b = unique_breaker_name("svc");
        assert_ne!(a, b);
        assert!(a.starts_with("svc-"));
    }
}
