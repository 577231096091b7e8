//! Retry loop shared by the stores' `ensure_seed`.
//!
//! Transient failures are retried `retries` times with a fixed backoff.
//! Once the budget is spent the last error is reported as a connection
//! error; anything non-transient is returned as is.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};

pub(crate) async fn seed_with_retry<F, Fut>(
    key: &str,
    retries: u32,
    backoff: Duration,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failures = 0;
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && failures < retries => {
                failures += 1;
                warn!(
                    key,
                    attempt = failures,
                    retries,
                    error = %e,
                    "Seeding failed, retrying"
                );
                sleep(backoff).await;
            }
            Err(e) if e.is_transient() => {
                return Err(Error::Connection(format!(
                    "Seeding '{}' failed after {} attempts: {}",
                    key,
                    failures + 1,
                    e
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
