use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::{
    cancel::CancelToken,
    config::Backoff,
    error::{Error, Result},
};

/// Outcome of one poll of a server-driven state.
pub(crate) enum Poll<T> {
    /// Terminal state reached.
    Ready(T),

    /// Still moving. `retry_after` is the server's hint for the next poll, if it sent one.
    Pending { retry_after: Option<Duration> },
}

/// Calls `poll` until it returns [`Poll::Ready`].
///
/// Between polls the loop sleeps according to `backoff`, preferring the server's `Retry-After`.
/// Transient errors (network, 5xx) count as a pending poll; any other error ends the loop.
/// Gives up with [`Error::Timeout`] after `backoff.max_attempts` polls, or when a poll or the
/// next sleep would overrun `backoff.max_wait`.
pub(crate) async fn poll_until<T, F, Fut>(
    backoff: &Backoff,
    cancel: &CancelToken,
    what: &str,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    let timed_out = || Error::Timeout {
        operation: what.to_owned(),
        budget: backoff.max_wait,
    };

    loop {
        attempt += 1;

        let remaining = backoff.max_wait.saturating_sub(start.elapsed());
        let Ok(res) = cancel.run(tokio::time::timeout(remaining, poll())).await? else {
            log::debug!("Poll of {what} still running after {:?}", backoff.max_wait);
            return Err(timed_out());
        };

        let retry_after = match res {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending { retry_after }) => retry_after,
            Err(err) if err.is_transient() => {
                log::warn!("Polling {what} failed, will retry: {err}");
                None
            }
            Err(err) => return Err(err),
        };

        let delay = backoff.delay(attempt, retry_after);
        if attempt >= backoff.max_attempts || start.elapsed() + delay > backoff.max_wait {
            return Err(timed_out());
        }

        log::trace!("{what} pending, next poll in {delay:?}");
        cancel.sleep(delay).await?;
    }
}
