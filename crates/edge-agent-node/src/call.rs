//! Bounded control-plane calls.

use std::future::Future;
use std::time::Duration;

use edge_agent_control::ControlError;

/// Await a control-plane call for at most `timeout`.
///
/// An elapsed call is reported as [`ControlError::Timeout`], which classifies
/// as a server error.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ControlError>
where
    F: Future<Output = Result<T, ControlError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ControlError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_call_is_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ControlError>(1)
        };
        let err = bounded(Duration::from_secs(15), slow).await.unwrap_err();
        assert!(matches!(err, ControlError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_through() {
        let fast = async { Ok::<_, ControlError>(7) };
        assert_eq!(bounded(Duration::from_secs(15), fast).await.unwrap(), 7);
    }
}
