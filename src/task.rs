//! Panic boundaries for background work.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt as _;
use tokio::task::JoinHandle;

use crate::error::{FleetError, Result};

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await a spawned task, turning a panic into a `TaskPanicked` error.
pub async fn join_guarded<T>(handle: JoinHandle<Result<T>>, what: &str) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(FleetError::task_panicked(format!(
            "{} panic: {}",
            what,
            panic_message(&*e.into_panic())
        ))),
        Err(e) => Err(FleetError::task_panicked(format!("{} cancelled: {}", what, e))),
    }
}

/// Run `fut` in place, turning a panic into a `TaskPanicked` error.
pub async fn catch_panic<F, T>(fut: F, what: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(FleetError::task_panicked(format!(
            "{} panic: {}",
            what,
            panic_message(&*payload)
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn blocking_panic_becomes_error() {
        let handle = tokio::task::spawn_blocking(|| -> Result<()> { panic!("disk on fire") });
        let err = join_guarded(handle, "server update").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskPanicked);
        assert_eq!(err.message(), "server update panic: disk on fire");
    }

    #[tokio::test]
    async fn async_panic_becomes_error() {
        let err = catch_panic(
            async {
                if true {
                    panic!("{}", String::from("boom"));
                }
                Ok(())
            },
            "deploy",
        )
        .await
        .unwrap_err();
        assert_eq!(err.message(), "deploy panic: boom");
    }

    #[tokio::test]
    async fn success_passes_through() {
        let value = catch_panic(async { Ok(7) }, "noop").await.unwrap();
        assert_eq!(value, 7);
    }
}
