//! Transport boundary: turns command results into `tonic::Status` and keeps a
//! panicking command from taking the process down.

use crate::error::{ErrorCode, Result};
use futures_util::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tonic::Status;
use tracing::{debug, error, warn};

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Log panics through `tracing` with a captured backtrace.
///
/// The hook runs on the panicking thread, so the backtrace points at the
/// panic site rather than at [`guard`].
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        error!(panic = %info, backtrace = %backtrace, "panic");
    }));
}

/// Run one command and convert its outcome for the wire.
pub async fn guard<T, F>(operation: &'static str, command: F) -> std::result::Result<T, Status>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(command).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            if err.code() == ErrorCode::Internal {
                error!(operation, error = %err, "command failed");
            } else {
                debug!(operation, code = err.code().as_str(), error = %err, "command rejected");
            }
            Err(err.to_status())
        }
        Err(payload) => {
            error!(
                operation,
                panic = %panic_message(payload.as_ref()),
                "command panicked"
            );
            Err(Status::internal(INTERNAL_MESSAGE))
        }
    }
}

/// [`guard`] with an upper bound on the command's run time. Dropping the
/// command future on timeout cancels any in-flight store or cache call.
pub async fn guard_with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    command: F,
) -> std::result::Result<T, Status>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, guard(operation, command)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, deadline_ms = %deadline.as_millis(), "command deadline exceeded");
            Err(Status::deadline_exceeded("request deadline exceeded"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityError;
    use tonic::Code;

    #[tokio::test]
    async fn test_passes_value_through() {
        let value = guard("ok", async { Ok::<_, IdentityError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_maps_domain_error() {
        let status = guard("login", async {
            Err::<(), _>(IdentityError::InvalidCredentials.context("authenticate"))
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "invalid credentials");
    }

    #[tokio::test]
    async fn test_internal_error_is_opaque() {
        let status = guard("register", async {
            Err::<(), _>(IdentityError::Internal("pool exhausted at 10.0.0.5".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), INTERNAL_MESSAGE);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal() {
        let status = guard("explode", async {
            if true {
                panic!("secret detail");
            }
            Ok::<(), IdentityError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("secret detail"));
    }

    #[tokio::test]
    async fn test_deadline() {
        let status = guard_with_deadline("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), IdentityError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
