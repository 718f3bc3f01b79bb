//! Setup/execute/teardown state machine for stateful extension kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::contract::Method;
use crate::error::{CallError, CallResult, LifecycleError};

/// State of one hosted implementation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    /// Setup returned an error; only teardown is allowed from here.
    SetupFailed(String),
    TornDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => f.write_str("uninitialized"),
            LifecycleState::Ready => f.write_str("ready"),
            LifecycleState::SetupFailed(_) => f.write_str("setup failed"),
            LifecycleState::TornDown => f.write_str("torn down"),
        }
    }
}

/// Gate placed in front of a stateful implementation.
///
/// Executes share a read lock and run concurrently; setup and teardown take
/// the write lock, so a transition never overlaps an in-flight execute.
#[derive(Debug)]
pub struct LifecycleGuard {
    state: RwLock<LifecycleState>,
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        self.state.read().await.clone()
    }

    pub async fn setup<T, F, Fut>(&self, call: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Uninitialized {
            return Err(violation(Method::Setup, &state));
        }

        match call().await {
            Ok(value) => {
                debug!("Setup complete, instance ready");
                *state = LifecycleState::Ready;
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "Setup failed, only teardown is allowed now");
                *state = LifecycleState::SetupFailed(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn execute<T, F, Fut>(&self, call: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let state = self.state.read().await;
        if *state != LifecycleState::Ready {
            return Err(violation(Method::Execute, &state));
        }
        call().await
    }

    /// Moves to `TornDown` whatever the implementation returns. After a
    /// failed setup, a teardown error keeps the setup failure as context.
    pub async fn teardown<T, F, Fut>(&self, call: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut state = self.state.write().await;
        let setup_failure = match &*state {
            LifecycleState::Ready => None,
            LifecycleState::SetupFailed(reason) => Some(reason.clone()),
            other => return Err(violation(Method::Teardown, other)),
        };

        let result = call().await;
        *state = LifecycleState::TornDown;
        debug!("Instance torn down");

        match (result, setup_failure) {
            (Err(err), Some(reason)) => Err(with_setup_context(err, &reason)),
            (result, _) => result,
        }
    }
}

fn violation(operation: Method, state: &LifecycleState) -> CallError {
    LifecycleError {
        operation,
        state: state.clone(),
    }
    .into()
}

fn with_setup_context(err: CallError, reason: &str) -> CallError {
    match err {
        CallError::Application(app) => app
            .with_context(format!("after failed setup: {reason}"))
            .into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplicationError;

    async fn ok() -> CallResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn happy_path() {
        let guard = LifecycleGuard::new();
        guard.setup(ok).await.unwrap();
        guard.execute(ok).await.unwrap();
        guard.execute(ok).await.unwrap();
        guard.teardown(ok).await.unwrap();
        assert_eq!(guard.state().await, LifecycleState::TornDown);
    }

    #[tokio::test]
    async fn execute_requires_ready() {
        let guard = LifecycleGuard::new();
        let err = guard.execute(ok).await.unwrap_err();
        assert_eq!(
            err,
            CallError::Lifecycle(LifecycleError {
                operation: Method::Execute,
                state: LifecycleState::Uninitialized,
            })
        );
    }

    #[tokio::test]
    async fn setup_only_once() {
        let guard = LifecycleGuard::new();
        guard.setup(ok).await.unwrap();
        assert!(guard.setup(ok).await.unwrap_err().is_lifecycle());
        assert_eq!(guard.state().await, LifecycleState::Ready);
    }

    #[tokio::test]
    async fn torn_down_is_terminal() {
        let guard = LifecycleGuard::new();
        guard.setup(ok).await.unwrap();
        guard.teardown(ok).await.unwrap();

        assert!(guard.execute(ok).await.unwrap_err().is_lifecycle());
        assert!(guard.setup(ok).await.unwrap_err().is_lifecycle());
        assert!(guard.teardown(ok).await.unwrap_err().is_lifecycle());
    }

    #[tokio::test]
    async fn teardown_without_setup_is_rejected() {
        let guard = LifecycleGuard::new();
        let err = guard.teardown(ok).await.unwrap_err();
        assert!(err.is_lifecycle());
        assert_eq!(guard.state().await, LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn teardown_after_failed_setup_keeps_setup_context() {
        let guard = LifecycleGuard::new();
        let setup_err = guard
            .setup(|| async { Err::<(), _>(ApplicationError::new("no route to sink").into()) })
            .await
            .unwrap_err();
        assert_eq!(setup_err, ApplicationError::new("no route to sink").into());
        assert!(guard.execute(ok).await.unwrap_err().is_lifecycle());

        let err = guard
            .teardown(|| async { Err::<(), _>(ApplicationError::new("close failed").into()) })
            .await
            .unwrap_err();
        let CallError::Application(app) = err else {
            panic!("expected application error, got {err:?}");
        };
        assert_eq!(app.message, "close failed");
        assert!(app.context.unwrap().contains("no route to sink"));
        assert_eq!(guard.state().await, LifecycleState::TornDown);
    }
}
