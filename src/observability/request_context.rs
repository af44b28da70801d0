//! Request context propagation for correlation IDs.
//!
//! Async engine code runs inside a `tokio::task_local!` scope. Adapter calls
//! run on the blocking pool, where the context is re-entered as a thread-local
//! for the duration of the call.

use crate::models::{RequestId, SessionId};
use std::cell::RefCell;
use std::future::Future;

/// Per-request context with correlation IDs.
#[derive(Clone, Debug)]
pub struct RequestContext {
    request_id: RequestId,
    session_id: SessionId,
}

impl RequestContext {
    /// Creates a request context.
    #[must_use]
    pub const fn new(request_id: RequestId, session_id: SessionId) -> Self {
        Self {
            request_id,
            session_id,
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Returns the session ID.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

tokio::task_local! {
    static TASK_CONTEXT: RequestContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Guard that restores the previous thread-local context on drop.
pub struct RequestContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Enters a request context for synchronous (blocking pool) work.
#[must_use]
pub fn enter_request_context(context: RequestContext) -> RequestContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    RequestContextGuard { previous }
}

/// Scopes a request context across an async future.
pub async fn scope_request_context<F, T>(context: RequestContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    TASK_CONTEXT.scope(context, fut).await
}

/// Returns the current request context, if set.
#[must_use]
pub fn current_request_context() -> Option<RequestContext> {
    if let Ok(ctx) = TASK_CONTEXT.try_with(Clone::clone) {
        return Some(ctx);
    }
    THREAD_CONTEXT.with(|slot| slot.borrow().clone())
}

/// Returns the current request ID, if set.
#[must_use]
pub fn current_request_id() -> Option<RequestId> {
    current_request_context().map(|ctx| ctx.request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_context_guard_restores_previous() {
        assert!(current_request_id().is_none());
        {
            let _guard = enter_request_context(RequestContext::new(
                RequestId::new("thread-test"),
                SessionId::new("s1"),
            ));
            assert_eq!(
                current_request_id().map(|id| id.to_string()).as_deref(),
                Some("thread-test")
            );
        }
        assert!(current_request_id().is_none());
    }

    #[tokio::test]
    async fn test_scope_request_context_propagates_across_await() {
        let context = RequestContext::new(RequestId::new("async-test"), SessionId::new("s1"));
        let observed = scope_request_context(context, async {
            tokio::task::yield_now().await;
            current_request_context()
        })
        .await;
        assert_eq!(
            observed.as_ref().map(|c| c.request_id().as_str()),
            Some("async-test")
        );
        assert_eq!(observed.map(|c| c.session_id().to_string()).as_deref(), Some("s1"));
    }
}
