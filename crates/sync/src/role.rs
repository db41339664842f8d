// Bounded lookups with a safe fallback.
//
// A remote lookup that gates a UI decision must not hang the view. It gets a
// fixed time budget; on timeout or error the caller receives the fallback.

use std::future::Future;
use std::time::Duration;

use scout_common::protocol::actions::GET_USER_ROLE;
use scout_common::protocol::rpc::RpcRequest;
use scout_common::types::UserRole;
use serde_json::Value;
use tracing::warn;

use crate::backend::{call_action, Backend};
use crate::error::{Result, SyncError};

pub const DEFAULT_ROLE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `lookup` for at most `timeout`, returning `fallback` on timeout or error.
pub async fn with_fallback<T, F>(what: &str, timeout: Duration, fallback: T, lookup: F) -> T
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(value)) => value,
        Ok(Err(error)) => {
            warn!(what, %error, "lookup failed; using fallback");
            fallback
        }
        Err(_) => {
            warn!(what, error = %SyncError::Timeout(timeout), "lookup timed out; using fallback");
            fallback
        }
    }
}

/// Role of the signed-in user; `UserRole::User` when the backend is slow or failing.
pub async fn fetch_user_role(backend: &dyn Backend, timeout: Duration) -> UserRole {
    with_fallback("user role", timeout, UserRole::default(), async {
        let data = call_action(backend, RpcRequest::new(GET_USER_ROLE)).await?;
        parse_role(&data)
    })
    .await
}

fn parse_role(data: &Value) -> Result<UserRole> {
    let role = data.get("role").unwrap_or(data);
    serde_json::from_value(role.clone()).map_err(|error| SyncError::decode("user role", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockBackend;
    use scout_common::protocol::rpc::RpcEnvelope;
    use serde_json::json;

    #[tokio::test]
    async fn role_is_read_from_either_shape() {
        let backend = MockBackend::new();
        backend.reply(GET_USER_ROLE, RpcEnvelope::ok(json!({"role": "admin"})));
        backend.reply(GET_USER_ROLE, RpcEnvelope::ok(json!("admin")));
        assert_eq!(fetch_user_role(backend.as_ref(), DEFAULT_ROLE_LOOKUP_TIMEOUT).await, UserRole::Admin);
        assert_eq!(fetch_user_role(backend.as_ref(), DEFAULT_ROLE_LOOKUP_TIMEOUT).await, UserRole::Admin);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_falls_back_to_user() {
        let backend = MockBackend::new();
        backend.reply(GET_USER_ROLE, RpcEnvelope::ok(json!({"role": "admin"})));
        backend.delay_action(GET_USER_ROLE, Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let role = fetch_user_role(backend.as_ref(), DEFAULT_ROLE_LOOKUP_TIMEOUT).await;
        assert_eq!(role, UserRole::User);
        assert!(started.elapsed() >= DEFAULT_ROLE_LOOKUP_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn failed_or_garbled_lookup_falls_back_to_user() {
        let backend = MockBackend::new();
        backend.fail_transport(GET_USER_ROLE, "offline");
        backend.reply(GET_USER_ROLE, RpcEnvelope::ok(json!({"role": "superuser"})));
        assert_eq!(fetch_user_role(backend.as_ref(), DEFAULT_ROLE_LOOKUP_TIMEOUT).await, UserRole::User);
        assert_eq!(fetch_user_role(backend.as_ref(), DEFAULT_ROLE_LOOKUP_TIMEOUT).await, UserRole::User);
    }
}
