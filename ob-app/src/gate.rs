//! Per-dispatch-session tool-call gate.
//!
//! A session is idle until the orchestrator leases it for one supervised
//! dispatch. While observed, side-effecting calls whose tool name is not
//! pre-approved are recorded and refused. Leases serialize dispatches on the
//! same session id and always return the session to idle.

use async_trait::async_trait;
use dashmap::DashMap;
use ob_channels::{ChannelId, SenderId};
use ob_tools::{InterceptDecision, ToolInterceptor, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedCall {
    pub tool_name: String,
    pub params: serde_json::Value,
}

impl BlockedCall {
    pub fn new(tool_name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub channel_id: ChannelId,
    pub sender_id: SenderId,
    pub question: String,
}

#[derive(Debug, Clone)]
pub struct ObservedDispatch {
    pub context: DispatchContext,
    pub preapproved: HashSet<String>,
    pub blocked: Vec<BlockedCall>,
}

#[derive(Default)]
pub struct SessionToolGate {
    observing: DashMap<String, ObservedDispatch>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionToolGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session`, then mark it observed.
    pub async fn supervise(
        self: &Arc<Self>,
        session: &str,
        context: DispatchContext,
        preapproved: impl IntoIterator<Item = String>,
    ) -> GateLease {
        let lock = self
            .locks
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let preapproved: HashSet<String> = preapproved.into_iter().collect();
        tracing::debug!(
            dispatch_session = session,
            preapproved = ?preapproved,
            "tool gate observing"
        );
        self.observing.insert(
            session.to_string(),
            ObservedDispatch {
                context,
                preapproved,
                blocked: Vec::new(),
            },
        );
        GateLease {
            gate: self.clone(),
            session: session.to_string(),
            guard: Some(guard),
        }
    }

    pub fn is_observing(&self, session: &str) -> bool {
        self.observing.contains_key(session)
    }

    fn clear(&self, session: &str) -> Vec<BlockedCall> {
        self.observing
            .remove(session)
            .map(|(_, observed)| observed.blocked)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ToolInterceptor for SessionToolGate {
    async fn intercept(&self, invocation: ToolInvocation<'_>) -> InterceptDecision {
        if !invocation.effect.is_side_effecting() {
            return InterceptDecision::Proceed;
        }
        let Some(mut observed) = self.observing.get_mut(invocation.dispatch_session) else {
            return InterceptDecision::Proceed;
        };
        if observed.preapproved.contains(invocation.tool_name) {
            tracing::info!(
                dispatch_session = invocation.dispatch_session,
                tool_name = invocation.tool_name,
                "pre-approved tool call allowed"
            );
            return InterceptDecision::Proceed;
        }
        observed.blocked.push(BlockedCall::new(
            invocation.tool_name,
            invocation.arguments.clone(),
        ));
        tracing::info!(
            dispatch_session = invocation.dispatch_session,
            tool_name = invocation.tool_name,
            channel_id = %observed.context.channel_id,
            blocked_so_far = observed.blocked.len(),
            "tool call blocked pending review"
        );
        InterceptDecision::Blocked {
            reason: format!(
                "{} was not executed: it requires human approval, which has been requested",
                invocation.tool_name
            ),
        }
    }
}

/// Exclusive observation of one dispatch session.
///
/// `finish` returns the blocked calls. Dropping without `finish` discards them.
/// Either way the session is back to idle before the lock is released.
pub struct GateLease {
    gate: Arc<SessionToolGate>,
    session: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl GateLease {
    pub fn finish(mut self) -> Vec<BlockedCall> {
        let blocked = self.gate.clear(&self.session);
        tracing::debug!(
            dispatch_session = %self.session,
            blocked = blocked.len(),
            "tool gate released"
        );
        self.release();
        blocked
    }

    fn release(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        self.gate.clear(&self.session);
        drop(guard);
        self.gate
            .locks
            .remove_if(&self.session, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Drop for GateLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_tools::ToolEffect;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> DispatchContext {
        DispatchContext {
            channel_id: ChannelId::from("C1"),
            sender_id: SenderId::from("U1"),
            question: "close ticket 7".to_string(),
        }
    }

    async fn attempt(gate: &SessionToolGate, session: &str, tool: &str) -> InterceptDecision {
        let args = json!({"id": 7, "status": "closed"});
        gate.intercept(ToolInvocation {
            dispatch_session: session,
            tool_name: tool,
            arguments: &args,
            effect: ToolEffect::SideEffecting,
        })
        .await
    }

    #[tokio::test]
    async fn unapproved_side_effects_are_blocked_and_recorded() {
        let gate = Arc::new(SessionToolGate::new());
        let lease = gate.supervise("observe:C1:U1", context(), []).await;

        let decision = attempt(&gate, "observe:C1:U1", "update_ticket").await;
        assert!(matches!(decision, InterceptDecision::Blocked { .. }));

        let blocked = lease.finish();
        assert_eq!(
            blocked,
            vec![BlockedCall::new("update_ticket", json!({"id": 7, "status": "closed"}))]
        );
        assert!(!gate.is_observing("observe:C1:U1"));
    }

    #[tokio::test]
    async fn preapproved_tools_proceed() {
        let gate = Arc::new(SessionToolGate::new());
        let lease = gate
            .supervise("approved:r1", context(), ["update_ticket".to_string()])
            .await;

        assert!(attempt(&gate, "approved:r1", "update_ticket").await.is_proceed());
        assert!(!attempt(&gate, "approved:r1", "delete_account").await.is_proceed());

        let blocked = lease.finish();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].tool_name, "delete_account");
    }

    #[tokio::test]
    async fn read_only_and_unobserved_calls_proceed() {
        let gate = Arc::new(SessionToolGate::new());
        assert!(attempt(&gate, "observe:C9:U9", "update_ticket").await.is_proceed());

        let _lease = gate.supervise("observe:C1:U1", context(), []).await;
        let args = json!({});
        let decision = gate
            .intercept(ToolInvocation {
                dispatch_session: "observe:C1:U1",
                tool_name: "crm_lookup",
                arguments: &args,
                effect: ToolEffect::ReadOnly,
            })
            .await;
        assert!(decision.is_proceed());
    }

    #[tokio::test]
    async fn dropping_a_lease_clears_state() {
        let gate = Arc::new(SessionToolGate::new());
        {
            let _lease = gate.supervise("observe:C1:U1", context(), []).await;
            attempt(&gate, "observe:C1:U1", "update_ticket").await;
            assert!(gate.is_observing("observe:C1:U1"));
        }
        assert!(!gate.is_observing("observe:C1:U1"));
        assert!(gate.locks.is_empty());

        // A later dispatch on the same session starts clean.
        let lease = gate.supervise("observe:C1:U1", context(), []).await;
        assert!(lease.finish().is_empty());
    }

    #[tokio::test]
    async fn same_session_dispatches_are_serialized() {
        let gate = Arc::new(SessionToolGate::new());
        let first = gate.supervise("observe:C1:U1", context(), []).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let lease = gate.supervise("observe:C1:U1", context(), []).await;
                lease.finish()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        attempt(&gate, "observe:C1:U1", "update_ticket").await;
        assert_eq!(first.finish().len(), 1);

        let second = waiter.await.expect("second dispatch");
        assert!(second.is_empty(), "blocked calls must not leak across dispatches");
    }

    #[tokio::test]
    async fn different_sessions_do_not_wait_on_each_other() {
        let gate = Arc::new(SessionToolGate::new());
        let _a = gate.supervise("observe:C1:U1", context(), []).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            gate.supervise("observe:C2:U2", context(), []),
        )
        .await
        .expect("independent session");
        assert!(gate.is_observing("observe:C2:U2"));
        drop(b);
        assert!(!gate.is_observing("observe:C2:U2"));
    }
}
