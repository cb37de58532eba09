use crate::traits::ToolEffect;
use async_trait::async_trait;

/// A tool call about to run inside one answer-generation dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ToolInvocation<'a> {
    pub dispatch_session: &'a str,
    pub tool_name: &'a str,
    pub arguments: &'a serde_json::Value,
    pub effect: ToolEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    Proceed,
    /// The call must not run; `reason` is fed back to the model as the tool result.
    Blocked { reason: String },
}

impl InterceptDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Hook consulted by the generator before every side-effecting tool call.
#[async_trait]
pub trait ToolInterceptor: Send + Sync {
    async fn intercept(&self, invocation: ToolInvocation<'_>) -> InterceptDecision;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_proceed_lets_a_call_run() {
        assert!(InterceptDecision::Proceed.is_proceed());
        assert!(
            !InterceptDecision::Blocked {
                reason: "held for approval".to_string()
            }
            .is_proceed()
        );
    }
}
