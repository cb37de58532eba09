//! Answer generation under a tool interceptor.

use crate::knowledge::KnowledgeHit;
use async_trait::async_trait;
use ob_llm::{ChatMessage, LlmClient};
use ob_tools::{InterceptDecision, Tool, ToolInterceptor, ToolInvocation, to_llm_tool_def};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Generated text starting with this means no reply is warranted.
pub const NO_ANSWER_MARKER: &str = "[[NO_ANSWER]]";
/// Lines after this marker are factual statements about the customer.
pub const CUSTOMER_CONTEXT_MARKER: &str = "[[CUSTOMER_CONTEXT]]";

const OBSERVE_INSTRUCTIONS: &str = "You draft replies for a shared customer channel. A human reviewer approves every reply before it is posted.\n\
- If the message needs no reply, output exactly [[NO_ANSWER]].\n\
- If the message only tells you facts about the customer, output [[CUSTOMER_CONTEXT]] followed by one fact per line.\n\
- Otherwise output the reply text. You may append [[CUSTOMER_CONTEXT]] and one durable customer fact per line after the reply.\n\
- Tools that change external state may be held for approval; if a tool result says so, tell the customer the action is pending.";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub dispatch_session: String,
    pub channel_label: String,
    pub sender_label: String,
    /// The framed user turn.
    pub prompt: String,
    pub context: Vec<KnowledgeHit>,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Run one dispatch and return its accumulated output text.
    ///
    /// `interceptor` must be consulted before every side-effecting tool call.
    async fn generate(
        &self,
        request: GenerationRequest,
        interceptor: Arc<dyn ToolInterceptor>,
    ) -> anyhow::Result<String>;
}

pub struct LlmAnswerGenerator {
    llm: LlmClient,
    system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    max_tool_loops: usize,
}

impl LlmAnswerGenerator {
    pub fn new(
        llm: LlmClient,
        system_prompt: String,
        tools: Vec<Arc<dyn Tool>>,
        max_tool_loops: usize,
    ) -> Self {
        Self {
            llm,
            system_prompt,
            tools,
            max_tool_loops: max_tool_loops.max(1),
        }
    }

    fn system_message(&self, request: &GenerationRequest) -> ChatMessage {
        let mut prompt = String::new();
        if !self.system_prompt.trim().is_empty() {
            prompt.push_str(self.system_prompt.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(OBSERVE_INSTRUCTIONS);
        prompt.push_str(&format!(
            "\n\nChannel: {}\nRequester: {}",
            request.channel_label, request.sender_label
        ));
        if !request.context.is_empty() {
            prompt.push_str("\n\nRelevant knowledge:\n");
            for hit in &request.context {
                prompt.push_str(&format!("[{}] {}\n", hit.channel, hit.text.trim()));
            }
        }
        ChatMessage::system(prompt)
    }

    async fn run_tool_call(
        &self,
        dispatch_session: &str,
        name: &str,
        raw_arguments: &str,
        interceptor: &dyn ToolInterceptor,
    ) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.spec().name == name) else {
            tracing::error!(tool_name = name, "tool call referenced unknown tool");
            return json!({ "error": "unknown tool" }).to_string();
        };
        let arguments: serde_json::Value = match serde_json::from_str(raw_arguments) {
            Ok(v) => v,
            Err(e) => {
                return json!({ "error": format!("invalid tool arguments: {e}") }).to_string();
            }
        };
        let effect = tool.spec().effect;
        if effect.is_side_effecting() {
            let decision = interceptor
                .intercept(ToolInvocation {
                    dispatch_session,
                    tool_name: name,
                    arguments: &arguments,
                    effect,
                })
                .await;
            if let InterceptDecision::Blocked { reason } = decision {
                return json!({ "status": "not_executed", "pending_approval": true, "reason": reason })
                    .to_string();
            }
        }

        let started = Instant::now();
        match tool.execute(arguments).await {
            Ok(out) => {
                tracing::info!(
                    tool_name = name,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "tool call executed"
                );
                out.to_string()
            }
            Err(e) => {
                tracing::warn!(tool_name = name, error = %e, "tool call failed");
                json!({ "error": format!("tool execution failed: {e}") }).to_string()
            }
        }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    #[tracing::instrument(level = "info", skip_all, fields(dispatch_session = %request.dispatch_session))]
    async fn generate(
        &self,
        request: GenerationRequest,
        interceptor: Arc<dyn ToolInterceptor>,
    ) -> anyhow::Result<String> {
        let tool_defs: Vec<ob_llm::ToolDefinition> = self
            .tools
            .iter()
            .map(|t| to_llm_tool_def(t.as_ref()))
            .collect();
        let mut messages = vec![
            self.system_message(&request),
            ChatMessage::user(request.prompt.clone()),
        ];

        for tool_loop in 1..=self.max_tool_loops {
            let started = Instant::now();
            let response = self
                .llm
                .chat(&messages, &tool_defs)
                .await
                .map_err(|e| {
                    tracing::warn!(tool_loop, transient = e.is_transient(), error = %e, "generator llm call failed");
                    anyhow::anyhow!("llm chat failed: {e}")
                })?;
            tracing::info!(
                tool_loop,
                latency_ms = started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tool_calls = response.message.tool_calls.len(),
                "generator llm call completed"
            );

            if response.message.tool_calls.is_empty() {
                return Ok(response.message.content);
            }

            let tool_calls = response.message.tool_calls.clone();
            messages.push(response.message);
            for call in tool_calls {
                let content = self
                    .run_tool_call(
                        &request.dispatch_session,
                        &call.name,
                        &call.arguments,
                        interceptor.as_ref(),
                    )
                    .await;
                messages.push(ChatMessage::tool_result(call.id, content));
            }
        }

        tracing::error!(max_tool_loops = self.max_tool_loops, "generator tool loop limit reached");
        Err(anyhow::anyhow!(
            "tool loop limit of {} reached without a final answer",
            self.max_tool_loops
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_tools::{ToolEffect, ToolSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PassThrough;

    #[async_trait]
    impl ToolInterceptor for PassThrough {
        async fn intercept(&self, _invocation: ToolInvocation<'_>) -> InterceptDecision {
            InterceptDecision::Proceed
        }
    }

    struct CountingTool {
        name: &'static str,
        effect: ToolEffect,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.to_string(),
                description: "test tool".to_string(),
                parameters_schema: json!({"type": "object"}),
                effect: self.effect,
            }
        }

        async fn execute(&self, _arguments: serde_json::Value) -> ob_tools::Result<serde_json::Value> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl ToolInterceptor for DenyAll {
        async fn intercept(&self, invocation: ToolInvocation<'_>) -> InterceptDecision {
            InterceptDecision::Blocked {
                reason: format!("{} held", invocation.tool_name),
            }
        }
    }

    fn generator(tools: Vec<Arc<dyn Tool>>) -> LlmAnswerGenerator {
        let llm = LlmClient::new("sk-test", "gpt-4o-mini").expect("client");
        LlmAnswerGenerator::new(llm, "Be concise.".to_string(), tools, 4)
    }

    fn tool(name: &'static str, effect: ToolEffect) -> Arc<CountingTool> {
        Arc::new(CountingTool {
            name,
            effect,
            runs: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn blocked_side_effects_do_not_execute() {
        let update = tool("update_ticket", ToolEffect::SideEffecting);
        let g = generator(vec![update.clone()]);
        let out = g
            .run_tool_call("observe:C1:U1", "update_ticket", r#"{"id":7}"#, &DenyAll)
            .await;
        let out: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(out["status"], "not_executed");
        assert_eq!(update.runs.load(Ordering::SeqCst), 0);

        g.run_tool_call("s", "update_ticket", r#"{"id":7}"#, &PassThrough)
            .await;
        assert_eq!(update.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_only_tools_skip_the_interceptor() {
        let lookup = tool("crm_lookup", ToolEffect::ReadOnly);
        let g = generator(vec![lookup.clone()]);
        let out = g.run_tool_call("s", "crm_lookup", "{}", &DenyAll).await;
        assert_eq!(out, r#"{"ok":true}"#);
        assert_eq!(lookup.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_become_error_results() {
        let g = generator(vec![tool("crm_lookup", ToolEffect::ReadOnly)]);
        let out = g.run_tool_call("s", "drop_tables", "{}", &PassThrough).await;
        assert!(out.contains("unknown tool"));
        let out = g.run_tool_call("s", "crm_lookup", "{not json", &PassThrough).await;
        assert!(out.contains("invalid tool arguments"));
    }

    #[test]
    fn system_message_carries_markers_and_knowledge() {
        let g = generator(vec![]);
        let msg = g.system_message(&GenerationRequest {
            dispatch_session: "observe:C1:U1".to_string(),
            channel_label: "acme-support".to_string(),
            sender_label: "Dana".to_string(),
            prompt: "seats?".to_string(),
            context: vec![KnowledgeHit {
                channel: "C2".to_string(),
                text: "Business includes 25 seats.".to_string(),
                score: 2,
            }],
        });
        assert!(msg.content.starts_with("Be concise."));
        assert!(msg.content.contains(NO_ANSWER_MARKER));
        assert!(msg.content.contains(CUSTOMER_CONTEXT_MARKER));
        assert!(msg.content.contains("[C2] Business includes 25 seats."));
        assert!(msg.content.contains("Requester: Dana"));
    }
}
