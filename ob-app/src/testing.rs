//! In-process fakes shared by unit tests.

use crate::clock::{Clock, IdGenerator};
use crate::generator::{AnswerGenerator, GenerationRequest};
use crate::knowledge::{ApprovedAnswer, KnowledgeHit, KnowledgeIndex, KnowledgeWriter};
use crate::prefilter::PrefilterModel;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ob_channels::{ActionCard, ChannelId, OutboundChannel, OutboundText};
use ob_tools::{InterceptDecision, ToolEffect, ToolInterceptor, ToolInvocation};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *locked(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *locked(&self.now)
    }
}

#[derive(Default)]
pub struct SequentialIds(AtomicU64);

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("ref{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct FailingModel;

#[async_trait]
impl PrefilterModel for FailingModel {
    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

pub struct FixedModel {
    reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl FixedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PrefilterModel for FixedModel {
    async fn complete(&self, _system: &str, user: &str) -> anyhow::Result<String> {
        locked(&self.prompts).push(user.to_string());
        Ok(self.reply.clone())
    }
}

pub struct SlowModel(pub std::time::Duration);

#[async_trait]
impl PrefilterModel for SlowModel {
    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("SKIP".to_string())
    }
}

#[derive(Default)]
pub struct RecordingOutbound {
    pub texts: Mutex<Vec<OutboundText>>,
    pub cards: Mutex<Vec<ActionCard>>,
    fail: AtomicBool,
}

impl RecordingOutbound {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<OutboundText> {
        locked(&self.texts).clone()
    }

    pub fn cards(&self) -> Vec<ActionCard> {
        locked(&self.cards).clone()
    }

    pub fn texts_to(&self, destination: &str) -> Vec<String> {
        self.texts()
            .into_iter()
            .filter(|t| t.destination.as_str() == destination)
            .map(|t| t.text)
            .collect()
    }
}

#[async_trait]
impl OutboundChannel for RecordingOutbound {
    fn channel_id(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, message: OutboundText) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("channel unavailable"));
        }
        locked(&self.texts).push(message);
        Ok(())
    }

    async fn send_action_card(&self, card: ActionCard) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("channel unavailable"));
        }
        locked(&self.cards).push(card);
        Ok(())
    }
}

/// One scripted dispatch: tool attempts in order, then the final text.
#[derive(Debug, Clone)]
pub struct Script {
    pub attempts: Vec<(String, serde_json::Value)>,
    pub output: Result<String, String>,
}

impl Script {
    pub fn answer(text: &str) -> Self {
        Self {
            attempts: Vec::new(),
            output: Ok(text.to_string()),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            attempts: Vec::new(),
            output: Err(message.to_string()),
        }
    }

    pub fn attempt(mut self, tool: &str, params: serde_json::Value) -> Self {
        self.attempts.push((tool.to_string(), params));
        self
    }
}

#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub executed: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedGenerator {
    pub fn push(&self, script: Script) {
        locked(&self.scripts).push_back(script);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        locked(&self.requests).clone()
    }

    pub fn executed(&self) -> Vec<(String, serde_json::Value)> {
        locked(&self.executed).clone()
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
        interceptor: Arc<dyn ToolInterceptor>,
    ) -> anyhow::Result<String> {
        let script = locked(&self.scripts).pop_front();
        let session = request.dispatch_session.clone();
        locked(&self.requests).push(request);
        let Some(script) = script else {
            return Err(anyhow::anyhow!("no scripted reply left"));
        };
        for (tool, params) in script.attempts {
            let decision = interceptor
                .intercept(ToolInvocation {
                    dispatch_session: &session,
                    tool_name: &tool,
                    arguments: &params,
                    effect: ToolEffect::SideEffecting,
                })
                .await;
            if decision == InterceptDecision::Proceed {
                locked(&self.executed).push((tool, params));
            }
        }
        script.output.map_err(|e| anyhow::anyhow!(e))
    }
}

#[derive(Default)]
pub struct MemoryKnowledge {
    pub answers: Mutex<Vec<ApprovedAnswer>>,
    pub facts: Mutex<Vec<(ChannelId, String)>>,
    pub hits: Mutex<Vec<KnowledgeHit>>,
    pub searches: Mutex<Vec<(String, bool)>>,
    fail: AtomicBool,
}

impl MemoryKnowledge {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn answers(&self) -> Vec<ApprovedAnswer> {
        locked(&self.answers).clone()
    }

    pub fn facts(&self) -> Vec<(ChannelId, String)> {
        locked(&self.facts).clone()
    }

    pub fn searches(&self) -> Vec<(String, bool)> {
        locked(&self.searches).clone()
    }
}

#[async_trait]
impl KnowledgeWriter for MemoryKnowledge {
    async fn persist_approved_answer(&self, answer: &ApprovedAnswer) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("disk full"));
        }
        locked(&self.answers).push(answer.clone());
        Ok(())
    }

    async fn append_profile_fact(&self, channel_id: &ChannelId, fact: &str) -> anyhow::Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("disk full"));
        }
        let mut facts = locked(&self.facts);
        if facts
            .iter()
            .any(|(c, f)| c == channel_id && f.eq_ignore_ascii_case(fact.trim()))
        {
            return Ok(false);
        }
        facts.push((channel_id.clone(), fact.trim().to_string()));
        Ok(true)
    }
}

#[async_trait]
impl KnowledgeIndex for MemoryKnowledge {
    async fn search(
        &self,
        query: &str,
        _channel_id: &ChannelId,
        include_other_channels: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<KnowledgeHit>> {
        locked(&self.searches).push((query.to_string(), include_other_channels));
        Ok(locked(&self.hits).iter().take(limit).cloned().collect())
    }
}

/// An observer over fakes, with channel `C1` observed and reviewed in `C-review`.
pub struct TestObserver {
    pub observer: Arc<crate::observe::Observer>,
    pub outbound: Arc<RecordingOutbound>,
    pub generator: Arc<ScriptedGenerator>,
}

pub async fn test_observer() -> TestObserver {
    use crate::commands::AllowlistAdmins;
    use crate::gate::SessionToolGate;
    use crate::observe::{ObserveSettings, ObserveTtls, Observer, ObserverDeps};
    use crate::policy::ChannelPolicyStore;
    use crate::prefilter::{PrefilterClassifier, PrefilterSettings};

    let clock = Arc::new(ManualClock::default());
    let policies = Arc::new(ChannelPolicyStore::in_memory());
    let channel = ChannelId::from("C1");
    policies
        .set_review_destination(&channel, ChannelId::from("C-review"))
        .await
        .expect("review destination");
    policies
        .set_observe_enabled(&channel, Some("acme-support"), true)
        .await
        .expect("enable");

    let outbound = Arc::new(RecordingOutbound::default());
    let generator = Arc::new(ScriptedGenerator::default());
    let knowledge = Arc::new(MemoryKnowledge::default());
    let observer = Observer::new(
        ObserverDeps {
            policies,
            prefilter: Arc::new(PrefilterClassifier::new(
                None,
                PrefilterSettings::default(),
                clock.clone(),
            )),
            gate: Arc::new(SessionToolGate::new()),
            generator: generator.clone(),
            outbound: outbound.clone(),
            knowledge_writer: knowledge.clone(),
            knowledge_index: knowledge,
            admins: Arc::new(AllowlistAdmins::default()),
        },
        ObserveSettings::default(),
        ObserveTtls::default(),
        clock,
        Arc::new(SequentialIds::default()),
    );
    TestObserver {
        observer: Arc::new(observer),
        outbound,
        generator,
    }
}
