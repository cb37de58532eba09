//! Observe-mode orchestration.
//!
//! Inbound messages on observed channels are drafted under the tool gate and
//! routed to a reviewer as cards. Reviewer clicks resolve the ephemeral
//! records those cards reference. Nothing here returns errors to the caller:
//! failures are logged, and reviewers who are waiting on an action get a
//! short notice.

use crate::actions::ButtonAction;
use crate::clock::{Clock, IdGenerator};
use crate::commands::{self, AdminPredicate};
use crate::ephemeral::EphemeralStore;
use crate::error::ObserveError;
use crate::gate::{BlockedCall, DispatchContext, SessionToolGate};
use crate::generator::{
    AnswerGenerator, CUSTOMER_CONTEXT_MARKER, GenerationRequest, NO_ANSWER_MARKER,
};
use crate::knowledge::{ApprovedAnswer, KnowledgeHit, KnowledgeIndex, KnowledgeWriter};
use crate::policy::{ChannelPolicy, ChannelPolicyStore, ObserveMode};
use crate::prefilter::{PrefilterClassifier, Verdict};
use crate::records::{
    BlockedToolCallSet, FilteredMessage, Origin, PendingApproval, TrainingSession,
};
use crate::redact::redact;
use ob_channels::{
    ActionCard, Button, ButtonClick, ButtonStyle, ChannelId, InboundMessage, OutboundChannel,
    OutboundText,
};
use ob_tools::ToolInterceptor;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct ObserveSettings {
    /// Posted to the origin channel when a draft goes to review.
    pub acknowledgment: String,
    /// Test identities that skip the prefilter and the acknowledgment.
    pub roleplay_senders: HashSet<String>,
    pub knowledge_limit: usize,
    pub prefilter_enabled: bool,
}

impl Default for ObserveSettings {
    fn default() -> Self {
        Self {
            acknowledgment: "Thanks, we're looking into this and will follow up shortly.".to_string(),
            roleplay_senders: HashSet::new(),
            knowledge_limit: 5,
            prefilter_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ObserveTtls {
    pub approval: chrono::Duration,
    pub blocked: chrono::Duration,
    pub filtered: chrono::Duration,
    pub training: chrono::Duration,
}

impl Default for ObserveTtls {
    fn default() -> Self {
        Self {
            approval: chrono::Duration::minutes(120),
            blocked: chrono::Duration::minutes(120),
            filtered: chrono::Duration::minutes(60),
            training: chrono::Duration::minutes(30),
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct ObserverDeps {
    pub policies: Arc<ChannelPolicyStore>,
    pub prefilter: Arc<PrefilterClassifier>,
    pub gate: Arc<SessionToolGate>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub outbound: Arc<dyn OutboundChannel>,
    pub knowledge_writer: Arc<dyn KnowledgeWriter>,
    pub knowledge_index: Arc<dyn KnowledgeIndex>,
    pub admins: Arc<dyn AdminPredicate>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreSizes {
    pub approvals: usize,
    pub training_sessions: usize,
    pub blocked_tool_sets: usize,
    pub filtered_messages: usize,
    pub channel_policies: usize,
}

pub struct Observer {
    policies: Arc<ChannelPolicyStore>,
    prefilter: Arc<PrefilterClassifier>,
    gate: Arc<SessionToolGate>,
    generator: Arc<dyn AnswerGenerator>,
    outbound: Arc<dyn OutboundChannel>,
    knowledge_writer: Arc<dyn KnowledgeWriter>,
    knowledge_index: Arc<dyn KnowledgeIndex>,
    admins: Arc<dyn AdminPredicate>,
    approvals: EphemeralStore<PendingApproval>,
    training: EphemeralStore<TrainingSession>,
    blocked: EphemeralStore<BlockedToolCallSet>,
    filtered: EphemeralStore<FilteredMessage>,
    settings: ObserveSettings,
    background: TaskTracker,
}

/// Generated text after marker parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Draft {
    NoAnswer,
    ProfileOnly(Vec<String>),
    Answer { answer: String, facts: Vec<String> },
}

struct Dispatch {
    output: anyhow::Result<String>,
    blocked: Vec<BlockedCall>,
}

/// What a finished dispatch turned into.
enum Routed {
    ToolCard,
    AnswerCard,
    ProfileOnly,
    NoAnswer,
}

impl Observer {
    pub fn new(
        deps: ObserverDeps,
        settings: ObserveSettings,
        ttls: ObserveTtls,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            policies: deps.policies,
            prefilter: deps.prefilter,
            gate: deps.gate,
            generator: deps.generator,
            outbound: deps.outbound,
            knowledge_writer: deps.knowledge_writer,
            knowledge_index: deps.knowledge_index,
            admins: deps.admins,
            approvals: EphemeralStore::new("approval", ttls.approval, clock.clone(), ids.clone()),
            training: EphemeralStore::new(
                "training session",
                ttls.training,
                clock.clone(),
                ids.clone(),
            ),
            blocked: EphemeralStore::new("action approval", ttls.blocked, clock.clone(), ids.clone()),
            filtered: EphemeralStore::new("filtered message", ttls.filtered, clock, ids),
            settings,
            background: TaskTracker::new(),
        }
    }

    pub fn store_sizes(&self) -> StoreSizes {
        StoreSizes {
            approvals: self.approvals.len(),
            training_sessions: self.training.len(),
            blocked_tool_sets: self.blocked.len(),
            filtered_messages: self.filtered.len(),
            channel_policies: self.policies.len(),
        }
    }

    /// Wait for best-effort knowledge writes that are still running.
    pub async fn flush_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(channel_id = %inbound.channel_id, sender_id = %inbound.sender_id)
    )]
    pub async fn handle_inbound(&self, inbound: InboundMessage) {
        if let Some(session) = self.training.consume(inbound.sender_id.as_str()) {
            tracing::info!(ref_id = %session.ref_id, "training feedback received");
            if let Err(e) = self.apply_training_feedback(session, &inbound).await {
                tracing::warn!(error = %e, "training feedback failed");
                self.reply_to(&inbound, e.reviewer_notice()).await;
            }
            return;
        }

        if let Some(reply) =
            commands::handle_command(&self.policies, self.admins.as_ref(), &inbound).await
        {
            self.reply_to(&inbound, reply).await;
            return;
        }

        let policy = self.policies.get(&inbound.channel_id);
        if !policy.observe_enabled {
            tracing::debug!("channel not observed; ignoring message");
            return;
        }
        let Some(review) = policy.review_destination.clone() else {
            tracing::warn!("observe enabled without review destination; ignoring message");
            return;
        };
        if let Err(e) = self.observe(inbound, &policy, review, false).await {
            tracing::error!(error = %e, "observe pipeline failed");
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %click.user_id))]
    pub async fn handle_action(&self, click: ButtonClick) {
        let action = match ButtonAction::parse(&click.value) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unrecognized button value");
                return;
            }
        };
        tracing::info!(action = action.tag(), ref_id = action.ref_id(), "reviewer action");
        let result = match &action {
            ButtonAction::ApproveAnswer(id) => self.approve_answer(id, &click).await,
            ButtonAction::RejectAnswer(id) => self.reject_answer(id, &click).await,
            ButtonAction::TrainAnswer(id) => self.train_answer(id, &click).await,
            ButtonAction::ApproveTools(id) => self.approve_tools(id, &click).await,
            ButtonAction::RejectTools(id) => self.reject_tools(id, &click).await,
            ButtonAction::AllowFiltered(id) => self.allow_filtered(id, &click).await,
            ButtonAction::DismissFiltered(id) => self.dismiss_filtered(id, &click).await,
        };
        if let Err(e) = result {
            tracing::warn!(action = action.tag(), ref_id = action.ref_id(), error = %e, "reviewer action failed");
            self.notify_reviewer(&click, e.reviewer_notice()).await;
        }
    }

    async fn observe(
        &self,
        inbound: InboundMessage,
        policy: &ChannelPolicy,
        review: ChannelId,
        prefilter_bypassed: bool,
    ) -> Result<(), ObserveError> {
        let origin = Origin::from_inbound(&inbound);
        let follow_up = inbound.is_thread_reply;
        let roleplay = self
            .settings
            .roleplay_senders
            .contains(inbound.sender_id.as_str());
        let quiet = policy.is_quiet() || roleplay;

        if !prefilter_bypassed
            && !follow_up
            && !quiet
            && self.settings.prefilter_enabled
            && self.prefilter.classify(&inbound.text).await == Verdict::Skip
        {
            return self.hold_filtered(inbound, review).await;
        }
        if !follow_up && !quiet {
            self.acknowledge(&origin).await;
        }

        let session = format!("observe:{}:{}", origin.channel_id, origin.sender_id);
        let context = self
            .retrieve(&inbound.text, &origin.channel_id, policy)
            .await;
        let dispatch = self
            .dispatch(
                &session,
                &origin,
                &inbound.text,
                inbound.text.clone(),
                context,
                Vec::new(),
            )
            .await;
        self.route(dispatch, &session, &origin, &inbound.text, review, policy)
            .await
            .map(|_| ())
    }

    async fn hold_filtered(
        &self,
        message: InboundMessage,
        review: ChannelId,
    ) -> Result<(), ObserveError> {
        let card_body = format!(
            "*Channel:* {}\n*From:* {}\n*Message:*\n> {}\n\nThe prefilter classified this message as not needing a reply.",
            message.channel_label(),
            message.sender_label(),
            message.text.trim()
        );
        let ref_id = self.filtered.store(FilteredMessage {
            message,
            review_destination: review.clone(),
        });
        tracing::info!(ref_id = %ref_id, "message filtered; holding for reviewer override");
        self.send_card(ActionCard {
            destination: review,
            heading: "Message Filtered".to_string(),
            body_text: card_body,
            buttons: vec![
                Button::new(
                    "Allow",
                    ButtonAction::AllowFiltered(ref_id.clone()).encode(),
                    ButtonStyle::Primary,
                ),
                Button::new(
                    "Dismiss",
                    ButtonAction::DismissFiltered(ref_id).encode(),
                    ButtonStyle::Default,
                ),
            ],
            is_channel: true,
        })
        .await
    }

    async fn acknowledge(&self, origin: &Origin) {
        let ack = self.settings.acknowledgment.trim();
        if ack.is_empty() {
            return;
        }
        let message = OutboundText::to_channel(origin.channel_id.clone(), ack)
            .in_thread(origin.thread_id.clone());
        if let Err(e) = self.outbound.send_text(message).await {
            tracing::warn!(error = %e, "acknowledgment delivery failed");
        }
    }

    /// Knowledge for the current channel, widened to other channels when the
    /// policy shares across channels. Failures degrade to no context.
    async fn retrieve(
        &self,
        query: &str,
        channel_id: &ChannelId,
        policy: &ChannelPolicy,
    ) -> Vec<KnowledgeHit> {
        let hits = match self
            .knowledge_index
            .search(
                query,
                channel_id,
                policy.cross_channel_enabled,
                self.settings.knowledge_limit,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "knowledge retrieval failed; continuing without context");
                return Vec::new();
            }
        };
        if !policy.redacts() {
            return hits;
        }
        hits.into_iter()
            .map(|mut hit| {
                if hit.channel != channel_id.as_str() {
                    hit.text = redact(&hit.text).text;
                }
                hit
            })
            .collect()
    }

    /// One supervised generation. The gate is always back to idle on return.
    async fn dispatch(
        &self,
        session: &str,
        origin: &Origin,
        question: &str,
        prompt: String,
        context: Vec<KnowledgeHit>,
        preapproved: Vec<String>,
    ) -> Dispatch {
        let lease = self
            .gate
            .supervise(
                session,
                DispatchContext {
                    channel_id: origin.channel_id.clone(),
                    sender_id: origin.sender_id.clone(),
                    question: question.to_string(),
                },
                preapproved,
            )
            .await;
        let started = Instant::now();
        let interceptor: Arc<dyn ToolInterceptor> = self.gate.clone();
        let output = self
            .generator
            .generate(
                GenerationRequest {
                    dispatch_session: session.to_string(),
                    channel_label: origin.channel_label().to_string(),
                    sender_label: origin.sender_label().to_string(),
                    prompt,
                    context,
                },
                interceptor,
            )
            .await;
        let blocked = lease.finish();
        tracing::info!(
            dispatch_session = session,
            latency_ms = started.elapsed().as_millis() as u64,
            blocked = blocked.len(),
            ok = output.is_ok(),
            "dispatch completed"
        );
        Dispatch { output, blocked }
    }

    /// Turn a finished dispatch into a tool card, an answer card, profile facts, or nothing.
    async fn route(
        &self,
        dispatch: Dispatch,
        session: &str,
        origin: &Origin,
        question: &str,
        review: ChannelId,
        policy: &ChannelPolicy,
    ) -> Result<Routed, ObserveError> {
        let silent = policy.is_quiet();
        if !dispatch.blocked.is_empty() {
            let set = BlockedToolCallSet {
                origin: origin.clone(),
                request: question.to_string(),
                review_destination: review,
                calls: dispatch.blocked,
                silent,
            };
            let ref_id = self.blocked.store(set.clone());
            tracing::info!(ref_id = %ref_id, dispatch_session = session, "tool calls held for approval");
            self.send_card(tool_card(&ref_id, &set)).await?;
            return Ok(Routed::ToolCard);
        }

        let text = dispatch
            .output
            .map_err(|e| ObserveError::Generation(e.to_string()))?;
        match parse_draft(&text) {
            Draft::NoAnswer => {
                tracing::info!("no answer warranted");
                Ok(Routed::NoAnswer)
            }
            Draft::ProfileOnly(facts) => {
                tracing::info!(facts = facts.len(), "customer context recorded");
                self.spawn_profile_facts(origin.channel_id.clone(), facts);
                Ok(Routed::ProfileOnly)
            }
            Draft::Answer { answer, facts } => {
                let answer = self.scrub(answer, policy);
                let pending = PendingApproval {
                    origin: origin.clone(),
                    question: question.to_string(),
                    answer,
                    profile_facts: facts,
                    review_destination: review,
                    silent,
                    training: policy.mode == ObserveMode::Training,
                };
                let ref_id = self.approvals.store(pending.clone());
                tracing::info!(ref_id = %ref_id, "answer held for approval");
                self.send_card(answer_card(&ref_id, &pending)).await?;
                Ok(Routed::AnswerCard)
            }
        }
    }

    fn scrub(&self, text: String, policy: &ChannelPolicy) -> String {
        if !policy.redacts() {
            return text;
        }
        let redacted = redact(&text);
        if redacted.warning {
            tracing::warn!("redaction skipped; reviewer sees unscrubbed text");
        } else if redacted.replacements > 0 {
            tracing::info!(replacements = redacted.replacements, "draft redacted");
        }
        redacted.text
    }

    async fn approve_answer(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let pending = self.approvals.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.approvals.name(),
        })?;
        if pending.training {
            self.prefilter
                .record_feedback(
                    &pending.question,
                    Verdict::Respond,
                    pending.origin.channel_id.as_str(),
                )
                .await;
        }
        self.spawn_persist(
            ApprovedAnswer {
                channel_id: pending.origin.channel_id.clone(),
                channel_name: pending.origin.channel_name.clone(),
                sender_id: pending.origin.sender_id.clone(),
                question: pending.question.clone(),
                answer: pending.answer.clone(),
            },
            pending.profile_facts.clone(),
        );
        let label = pending.origin.channel_label();
        if pending.silent {
            self.notify_reviewer(click, format!("Approved. Recorded without posting to {label}."))
                .await;
            return Ok(());
        }
        self.deliver(&pending.origin, &pending.answer).await?;
        self.notify_reviewer(click, format!("Approved and posted to {label}."))
            .await;
        Ok(())
    }

    async fn reject_answer(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let pending = self.approvals.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.approvals.name(),
        })?;
        if pending.training {
            self.prefilter
                .record_feedback(
                    &pending.question,
                    Verdict::Skip,
                    pending.origin.channel_id.as_str(),
                )
                .await;
        }
        self.notify_reviewer(
            click,
            format!(
                "Discarded. Nothing was posted to {}.",
                pending.origin.channel_label()
            ),
        )
        .await;
        Ok(())
    }

    async fn train_answer(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let pending = self.approvals.peek(ref_id).ok_or(ObserveError::Expired {
            what: self.approvals.name(),
        })?;
        let prompt = format!(
            "Training the answer for {}. Reply with your feedback; your next message will be used to revise it.\n\n*Current answer:*\n{}",
            pending.origin.channel_label(),
            pending.answer
        );
        self.training.store_at(
            click.user_id.as_str(),
            TrainingSession {
                ref_id: ref_id.to_string(),
                origin: pending.origin,
                question: pending.question,
                previous_answer: pending.answer,
                review_destination: pending.review_destination,
                silent: pending.silent,
                training: pending.training,
            },
        );
        self.notify_reviewer(click, prompt).await;
        Ok(())
    }

    async fn apply_training_feedback(
        &self,
        session: TrainingSession,
        feedback: &InboundMessage,
    ) -> Result<(), ObserveError> {
        let prompt = format!(
            "A reviewer corrected your draft reply. Treat the correction as authoritative and write the revised reply to the original question.\n\n\
Original question:\n{}\n\nPrevious draft:\n{}\n\nReviewer correction:\n{}",
            session.question.trim(),
            session.previous_answer.trim(),
            feedback.text.trim()
        );
        let policy = self.policies.get(&session.origin.channel_id);
        let dispatch_session = format!("training:{}", feedback.sender_id);
        let context = self
            .retrieve(&session.question, &session.origin.channel_id, &policy)
            .await;
        let dispatch = self
            .dispatch(
                &dispatch_session,
                &session.origin,
                &session.question,
                prompt,
                context,
                Vec::new(),
            )
            .await;
        let routed = self
            .route(
                dispatch,
                &dispatch_session,
                &session.origin,
                &session.question,
                session.review_destination.clone(),
                &policy,
            )
            .await?;
        let ack = match routed {
            Routed::AnswerCard => "Thanks. A revised answer was sent for review.",
            Routed::ToolCard => "Thanks. The revision needs action approval; a card was sent for review.",
            Routed::ProfileOnly | Routed::NoAnswer => {
                "Thanks. The revision produced no answer to review."
            }
        };
        self.reply_to(feedback, ack.to_string()).await;
        Ok(())
    }

    async fn approve_tools(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let set = self.blocked.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.blocked.name(),
        })?;
        let names = set.tool_names();
        let session = format!("approved:{ref_id}");
        let calls: Vec<String> = set
            .calls
            .iter()
            .map(|call| format!("- {} {}", call.tool_name, call.params))
            .collect();
        let prompt = format!(
            "A human reviewer approved these actions:\n{}\nExecute them now with exactly these parameters, then report the outcome to the requester.\n\nOriginal request:\n{}",
            calls.join("\n"),
            set.request.trim()
        );
        let policy = self.policies.get(&set.origin.channel_id);
        let context = self
            .retrieve(&set.request, &set.origin.channel_id, &policy)
            .await;
        let dispatch = self
            .dispatch(
                &session,
                &set.origin,
                &set.request,
                prompt,
                context,
                names.clone(),
            )
            .await;

        if !dispatch.blocked.is_empty() {
            self.route(
                dispatch,
                &session,
                &set.origin,
                &set.request,
                set.review_destination.clone(),
                &policy,
            )
            .await?;
            self.notify_reviewer(
                click,
                "Approved actions ran, but further actions need approval; a new card was sent."
                    .to_string(),
            )
            .await;
            return Ok(());
        }

        let text = dispatch
            .output
            .map_err(|e| ObserveError::Generation(format!("tool execution failed: {e}")))?;
        let (result, facts) = match parse_draft(&text) {
            Draft::Answer { answer, facts } => (self.scrub(answer, &policy), facts),
            Draft::ProfileOnly(facts) => (String::new(), facts),
            Draft::NoAnswer => (String::new(), Vec::new()),
        };
        let label = set.origin.channel_label();
        if !result.is_empty() {
            self.spawn_persist(
                ApprovedAnswer {
                    channel_id: set.origin.channel_id.clone(),
                    channel_name: set.origin.channel_name.clone(),
                    sender_id: set.origin.sender_id.clone(),
                    question: set.request.clone(),
                    answer: result.clone(),
                },
                facts,
            );
        } else if !facts.is_empty() {
            self.spawn_profile_facts(set.origin.channel_id.clone(), facts);
        }
        if set.silent || result.is_empty() {
            self.notify_reviewer(
                click,
                format!("Executed {}. Nothing was posted to {label}.", names.join(", ")),
            )
            .await;
            return Ok(());
        }
        self.deliver(&set.origin, &result).await?;
        self.notify_reviewer(
            click,
            format!("Executed {}. Result posted to {label}.", names.join(", ")),
        )
        .await;
        Ok(())
    }

    async fn reject_tools(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let set = self.blocked.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.blocked.name(),
        })?;
        self.notify_reviewer(
            click,
            format!(
                "Rejected {}. Nothing was executed.",
                set.tool_names().join(", ")
            ),
        )
        .await;
        Ok(())
    }

    async fn allow_filtered(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let held = self.filtered.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.filtered.name(),
        })?;
        self.prefilter
            .record_feedback(
                &held.message.text,
                Verdict::Respond,
                held.message.channel_id.as_str(),
            )
            .await;
        let policy = self.policies.get(&held.message.channel_id);
        if !policy.observe_enabled {
            self.notify_reviewer(
                click,
                format!(
                    "Observe mode is now off for {}; the message was not drafted.",
                    held.message.channel_label()
                ),
            )
            .await;
            return Ok(());
        }
        let review = policy
            .review_destination
            .clone()
            .unwrap_or(held.review_destination);
        self.notify_reviewer(click, "Allowed. Drafting an answer.".to_string())
            .await;
        self.observe(held.message, &policy, review, true).await
    }

    async fn dismiss_filtered(&self, ref_id: &str, click: &ButtonClick) -> Result<(), ObserveError> {
        let held = self.filtered.consume(ref_id).ok_or(ObserveError::Expired {
            what: self.filtered.name(),
        })?;
        self.prefilter
            .record_feedback(
                &held.message.text,
                Verdict::Skip,
                held.message.channel_id.as_str(),
            )
            .await;
        self.notify_reviewer(click, "Dismissed.".to_string()).await;
        Ok(())
    }

    async fn deliver(&self, origin: &Origin, text: &str) -> Result<(), ObserveError> {
        let message = OutboundText::to_channel(origin.channel_id.clone(), text)
            .with_mention(origin.sender_id.clone())
            .in_thread(origin.thread_id.clone());
        self.outbound
            .send_text(message)
            .await
            .map_err(|e| ObserveError::Delivery(e.to_string()))?;
        tracing::info!(channel_id = %origin.channel_id, sender_id = %origin.sender_id, "approved answer delivered");
        Ok(())
    }

    async fn send_card(&self, card: ActionCard) -> Result<(), ObserveError> {
        let destination = card.destination.clone();
        self.outbound
            .send_action_card(card)
            .await
            .map_err(|e| ObserveError::Delivery(format!("review card to {destination}: {e}")))
    }

    /// Reviewer-facing text goes where the click happened, or to a DM.
    async fn notify_reviewer(&self, click: &ButtonClick, text: String) {
        let message = match click.channel_id.clone() {
            Some(channel) => OutboundText::to_channel(channel, text),
            None => OutboundText {
                destination: ChannelId::new(click.user_id.as_str()),
                text,
                is_channel: false,
                mention: None,
                thread_id: None,
            },
        };
        if let Err(e) = self.outbound.send_text(message).await {
            tracing::warn!(error = %e, user_id = %click.user_id, "reviewer notice delivery failed");
        }
    }

    async fn reply_to(&self, inbound: &InboundMessage, text: String) {
        let message = OutboundText::to_channel(inbound.channel_id.clone(), text)
            .in_thread(inbound.thread_id.clone());
        if let Err(e) = self.outbound.send_text(message).await {
            tracing::warn!(error = %e, channel_id = %inbound.channel_id, "reply delivery failed");
        }
    }

    fn spawn_persist(&self, answer: ApprovedAnswer, facts: Vec<String>) {
        let writer = self.knowledge_writer.clone();
        self.background.spawn(async move {
            if let Err(e) = writer.persist_approved_answer(&answer).await {
                tracing::error!(channel_id = %answer.channel_id, error = %e, "persist approved answer failed");
            }
            append_facts(writer.as_ref(), &answer.channel_id, facts).await;
        });
    }

    fn spawn_profile_facts(&self, channel_id: ChannelId, facts: Vec<String>) {
        if facts.is_empty() {
            return;
        }
        let writer = self.knowledge_writer.clone();
        self.background.spawn(async move {
            append_facts(writer.as_ref(), &channel_id, facts).await;
        });
    }
}

async fn append_facts(writer: &dyn KnowledgeWriter, channel_id: &ChannelId, facts: Vec<String>) {
    for fact in facts {
        match writer.append_profile_fact(channel_id, &fact).await {
            Ok(true) => tracing::debug!(channel_id = %channel_id, "profile fact appended"),
            Ok(false) => tracing::debug!(channel_id = %channel_id, "duplicate profile fact skipped"),
            Err(e) => {
                tracing::error!(channel_id = %channel_id, error = %e, "append profile fact failed")
            }
        }
    }
}

fn tool_card(ref_id: &str, set: &BlockedToolCallSet) -> ActionCard {
    let mut body = format!(
        "*Channel:* {}\n*From:* {}\n*Request:*\n> {}\n\n*Actions awaiting approval:*\n",
        set.origin.channel_label(),
        set.origin.sender_label(),
        set.request.trim()
    );
    for call in &set.calls {
        body.push_str(&format!("• `{}` {}\n", call.tool_name, call.params));
    }
    ActionCard {
        destination: set.review_destination.clone(),
        heading: "Action Approval Required".to_string(),
        body_text: body,
        buttons: vec![
            Button::new(
                "Approve & Execute",
                ButtonAction::ApproveTools(ref_id.to_string()).encode(),
                ButtonStyle::Primary,
            ),
            Button::new(
                "Reject",
                ButtonAction::RejectTools(ref_id.to_string()).encode(),
                ButtonStyle::Danger,
            ),
        ],
        is_channel: true,
    }
}

fn answer_card(ref_id: &str, pending: &PendingApproval) -> ActionCard {
    let mut body = format!(
        "*Channel:* {}\n*From:* {}\n*Question:*\n> {}\n\n*Proposed answer:*\n{}",
        pending.origin.channel_label(),
        pending.origin.sender_label(),
        pending.question.trim(),
        pending.answer
    );
    if !pending.profile_facts.is_empty() {
        body.push_str("\n\n*Customer context to record:*\n");
        for fact in &pending.profile_facts {
            body.push_str(&format!("• {fact}\n"));
        }
    }
    if pending.silent {
        body.push_str("\n\n_Approving records this answer without posting it._");
    }
    ActionCard {
        destination: pending.review_destination.clone(),
        heading: "Approval Required".to_string(),
        body_text: body,
        buttons: vec![
            Button::new(
                "Approve",
                ButtonAction::ApproveAnswer(ref_id.to_string()).encode(),
                ButtonStyle::Primary,
            ),
            Button::new(
                "Train",
                ButtonAction::TrainAnswer(ref_id.to_string()).encode(),
                ButtonStyle::Default,
            ),
            Button::new(
                "Reject",
                ButtonAction::RejectAnswer(ref_id.to_string()).encode(),
                ButtonStyle::Danger,
            ),
        ],
        is_channel: true,
    }
}

fn parse_draft(text: &str) -> Draft {
    let text = text.trim();
    if text.is_empty() || text.starts_with(NO_ANSWER_MARKER) {
        return Draft::NoAnswer;
    }
    if let Some(rest) = text.strip_prefix(CUSTOMER_CONTEXT_MARKER) {
        let facts = fact_lines(rest);
        if facts.is_empty() {
            return Draft::NoAnswer;
        }
        return Draft::ProfileOnly(facts);
    }
    match text.split_once(CUSTOMER_CONTEXT_MARKER) {
        Some((answer, facts)) => Draft::Answer {
            answer: answer.trim().to_string(),
            facts: fact_lines(facts),
        },
        None => Draft::Answer {
            answer: text.to_string(),
            facts: Vec::new(),
        },
    }
}

fn fact_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
