//! Actionable-vs-casual classifier with reviewer-labeled few-shot examples.
//!
//! `classify` never fails: errors, timeouts and missing credentials all
//! resolve to `Respond`.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const CLASSIFIER_SYSTEM_PROMPT: &str = "You triage messages posted in a shared customer channel. \
Reply RESPOND if the message asks a question or requests something a support assistant should answer or act on. \
Reply SKIP for greetings, thanks, small talk, announcements and messages between humans that need no assistant input. \
Reply with exactly one word: RESPOND or SKIP.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Respond,
    Skip,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Respond => "RESPOND",
            Self::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefilterExample {
    pub text: String,
    pub label: Verdict,
    pub recorded_at: DateTime<Utc>,
    pub channel: String,
}

#[async_trait]
pub trait PrefilterModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl PrefilterModel for ob_llm::LlmClient {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        ob_llm::LlmClient::complete(self, system, user)
            .await
            .map_err(|e| anyhow::anyhow!("prefilter llm call failed: {e}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrefilterSettings {
    pub timeout: Duration,
    pub pool_cap: usize,
    pub few_shot_limit: usize,
}

impl Default for PrefilterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            pool_cap: 50,
            few_shot_limit: 20,
        }
    }
}

pub struct PrefilterClassifier {
    model: Option<Arc<dyn PrefilterModel>>,
    settings: PrefilterSettings,
    clock: Arc<dyn Clock>,
    // Most recent first.
    examples: RwLock<VecDeque<PrefilterExample>>,
    path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
}

impl PrefilterClassifier {
    /// `model = None` means no credentials: every message is classified `Respond`.
    pub fn new(
        model: Option<Arc<dyn PrefilterModel>>,
        settings: PrefilterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            model,
            settings,
            clock,
            examples: RwLock::new(VecDeque::new()),
            path: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach a JSON file for examples. Unreadable files start an empty pool.
    pub async fn with_examples_file(mut self, path: PathBuf) -> Self {
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Vec<PrefilterExample>>(&contents) {
                Ok(mut loaded) => {
                    loaded.truncate(self.settings.pool_cap);
                    tracing::info!(path = %path.display(), examples = loaded.len(), "prefilter examples loaded");
                    self.examples = RwLock::new(loaded.into());
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "prefilter examples unreadable; starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "prefilter examples unreadable; starting empty");
            }
        }
        self.path = Some(path);
        self
    }

    #[tracing::instrument(level = "debug", skip_all, fields(text_len = text.len()))]
    pub async fn classify(&self, text: &str) -> Verdict {
        let Some(model) = self.model.as_ref() else {
            tracing::debug!("prefilter has no model configured; failing open");
            return Verdict::Respond;
        };
        let user = self.build_prompt(text);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.settings.timeout,
            model.complete(CLASSIFIER_SYSTEM_PROMPT, &user),
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(raw)) => match parse_verdict(&raw) {
                Some(verdict) => {
                    tracing::info!(verdict = verdict.as_str(), latency_ms, "prefilter classified message");
                    verdict
                }
                None => {
                    tracing::warn!(raw = %raw.trim(), latency_ms, "prefilter reply unparseable; failing open");
                    Verdict::Respond
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, latency_ms, "prefilter call failed; failing open");
                Verdict::Respond
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "prefilter timed out; failing open"
                );
                Verdict::Respond
            }
        }
    }

    /// Append a labeled example. A previous example with the same normalized
    /// text is replaced.
    pub async fn record_feedback(&self, text: &str, label: Verdict, channel: &str) {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return;
        }
        // Held across snapshot and write so files land in snapshot order.
        let _persist = self.write_lock.lock().await;
        let snapshot = {
            let mut examples = self
                .examples
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            examples.retain(|e| normalize(&e.text) != normalized);
            examples.push_front(PrefilterExample {
                text: text.trim().to_string(),
                label,
                recorded_at: self.clock.now(),
                channel: channel.to_string(),
            });
            examples.truncate(self.settings.pool_cap);
            examples.iter().cloned().collect::<Vec<_>>()
        };
        tracing::info!(label = label.as_str(), channel, pool = snapshot.len(), "prefilter example recorded");
        self.persist(snapshot).await;
    }

    pub fn examples(&self) -> Vec<PrefilterExample> {
        self.examples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn build_prompt(&self, text: &str) -> String {
        let examples = self
            .examples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut prompt = String::new();
        if !examples.is_empty() {
            prompt.push_str("Examples labeled by reviewers (most recent first):\n");
            for example in examples.iter().take(self.settings.few_shot_limit) {
                prompt.push_str(&format!(
                    "- {:?} => {}\n",
                    example.text,
                    example.label.as_str()
                ));
            }
            prompt.push('\n');
        }
        prompt.push_str("Message:\n");
        prompt.push_str(text.trim());
        prompt
    }

    /// Callers hold `write_lock`.
    async fn persist(&self, snapshot: Vec<PrefilterExample>) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let result = async {
            let body = serde_json::to_string_pretty(&snapshot)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, body).await?;
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "persist prefilter examples failed");
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_verdict(raw: &str) -> Option<Verdict> {
    let upper = raw.trim().to_ascii_uppercase();
    match (upper.contains("RESPOND"), upper.contains("SKIP")) {
        (true, false) => Some(Verdict::Respond),
        (false, true) => Some(Verdict::Skip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingModel, FixedModel, ManualClock, SlowModel};

    fn classifier(model: Option<Arc<dyn PrefilterModel>>) -> PrefilterClassifier {
        PrefilterClassifier::new(
            model,
            PrefilterSettings {
                timeout: Duration::from_millis(50),
                pool_cap: 3,
                few_shot_limit: 2,
            },
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn network_failure_fails_open() {
        let c = classifier(Some(Arc::new(FailingModel)));
        assert_eq!(c.classify("How many seats?").await, Verdict::Respond);
    }

    #[tokio::test]
    async fn missing_credentials_fail_open() {
        let c = classifier(None);
        assert_eq!(c.classify("thanks!").await, Verdict::Respond);
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        let c = classifier(Some(Arc::new(SlowModel(Duration::from_secs(5)))));
        assert_eq!(c.classify("thanks!").await, Verdict::Respond);
    }

    #[tokio::test]
    async fn skip_reply_is_honored() {
        let c = classifier(Some(Arc::new(FixedModel::new("SKIP"))));
        assert_eq!(c.classify("thanks all!").await, Verdict::Skip);
    }

    #[test]
    fn verdict_parsing_is_strict_about_ambiguity() {
        assert_eq!(parse_verdict(" respond\n"), Some(Verdict::Respond));
        assert_eq!(parse_verdict("SKIP."), Some(Verdict::Skip));
        assert_eq!(parse_verdict("RESPOND or SKIP"), None);
        assert_eq!(parse_verdict("maybe"), None);
    }

    #[tokio::test]
    async fn feedback_dedupes_caps_and_orders_most_recent_first() {
        let c = classifier(None);
        c.record_feedback("Thanks all!", Verdict::Skip, "C1").await;
        c.record_feedback("How many seats?", Verdict::Respond, "C1").await;
        c.record_feedback("  thanks   ALL! ", Verdict::Respond, "C2").await;

        let examples = c.examples();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].label, Verdict::Respond);
        assert_eq!(examples[0].channel, "C2");

        c.record_feedback("lunch?", Verdict::Skip, "C1").await;
        c.record_feedback("invoice status?", Verdict::Respond, "C1").await;
        let examples = c.examples();
        assert_eq!(examples.len(), 3);
        assert_eq!(examples[0].text, "invoice status?");
        assert!(examples.iter().all(|e| e.text != "How many seats?"));
    }

    #[tokio::test]
    async fn prompt_includes_limited_few_shot_examples() {
        let c = classifier(None);
        c.record_feedback("first", Verdict::Skip, "C1").await;
        c.record_feedback("second", Verdict::Respond, "C1").await;
        c.record_feedback("third", Verdict::Skip, "C1").await;

        let prompt = c.build_prompt("new message");
        assert!(prompt.contains("\"third\" => SKIP"));
        assert!(prompt.contains("\"second\" => RESPOND"));
        assert!(!prompt.contains("\"first\""));
        assert!(prompt.find("third") < prompt.find("second"));
        assert!(prompt.ends_with("new message"));
    }

    #[tokio::test]
    async fn classify_runs_concurrently_with_feedback() {
        let c = Arc::new(classifier(Some(Arc::new(FixedModel::new("RESPOND")))));
        let mut handles = Vec::new();
        for i in 0..8 {
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                c.record_feedback(&format!("msg {i}"), Verdict::Skip, "C1").await;
                c.classify("question?").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("task"), Verdict::Respond);
        }
        assert_eq!(c.examples().len(), 3);
    }

    #[tokio::test]
    async fn examples_persist_and_reload() {
        let path = std::env::temp_dir()
            .join(format!("observer-prefilter-{}", uuid::Uuid::new_v4()))
            .join("examples.json");
        let c = classifier(None).with_examples_file(path.clone()).await;
        c.record_feedback("thanks!", Verdict::Skip, "C1").await;

        let reloaded = classifier(None).with_examples_file(path.clone()).await;
        assert_eq!(reloaded.examples().len(), 1);
        assert_eq!(reloaded.examples()[0].label, Verdict::Skip);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_feedback_leaves_file_matching_memory() {
        let path = std::env::temp_dir()
            .join(format!("observer-prefilter-race-{}", uuid::Uuid::new_v4()))
            .join("examples.json");
        let c = Arc::new(classifier(None).with_examples_file(path.clone()).await);

        let mut writers = tokio::task::JoinSet::new();
        for i in 0..16 {
            let c = c.clone();
            writers.spawn(async move {
                c.record_feedback(&format!("message {i}"), Verdict::Skip, "C1")
                    .await;
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined.expect("writer task");
        }

        let on_disk: Vec<PrefilterExample> =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("examples file"))
                .expect("valid json");
        let texts = |examples: &[PrefilterExample]| {
            examples.iter().map(|e| e.text.clone()).collect::<Vec<_>>()
        };
        assert_eq!(texts(&on_disk), texts(&c.examples()));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
