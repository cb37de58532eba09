//! Approved-answer and customer-profile knowledge.
//!
//! `FileKnowledgeStore` keeps one directory per channel with `qa.md`
//! (approved Q/A blocks) and `profile.md` (one `- fact` per line).
//! Directory names escape every byte outside `[A-Za-z0-9-]` as `_XX`, so
//! distinct channel ids never share a directory.

use crate::clock::Clock;
use anyhow::Result;
use async_trait::async_trait;
use ob_channels::{ChannelId, SenderId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const QA_FILE: &str = "qa.md";
const PROFILE_FILE: &str = "profile.md";
const QA_HEADING: &str = "## Q: ";
const MIN_KEYWORD_LEN: usize = 3;
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "how", "what", "does", "with", "can", "you", "our", "this",
    "that", "have", "has", "any", "from", "was", "will", "there", "about", "much", "many",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedAnswer {
    pub channel_id: ChannelId,
    pub channel_name: Option<String>,
    pub sender_id: SenderId,
    pub question: String,
    pub answer: String,
}

#[async_trait]
pub trait KnowledgeWriter: Send + Sync {
    async fn persist_approved_answer(&self, answer: &ApprovedAnswer) -> Result<()>;

    /// Returns `false` when an equivalent fact is already recorded.
    async fn append_profile_fact(&self, channel_id: &ChannelId, fact: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeHit {
    /// Channel id the hit was recorded under.
    pub channel: String,
    pub text: String,
    pub score: usize,
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Ranked hits for `query`. Other channels are searched only when
    /// `include_other_channels` is set, and never include `channel_id` itself.
    async fn search(
        &self,
        query: &str,
        channel_id: &ChannelId,
        include_other_channels: bool,
        limit: usize,
    ) -> Result<Vec<KnowledgeHit>>;
}

pub struct FileKnowledgeStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileKnowledgeStore {
    pub fn new(root: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            clock,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel_dir_name(channel))
    }

    async fn read_optional(path: &Path) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(anyhow::anyhow!("read {}: {e}", path.display())),
        }
    }

    async fn append(path: &Path, text: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::anyhow!("create knowledge dir {}: {e}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| anyhow::anyhow!("open {}: {e}", path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("append {}: {e}", path.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn channel_documents(&self, channel: &str) -> Result<Vec<String>> {
        let dir = self.channel_dir(channel);
        let mut docs = split_qa_blocks(&Self::read_optional(&dir.join(QA_FILE)).await?);
        docs.extend(
            Self::read_optional(&dir.join(PROFILE_FILE))
                .await?
                .lines()
                .filter_map(|line| line.strip_prefix("- "))
                .map(|fact| format!("Customer profile: {fact}")),
        );
        Ok(docs)
    }

    async fn list_channels(&self) -> Result<Vec<String>> {
        let mut channels = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(channels),
            Err(e) => return Err(anyhow::anyhow!("list {}: {e}", self.root.display())),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match channel_from_dir_name(&name) {
                Some(channel) => channels.push(channel),
                None => tracing::debug!(dir = %name, "skipping foreign knowledge directory"),
            }
        }
        channels.sort();
        Ok(channels)
    }
}

#[async_trait]
impl KnowledgeWriter for FileKnowledgeStore {
    #[tracing::instrument(level = "info", skip_all, fields(channel_id = %answer.channel_id))]
    async fn persist_approved_answer(&self, answer: &ApprovedAnswer) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.channel_dir(&answer.channel_id).join(QA_FILE);
        let existing = Self::read_optional(&path).await?;
        let question = single_line(&answer.question);
        let already = split_qa_blocks(&existing).iter().any(|block| {
            block.starts_with(&format!("{QA_HEADING}{question}\n"))
                && normalize(block).ends_with(&normalize(&answer.answer))
        });
        if already {
            tracing::debug!("approved answer already recorded");
            return Ok(());
        }
        let block = format!(
            "{QA_HEADING}{question}\n- channel: {}\n- asked_by: {}\n- approved_at: {}\n\n{}\n\n",
            answer
                .channel_name
                .as_deref()
                .unwrap_or(answer.channel_id.as_str()),
            answer.sender_id,
            self.clock.now().to_rfc3339(),
            answer.answer.trim()
        );
        Self::append(&path, &block).await?;
        tracing::info!(path = %path.display(), "approved answer persisted");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(channel_id = %channel_id))]
    async fn append_profile_fact(&self, channel_id: &ChannelId, fact: &str) -> Result<bool> {
        let fact = single_line(fact);
        let fact = fact.trim_start_matches(['-', '*', ' ']).trim();
        if fact.is_empty() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        let path = self.channel_dir(channel_id).join(PROFILE_FILE);
        let existing = Self::read_optional(&path).await?;
        let wanted = normalize(fact);
        if existing
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .any(|known| normalize(known) == wanted)
        {
            tracing::debug!("profile fact already recorded");
            return Ok(false);
        }
        Self::append(&path, &format!("- {fact}\n")).await?;
        tracing::info!(path = %path.display(), "profile fact appended");
        Ok(true)
    }
}

#[async_trait]
impl KnowledgeIndex for FileKnowledgeStore {
    async fn search(
        &self,
        query: &str,
        channel_id: &ChannelId,
        include_other_channels: bool,
        limit: usize,
    ) -> Result<Vec<KnowledgeHit>> {
        let keywords = keywords(query);
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let own = channel_id.as_str().to_string();
        let mut channels = vec![own.clone()];
        if include_other_channels {
            channels.extend(
                self.list_channels()
                    .await?
                    .into_iter()
                    .filter(|c| *c != own),
            );
        }

        let mut hits = Vec::new();
        for channel in channels {
            for doc in self.channel_documents(&channel).await? {
                let score = score(&keywords, &doc);
                if score > 0 {
                    hits.push(KnowledgeHit {
                        channel: channel.clone(),
                        text: doc,
                        score,
                    });
                }
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| (a.channel != own).cmp(&(b.channel != own)))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

fn channel_dir_name(channel: &str) -> String {
    if channel.is_empty() {
        return "_".to_string();
    }
    let mut name = String::with_capacity(channel.len());
    for byte in channel.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{byte:02X}"));
        }
    }
    name
}

/// Inverse of `channel_dir_name`; `None` for names it could not have produced.
fn channel_from_dir_name(name: &str) -> Option<String> {
    if name == "_" {
        return Some(String::new());
    }
    let mut bytes = Vec::with_capacity(name.len());
    let mut rest = name.as_bytes();
    while let Some((&first, tail)) = rest.split_first() {
        if first == b'_' {
            let hex = tail.get(..2)?;
            if !hex.iter().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b)) {
                return None;
            }
            bytes.push(u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?);
            rest = &tail[2..];
        } else if first.is_ascii_alphanumeric() || first == b'-' {
            bytes.push(first);
            rest = tail;
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

fn split_qa_blocks(contents: &str) -> Vec<String> {
    contents
        .split(QA_HEADING)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| format!("{QA_HEADING}{block}\n"))
        .collect()
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize(text: &str) -> String {
    single_line(text).to_lowercase()
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn score(keywords: &HashSet<String>, doc: &str) -> usize {
    let doc_words = self::keywords(doc);
    keywords.iter().filter(|k| doc_words.contains(*k)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use uuid::Uuid;

    fn store(name: &str) -> (FileKnowledgeStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("observer-knowledge-{name}-{}", Uuid::new_v4()));
        (
            FileKnowledgeStore::new(root.clone(), Arc::new(ManualClock::default())),
            root,
        )
    }

    fn answer(channel: &str, question: &str, text: &str) -> ApprovedAnswer {
        ApprovedAnswer {
            channel_id: ChannelId::from(channel),
            channel_name: None,
            sender_id: SenderId::from("U1"),
            question: question.to_string(),
            answer: text.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_profile_facts_are_suppressed() {
        let (store, root) = store("facts");
        let channel = ChannelId::from("C1");
        assert!(store.append_profile_fact(&channel, "Uses SSO via Okta").await.expect("append"));
        assert!(!store.append_profile_fact(&channel, "- uses  SSO via okta").await.expect("append"));

        let profile = std::fs::read_to_string(root.join("C1").join(PROFILE_FILE)).expect("read");
        assert_eq!(profile, "- Uses SSO via Okta\n");
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn approved_answers_append_once() {
        let (store, root) = store("qa");
        let a = answer("C1", "How many seats does the Pro plan include?", "Pro plan includes up to 9 seats.");
        store.persist_approved_answer(&a).await.expect("persist");
        store.persist_approved_answer(&a).await.expect("persist again");

        let qa = std::fs::read_to_string(root.join("C1").join(QA_FILE)).expect("read");
        assert_eq!(qa.matches(QA_HEADING).count(), 1);
        assert!(qa.contains("Pro plan includes up to 9 seats."));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn search_scopes_other_channels_and_excludes_self() {
        let (store, root) = store("search");
        store
            .persist_approved_answer(&answer("C1", "Pro plan seats?", "Pro plan includes up to 9 seats."))
            .await
            .expect("persist");
        store
            .persist_approved_answer(&answer("C2", "Business plan seats?", "Business includes 25 seats."))
            .await
            .expect("persist");

        let own_only = store
            .search("seats on the business plan", &ChannelId::from("C1"), false, 5)
            .await
            .expect("search");
        assert!(own_only.iter().all(|h| h.channel == "C1"));

        let widened = store
            .search("seats on the business plan", &ChannelId::from("C1"), true, 5)
            .await
            .expect("search");
        assert_eq!(widened.len(), 2);
        assert_eq!(widened[0].channel, "C2");
        assert_eq!(widened.iter().filter(|h| h.channel == "C1").count(), 1);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn channel_dirs_are_escaped_without_collisions() {
        assert_eq!(channel_dir_name("C1"), "C1");
        assert_eq!(channel_dir_name("../etc"), "_2E_2E_2Fetc");
        assert_eq!(channel_dir_name(""), "_");
        assert_ne!(channel_dir_name("a.b"), channel_dir_name("a_b"));
        for id in ["C1", "a.b", "a_b", "../etc", "", "ops#alerts", "é"] {
            assert_eq!(channel_from_dir_name(&channel_dir_name(id)).as_deref(), Some(id));
        }
        assert!(channel_from_dir_name("a.b").is_none());
        assert!(channel_from_dir_name("_4").is_none());
        assert!(channel_from_dir_name("_2e").is_none());
    }

    #[tokio::test]
    async fn lookalike_channels_keep_separate_knowledge() {
        let (store, root) = store("lookalike");
        store
            .persist_approved_answer(&answer("a.b", "Pro plan seats?", "Pro plan includes up to 9 seats."))
            .await
            .expect("persist");
        store
            .persist_approved_answer(&answer("a_b", "Business plan seats?", "Business includes 25 seats."))
            .await
            .expect("persist");

        let own_only = store
            .search("plan seats", &ChannelId::from("a.b"), false, 5)
            .await
            .expect("search");
        assert_eq!(own_only.len(), 1);
        assert_eq!(own_only[0].channel, "a.b");
        assert!(own_only[0].text.contains("9 seats"));

        let widened = store
            .search("plan seats", &ChannelId::from("a.b"), true, 5)
            .await
            .expect("search");
        let mut channels: Vec<&str> = widened.iter().map(|h| h.channel.as_str()).collect();
        channels.sort();
        assert_eq!(channels, vec!["a.b", "a_b"]);

        let _ = std::fs::remove_dir_all(root);
    }
}
