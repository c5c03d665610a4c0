//! File relay transport
//!
//! Agents without a live channel exchange files through a shared, versioned
//! tree:
//!
//! ```text
//! {root}/{agent}/inbox/{job_id}              instruction written by the hive
//! {root}/{agent}/outbox/{job_id}_response    reply written by the agent
//! ```
//!
//! Resumed attempts (after an escalation is answered) append `.{attempt}`
//! to both names so that every attempt gets exactly one instruction.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::agent::InvocationRequest;
use crate::context::ThreadEntry;
use crate::error::{HiveError, Result};
use crate::job::Job;
use crate::response::{AgentReply, FollowUp, ResponseMetrics, ResponseStatus};
use crate::types::{AgentId, JobId, Usage};

/// Remote file-hosting collaborator
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Create a file. Returns `false` without writing if it already exists.
    async fn create_file(&self, path: &str, content: &str) -> Result<bool>;

    /// Read a file, `None` if it does not exist yet
    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

fn attempt_suffix(attempt: u32) -> String {
    if attempt <= 1 {
        String::new()
    } else {
        format!(".{attempt}")
    }
}

/// `{agent}/inbox/{job_id}`
pub fn instruction_path(agent: &AgentId, job: JobId, attempt: u32) -> String {
    format!("{agent}/inbox/{job}{}", attempt_suffix(attempt))
}

/// `{agent}/outbox/{job_id}_response`
pub fn response_path(agent: &AgentId, job: JobId, attempt: u32) -> String {
    format!("{agent}/outbox/{job}_response{}", attempt_suffix(attempt))
}

/// Machine-readable payload embedded in an instruction file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayInstruction {
    pub job: Job,
    pub attempt: u32,
    pub context: Vec<ThreadEntry>,
    pub respond_to: String,
}

/// Render the instruction document for an agent
pub fn render_instruction(agent: &AgentId, request: &InvocationRequest) -> Result<String> {
    let job = &request.job;
    let respond_to = response_path(agent, job.id, request.attempt);
    let payload = RelayInstruction {
        job: job.clone(),
        attempt: request.attempt,
        context: request.context.clone(),
        respond_to: respond_to.clone(),
    };
    let json = serde_json::to_string_pretty(&payload)?;

    let mut doc = String::new();
    doc.push_str("---\n");
    doc.push_str(&format!("job_id: {}\n", job.id));
    doc.push_str(&format!("from: {}\n", job.origin));
    doc.push_str(&format!("to: {agent}\n"));
    doc.push_str(&format!("priority: {}\n", job.priority));
    doc.push_str(&format!("attempt: {}\n", request.attempt));
    doc.push_str(&format!("created_at: {}\n", job.created_at.to_rfc3339()));
    doc.push_str(&format!("deadline: {}\n", job.effective_deadline().to_rfc3339()));
    doc.push_str(&format!("respond_to: {respond_to}\n"));
    doc.push_str("---\n\n");
    doc.push_str(&format!("# {}\n\n", job.task.task_type));
    doc.push_str(job.task.description.trim());
    doc.push_str("\n\n```json\n");
    doc.push_str(&json);
    doc.push_str("\n```\n");
    Ok(doc)
}

/// Extract the embedded payload from an instruction document
pub fn parse_instruction(doc: &str) -> Option<RelayInstruction> {
    let start = doc.find("```json\n")? + "```json\n".len();
    let end = start + doc[start..].find("\n```")?;
    serde_json::from_str(&doc[start..end]).ok()
}

/// Parse a reply file: JSON, or markdown with a front-matter header
pub fn parse_reply(agent: &AgentId, raw: &str) -> Result<AgentReply> {
    let malformed = |reason: String| HiveError::MalformedResponse {
        agent: agent.clone(),
        reason,
    };
    let trimmed = raw.trim_start();

    let reply = if trimmed.starts_with('{') {
        serde_json::from_str::<AgentReply>(trimmed).map_err(|e| malformed(e.to_string()))?
    } else if let Some(rest) = trimmed.strip_prefix("---") {
        parse_front_matter_reply(rest).map_err(malformed)?
    } else {
        return Err(malformed("unrecognised response format".into()));
    };

    reply.validate().map_err(malformed)?;
    Ok(reply)
}

fn parse_front_matter_reply(rest: &str) -> std::result::Result<AgentReply, String> {
    let end = rest
        .find("\n---")
        .ok_or_else(|| "unterminated front matter".to_string())?;
    let header = &rest[..end];
    let body = rest[end + "\n---".len()..].trim();

    let mut fields = BTreeMap::new();
    for line in header.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("bad header line {line:?}"))?;
        fields.insert(key.trim().to_string(), value.trim().to_string());
    }

    let status = match fields.get("status").map(String::as_str) {
        Some("completed") => ResponseStatus::Completed,
        Some("failed") => ResponseStatus::Failed,
        Some("escalated") => ResponseStatus::Escalated,
        Some(other) => return Err(format!("unknown status {other:?}")),
        None => return Err("missing status".into()),
    };

    fn num<T: std::str::FromStr>(fields: &BTreeMap<String, String>, key: &str) -> std::result::Result<T, String> {
        match fields.get(key) {
            Some(v) => v.parse().map_err(|_| format!("bad {key} {v:?}")),
            None => "0".parse().map_err(|_| format!("bad {key}")),
        }
    }

    let usage = Usage::new(
        num(&fields, "input_tokens")?,
        num(&fields, "output_tokens")?,
        num(&fields, "cost_usd")?,
    );

    let needs_human = matches!(fields.get("needs_human").map(String::as_str), Some("true"));
    let needs_agent = fields.get("needs_agent").map(|a| AgentId::from(a.as_str()));
    let follow_up = (needs_human || needs_agent.is_some()).then(|| FollowUp {
        needs_human,
        needs_agent,
        request: fields.get("request").cloned(),
    });

    Ok(AgentReply {
        status,
        content: body.to_string(),
        format: fields
            .get("format")
            .cloned()
            .unwrap_or_else(|| "markdown".to_string()),
        artifacts: Vec::new(),
        metrics: ResponseMetrics {
            usage,
            latency_ms: 0,
            model: fields.get("model").cloned(),
        },
        follow_up,
    })
}

/// Relay rooted at a local (typically git-synced) directory
pub struct FsRelay {
    root: PathBuf,
}

impl FsRelay {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(HiveError::Relay(format!("refusing relay path {path:?}")));
        }
        Ok(self.root.join(rel))
    }

    /// Create the inbox and outbox directories for an agent
    pub async fn register_agent(&self, agent: &AgentId) -> Result<PathBuf> {
        let dir = self.resolve(agent.as_str())?;
        tokio::fs::create_dir_all(dir.join("inbox")).await?;
        tokio::fs::create_dir_all(dir.join("outbox")).await?;
        info!(agent = %agent, path = %dir.display(), "Registered relay agent");
        Ok(dir)
    }

    /// Agents with a directory under the root
    pub async fn list_agents(&self) -> Result<Vec<AgentId>> {
        let mut agents = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(agents),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                agents.push(AgentId::from(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        agents.sort();
        Ok(agents)
    }
}

#[async_trait]
impl RelayStore for FsRelay {
    async fn create_file(&self, path: &str, content: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await;
        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path, "Relay file already exists");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }
}

/// In-memory relay, for tests and embedding
#[derive(Default)]
pub struct MemoryRelay {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    /// Write a file the way an agent does, replacing whatever is there
    pub fn put(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    /// Paths under `{agent}/inbox/`
    pub fn inbox(&self, agent: &AgentId) -> Vec<String> {
        let prefix = format!("{agent}/inbox/");
        self.files
            .lock()
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RelayStore for MemoryRelay {
    async fn create_file(&self, path: &str, content: &str) -> Result<bool> {
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Ok(false);
        }
        files.insert(path.to_string(), content.to_string());
        Ok(true)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.files.lock().get(path).cloned())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_conventions() {
        let agent = AgentId::from("abacus");
        let job = JobId::new();
        assert_eq!(instruction_path(&agent, job, 1), format!("abacus/inbox/{job}"));
        assert_eq!(response_path(&agent, job, 1), format!("abacus/outbox/{job}_response"));
        assert_eq!(instruction_path(&agent, job, 2), format!("abacus/inbox/{job}.2"));
        assert_eq!(response_path(&agent, job, 3), format!("abacus/outbox/{job}_response.3"));
    }

    #[test]
    fn test_instruction_embeds_full_payload() {
        let agent = AgentId::from("abacus");
        let job = Job::new("analysis", "Summarise the logs");
        let request = InvocationRequest::new(job.clone(), vec![]);
        let doc = render_instruction(&agent, &request).unwrap();

        assert!(doc.starts_with("---\n"));
        assert!(doc.contains(&format!("job_id: {}", job.id)));
        assert!(doc.contains("priority: normal"));
        assert!(doc.contains("Summarise the logs"));
        let payload = parse_instruction(&doc).unwrap();
        assert_eq!(payload.job, job);
        assert_eq!(payload.respond_to, response_path(&agent, job.id, 1));
    }

    #[test]
    fn test_parse_minimal_json_reply() {
        let reply = parse_reply(&AgentId::from("a"), r#"{"status":"completed"}"#).unwrap();
        assert_eq!(reply.status, ResponseStatus::Completed);
    }

    #[test]
    fn test_parse_front_matter_reply() {
        let raw = "---\nstatus: completed\ncost_usd: 0.25\nmodel: route-llm\n---\n\nAll done.\n";
        let reply = parse_reply(&AgentId::from("a"), raw).unwrap();
        assert_eq!(reply.content, "All done.");
        assert_eq!(reply.metrics.usage.cost_usd, 0.25);
        assert_eq!(reply.metrics.model.as_deref(), Some("route-llm"));
        assert!(reply.follow_up.is_none());
    }

    #[test]
    fn test_front_matter_follow_up() {
        let raw = "---\nstatus: escalated\nneeds_human: true\nrequest: pick a vendor\n---\nbody";
        let reply = parse_reply(&AgentId::from("a"), raw).unwrap();
        let follow_up = reply.follow_up.unwrap();
        assert!(follow_up.needs_human);
        assert_eq!(follow_up.request.as_deref(), Some("pick a vendor"));
    }

    #[test]
    fn test_malformed_replies() {
        let agent = AgentId::from("a");
        for raw in [
            "PENDING: No response found yet.",
            r#"{"content":"no status"}"#,
            "---\nstatus: maybe\n---\n",
            "---\nstatus: completed\n",
            "---\nstatus: completed\ncost_usd: lots\n---\n",
        ] {
            let err = parse_reply(&agent, raw).unwrap_err();
            assert!(matches!(err, HiveError::MalformedResponse { .. }), "{raw}");
        }
    }

    #[tokio::test]
    async fn test_memory_relay_create_once() {
        let relay = MemoryRelay::new();
        assert!(relay.create_file("a/inbox/1", "first").await.unwrap());
        assert!(!relay.create_file("a/inbox/1", "second").await.unwrap());
        assert_eq!(relay.read_file("a/inbox/1").await.unwrap().as_deref(), Some("first"));
        assert!(relay.read_file("a/outbox/1_response").await.unwrap().is_none());
        assert!(relay.exists("a/inbox/1").await.unwrap());
        assert!(!relay.exists("a/outbox/1_response").await.unwrap());
        assert_eq!(relay.inbox(&AgentId::from("a")).len(), 1);

        relay.put("a/outbox/1_response", "partial");
        relay.put("a/outbox/1_response", "whole");
        assert_eq!(relay.get("a/outbox/1_response").as_deref(), Some("whole"));
    }

    #[tokio::test]
    async fn test_fs_relay_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let relay = FsRelay::new(dir.path());
        let agent = AgentId::from("abacus");
        relay.register_agent(&agent).await.unwrap();

        assert!(relay.create_file("abacus/inbox/j1", "task").await.unwrap());
        assert!(!relay.create_file("abacus/inbox/j1", "again").await.unwrap());
        assert_eq!(
            relay.read_file("abacus/inbox/j1").await.unwrap().as_deref(),
            Some("task")
        );
        assert!(relay.read_file("abacus/outbox/j1_response").await.unwrap().is_none());
        assert!(relay.exists("abacus/inbox/j1").await.unwrap());
        assert!(!relay.exists("abacus/outbox/j1_response").await.unwrap());
        assert_eq!(relay.list_agents().await.unwrap(), vec![agent]);
    }

    #[tokio::test]
    async fn test_fs_relay_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let relay = FsRelay::new(dir.path());
        assert!(relay.create_file("../escape", "x").await.is_err());
        assert!(relay.read_file("/etc/passwd").await.is_err());
    }
}
