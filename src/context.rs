//! Thread context manager
//!
//! Keeps an append-only history per collaboration thread so that a job
//! handed to another agent carries the reasoning that came before it.
//! Appends to one thread are serialized by that thread's lock; threads never
//! contend with each other and readers always see a committed prefix.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, JobId, ResponseId, ThreadId};

/// One summarised step of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    /// Position within the thread, from 0
    pub seq: u64,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,
    /// Agent id, or `"human"` for escalation answers
    pub author: String,
    pub summary: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ThreadLog {
    entries: Vec<ThreadEntry>,
}

/// Per-thread ordered history
pub struct ThreadContextManager {
    threads: RwLock<HashMap<ThreadId, Arc<RwLock<ThreadLog>>>>,
    summary_chars: usize,
}

impl ThreadContextManager {
    pub fn new(summary_chars: usize) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            summary_chars,
        }
    }

    fn log(&self, thread: ThreadId) -> Arc<RwLock<ThreadLog>> {
        if let Some(log) = self.threads.read().get(&thread) {
            return Arc::clone(log);
        }
        Arc::clone(self.threads.write().entry(thread).or_default())
    }

    /// Append a step to a thread, returning the committed entry
    pub fn append(
        &self,
        thread: ThreadId,
        job_id: JobId,
        response_id: Option<ResponseId>,
        author: &str,
        text: &str,
    ) -> ThreadEntry {
        let log = self.log(thread);
        let mut log = log.write();
        let entry = ThreadEntry {
            seq: log.entries.len() as u64,
            job_id,
            response_id,
            author: author.to_string(),
            summary: summarize(text, self.summary_chars),
            at: Utc::now(),
        };
        log.entries.push(entry.clone());
        entry
    }

    /// Record an agent's response on the thread
    pub fn append_response(
        &self,
        thread: ThreadId,
        job_id: JobId,
        response_id: ResponseId,
        agent: &AgentId,
        content: &str,
    ) -> ThreadEntry {
        self.append(thread, job_id, Some(response_id), agent.as_str(), content)
    }

    /// Most recent `n` entries, oldest first
    pub fn snapshot(&self, thread: ThreadId, n: usize) -> Vec<ThreadEntry> {
        let Some(log) = self.threads.read().get(&thread).cloned() else {
            return Vec::new();
        };
        let log = log.read();
        let start = log.entries.len().saturating_sub(n);
        log.entries[start..].to_vec()
    }

    pub fn len(&self, thread: ThreadId) -> usize {
        self.threads
            .read()
            .get(&thread)
            .map(|log| log.read().entries.len())
            .unwrap_or(0)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }
}

/// Truncate on a char boundary, marking the cut
fn summarize(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_bounded_and_oldest_first() {
        let ctx = ThreadContextManager::new(100);
        let thread = ThreadId::new();
        for i in 0..5 {
            ctx.append(thread, JobId::new(), None, "a", &format!("step {i}"));
        }
        let snap = ctx.snapshot(thread, 3);
        let summaries: Vec<&str> = snap.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["step 2", "step 3", "step 4"]);
        assert_eq!(snap[0].seq, 2);
        assert_eq!(ctx.snapshot(thread, 50).len(), 5);
    }

    #[test]
    fn test_unknown_thread_is_empty() {
        let ctx = ThreadContextManager::new(100);
        assert!(ctx.snapshot(ThreadId::new(), 10).is_empty());
        assert_eq!(ctx.len(ThreadId::new()), 0);
    }

    #[test]
    fn test_threads_are_isolated() {
        let ctx = ThreadContextManager::new(100);
        let a = ThreadId::new();
        let b = ThreadId::new();
        ctx.append(a, JobId::new(), None, "x", "in a");
        ctx.append(b, JobId::new(), None, "y", "in b");
        assert_eq!(ctx.snapshot(a, 10).len(), 1);
        assert_eq!(ctx.snapshot(b, 10)[0].summary, "in b");
        assert_eq!(ctx.thread_count(), 2);
    }

    #[test]
    fn test_summary_truncates_on_char_boundary() {
        let ctx = ThreadContextManager::new(4);
        let entry = ctx.append(ThreadId::new(), JobId::new(), None, "a", "héllo wörld");
        assert_eq!(entry.summary, "héll…");
    }

    #[test]
    fn test_concurrent_appends_keep_dense_sequence() {
        let ctx = Arc::new(ThreadContextManager::new(100));
        let thread = ThreadId::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        ctx.append(thread, JobId::new(), None, "a", &format!("{i}-{j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let all = ctx.snapshot(thread, usize::MAX);
        assert_eq!(all.len(), 200);
        assert!(all.iter().enumerate().all(|(i, e)| e.seq == i as u64));
    }
}
