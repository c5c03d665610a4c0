//! Secondary requests embedded in agent output
//!
//! Agents ask for help with structured blocks:
//!
//! ```text
//! [[REQUEST_TEAMMATE]]
//! agent: abacus-compute
//! request: Re-run the numbers with the Q3 data
//! task_type: analysis
//! [[/REQUEST_TEAMMATE]]
//!
//! [[NEED_HUMAN]]
//! reason: Two vendors fit equally
//! question: Which vendor should we use?
//! options: Acme | Globex
//! [[/NEED_HUMAN]]
//! ```
//!
//! Parsing is strict. Anything that looks like a block but is not exactly
//! well-formed is reported as an error instead of being guessed at.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::AgentId;

const TEAMMATE_TAG: &str = "REQUEST_TEAMMATE";
const HUMAN_TAG: &str = "NEED_HUMAN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeammateRequest {
    pub agent: AgentId,
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanRequest {
    pub reason: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SecondaryRequest {
    Teammate(TeammateRequest),
    Human(HumanRequest),
}

/// Result of scanning one piece of agent output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRequests {
    /// Well-formed blocks in document order
    pub requests: Vec<SecondaryRequest>,
    /// One diagnostic per malformed block
    pub errors: Vec<String>,
}

impl ParsedRequests {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.errors.is_empty()
    }
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*\[\[(/?)([A-Z_]+)\]\][ \t]*\r?$").expect("marker regex is valid")
    })
}

fn is_known(tag: &str) -> bool {
    tag == TEAMMATE_TAG || tag == HUMAN_TAG
}

fn looks_like_request(tag: &str) -> bool {
    tag.starts_with("REQUEST") || tag.starts_with("NEED")
}

/// Scan agent output for request blocks
pub fn parse_requests(content: &str) -> ParsedRequests {
    let mut parsed = ParsedRequests::default();
    // (tag, body start offset)
    let mut open: Option<(&str, usize)> = None;

    for caps in marker_regex().captures_iter(content) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let closing = !caps[1].is_empty();
        let tag = caps.get(2).map_or("", |m| m.as_str());

        if !is_known(tag) {
            if looks_like_request(tag) {
                parsed.errors.push(format!("unknown block [[{}{tag}]]", &caps[1]));
            }
            continue;
        }

        match (open, closing) {
            (None, false) => open = Some((tag, whole.end)),
            (None, true) => parsed.errors.push(format!("[[/{tag}]] without opening marker")),
            (Some((open_tag, _)), false) => {
                parsed
                    .errors
                    .push(format!("[[{tag}]] nested inside [[{open_tag}]]"));
                open = Some((tag, whole.end));
            }
            (Some((open_tag, start)), true) => {
                if open_tag != tag {
                    parsed
                        .errors
                        .push(format!("[[{open_tag}]] closed by [[/{tag}]]"));
                } else {
                    match parse_block(tag, &content[start..whole.start]) {
                        Ok(req) => parsed.requests.push(req),
                        Err(e) => parsed.errors.push(format!("[[{tag}]]: {e}")),
                    }
                }
                open = None;
            }
        }
    }

    if let Some((tag, _)) = open {
        parsed.errors.push(format!("[[{tag}]] is never closed"));
    }
    parsed
}

fn parse_fields(body: &str, allowed: &[&str]) -> Result<BTreeMap<String, String>, String> {
    let mut fields = BTreeMap::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("expected `key: value`, got {line:?}"))?;
        let key = key.trim();
        let value = value.trim();
        if !allowed.contains(&key) {
            return Err(format!("unknown key {key:?}"));
        }
        if value.is_empty() {
            return Err(format!("empty value for {key:?}"));
        }
        if fields.insert(key.to_string(), value.to_string()).is_some() {
            return Err(format!("duplicate key {key:?}"));
        }
    }
    Ok(fields)
}

fn parse_block(tag: &str, body: &str) -> Result<SecondaryRequest, String> {
    if tag == TEAMMATE_TAG {
        let mut fields = parse_fields(body, &["agent", "request", "task_type"])?;
        let agent = fields.remove("agent").ok_or("missing key \"agent\"")?;
        let request = fields.remove("request").ok_or("missing key \"request\"")?;
        return Ok(SecondaryRequest::Teammate(TeammateRequest {
            agent: AgentId::from(agent),
            request,
            task_type: fields.remove("task_type"),
        }));
    }

    let mut fields = parse_fields(body, &["reason", "question", "options"])?;
    let question = fields.remove("question").ok_or("missing key \"question\"")?;
    let options = match fields.remove("options") {
        Some(raw) => {
            let options: Vec<String> = raw.split('|').map(|o| o.trim().to_string()).collect();
            if options.iter().any(String::is_empty) {
                return Err("empty option".into());
            }
            options
        }
        None => Vec::new(),
    };
    Ok(SecondaryRequest::Human(HumanRequest {
        reason: fields
            .remove("reason")
            .unwrap_or_else(|| "agent requested a human decision".to_string()),
        question,
        options,
    }))
}
