use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attribute written onto interactive elements of a snapshot.
pub const AGENT_ID_ATTR: &str = "agent-id";

/// Identifier of an interactive element inside ONE snapshot.
///
/// Ids are reassigned from zero on every snapshot, so an id is meaningless
/// once the page has been captured again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub usize);

impl AgentId {
    /// CSS selector matching the element carrying this id.
    pub fn selector(&self) -> String {
        format!("[{AGENT_ID_ATTR}=\"{self}\"]")
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("agent-")
            .ok_or_else(|| format!("'{s}' is not an agent id"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{s}' is not an agent id"));
        }
        digits
            .parse()
            .map(AgentId)
            .map_err(|_| format!("'{s}' is not an agent id"))
    }
}

/// Something the executor wants to act on in the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A raw CSS selector chosen by the policy.
    Selector(String),
    /// An element from the most recent snapshot.
    Agent(AgentId),
}

impl Target {
    pub fn css(&self) -> String {
        match self {
            Target::Selector(selector) => selector.clone(),
            Target::Agent(id) => id.selector(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(selector) => write!(f, "{selector}"),
            Target::Agent(id) => write!(f, "{id}"),
        }
    }
}

/// A message in the conversation sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub const SCROLL_MAX_CYCLES: usize = 10;
pub const FORM_MAX_CYCLES: usize = 15;
pub const PAGE_ANALYSIS_MAX_CYCLES: usize = 1;

pub const SCROLL_TEXT_MAX_CHARS: usize = 4000;
pub const FORM_MARKUP_MAX_CHARS: usize = 6000;

/// Marker for a job card on the search results page.
pub const JOB_CARD_SELECTOR: &str = "div[data-job-id]";
pub const EASY_APPLY_MODAL_SELECTOR: &str = "div.jobs-easy-apply-modal";
pub const JOB_DESCRIPTION_SELECTOR: &str = "div.jobs-description-content";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_parses_canonical_form() {
        assert_eq!("agent-12".parse::<AgentId>(), Ok(AgentId(12)));
        assert_eq!(AgentId(3).to_string(), "agent-3");
    }

    #[test]
    fn agent_id_rejects_other_shapes() {
        for bad in ["agent-", "agent-x", "agent-3.", "Agent-3", "3", "<agent-id>", "agent--1"] {
            assert!(bad.parse::<AgentId>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn agent_target_selector() {
        assert_eq!(Target::Agent(AgentId(5)).css(), "[agent-id=\"agent-5\"]");
        assert_eq!(Target::Selector("button.more".into()).css(), "button.more");
    }
}
