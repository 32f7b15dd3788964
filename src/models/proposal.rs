use serde::{Deserialize, Serialize};

use super::change::FieldPath;
use super::snapshot::Node;

/// Content shown when neither metadata source knows the proposal
pub const UNAVAILABLE_CONTENT: &str = "Unable to retrieve details from both sources";

/// Off-chain proposal context (title, body, where it came from)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMetadata {
    pub title: Option<String>,
    pub content: String,
    pub source_url: Option<String>,
}

impl ProposalMetadata {
    /// Sentinel for proposals whose metadata could not be fetched
    pub fn unavailable() -> Self {
        Self {
            title: None,
            content: UNAVAILABLE_CONTENT.to_string(),
            source_url: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.source_url.is_some() && self.title.is_some()
    }
}

/// One changed field of an already known proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_path: FieldPath,
    pub old_value: Option<Node>,
    pub new_value: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalUpdateKind {
    /// First sighting; metadata was fetched for it
    Added { metadata: ProposalMetadata },
    /// Known proposal whose on-chain fields moved
    Changed { changes: Vec<FieldChange> },
}

/// A new or updated proposal, ready for the chat adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrChangedProposal {
    pub proposal_id: u64,
    /// The proposal's subtree in the new snapshot, `None` if it was replaced by nothing
    pub onchain_fields: Option<Node>,
    #[serde(flatten)]
    pub kind: ProposalUpdateKind,
}

impl NewOrChangedProposal {
    pub fn is_added(&self) -> bool {
        matches!(self.kind, ProposalUpdateKind::Added { .. })
    }

    pub fn metadata(&self) -> Option<&ProposalMetadata> {
        match &self.kind {
            ProposalUpdateKind::Added { metadata } => Some(metadata),
            ProposalUpdateKind::Changed { .. } => None,
        }
    }
}

/// A thread whose title moved after metadata was re-fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleUpdate {
    pub thread_id: String,
    pub proposal_index: u64,
    pub previous_title: Option<String>,
    pub title: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_metadata() {
        let metadata = ProposalMetadata::unavailable();
        assert!(!metadata.is_available());
        assert_eq!(metadata.content, UNAVAILABLE_CONTENT);
    }

    #[test]
    fn test_added_proposal_serialization() {
        let proposal = NewOrChangedProposal {
            proposal_id: 42,
            onchain_fields: Some(Node::from(serde_json::json!({"Ongoing": {"track": 2}}))),
            kind: ProposalUpdateKind::Added {
                metadata: ProposalMetadata {
                    title: Some("Fund tooling".to_string()),
                    content: "Body".to_string(),
                    source_url: Some("https://example.org/42".to_string()),
                },
            },
        };

        let json = serde_json::to_value(&proposal).unwrap();
        assert_eq!(json["proposal_id"], 42);
        assert_eq!(json["kind"], "added");
        assert_eq!(json["metadata"]["title"], "Fund tooling");
        assert_eq!(json["onchain_fields"]["Ongoing"]["track"], 2);
    }
}
