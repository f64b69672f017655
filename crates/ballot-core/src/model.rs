// Participants, voter records, and proposals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a proposal in the ballot's proposal list.
pub type ProposalId = u64;

/// Description given to the placeholder proposal at id 0.
pub const GENESIS_DESCRIPTION: &str = "GENESIS";

/// Identity of a caller, as supplied by the authentication layer in front of
/// the engine (an account address, a user name, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        ParticipantId(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        ParticipantId(s)
    }
}

/// A voter's registry entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub is_registered: bool,
    pub has_voted: bool,
    /// Only meaningful once `has_voted` is true.
    pub voted_proposal_id: ProposalId,
}

impl Voter {
    /// A freshly admitted voter who has not voted yet.
    pub fn registered() -> Self {
        Voter {
            is_registered: true,
            has_voted: false,
            voted_proposal_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub description: String,
    pub vote_count: u64,
}

impl Proposal {
    pub fn new(description: impl Into<String>) -> Self {
        Proposal {
            description: description.into(),
            vote_count: 0,
        }
    }

    pub fn genesis() -> Self {
        Proposal::new(GENESIS_DESCRIPTION)
    }
}
