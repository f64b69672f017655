// Workflow phases and the forward-only transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The six phases of a ballot, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    RegisteringVoters,
    ProposalsRegistrationStarted,
    ProposalsRegistrationEnded,
    VotingSessionStarted,
    VotingSessionEnded,
    VotesTallied,
}

impl WorkflowPhase {
    /// All phases in workflow order.
    pub const ALL: [WorkflowPhase; 6] = [
        WorkflowPhase::RegisteringVoters,
        WorkflowPhase::ProposalsRegistrationStarted,
        WorkflowPhase::ProposalsRegistrationEnded,
        WorkflowPhase::VotingSessionStarted,
        WorkflowPhase::VotingSessionEnded,
        WorkflowPhase::VotesTallied,
    ];

    /// Numeric status code (0 through 5), matching the order of `ALL`.
    pub fn index(self) -> u8 {
        match self {
            WorkflowPhase::RegisteringVoters => 0,
            WorkflowPhase::ProposalsRegistrationStarted => 1,
            WorkflowPhase::ProposalsRegistrationEnded => 2,
            WorkflowPhase::VotingSessionStarted => 3,
            WorkflowPhase::VotingSessionEnded => 4,
            WorkflowPhase::VotesTallied => 5,
        }
    }

    /// Inverse of [`WorkflowPhase::index`].
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Human-readable reason a command gated on this phase was refused.
    pub fn not_open_reason(self) -> &'static str {
        match self {
            WorkflowPhase::RegisteringVoters => "voter registration is not open",
            WorkflowPhase::ProposalsRegistrationStarted => "proposal registration is not open",
            WorkflowPhase::ProposalsRegistrationEnded => "proposal registration has not ended",
            WorkflowPhase::VotingSessionStarted => "voting session has not started",
            WorkflowPhase::VotingSessionEnded => "voting session has not ended",
            WorkflowPhase::VotesTallied => "votes have not been tallied",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowPhase::RegisteringVoters => "RegisteringVoters",
            WorkflowPhase::ProposalsRegistrationStarted => "ProposalsRegistrationStarted",
            WorkflowPhase::ProposalsRegistrationEnded => "ProposalsRegistrationEnded",
            WorkflowPhase::VotingSessionStarted => "VotingSessionStarted",
            WorkflowPhase::VotingSessionEnded => "VotingSessionEnded",
            WorkflowPhase::VotesTallied => "VotesTallied",
        };
        write!(f, "{s}")
    }
}

/// The authority-only commands that move the workflow forward.
///
/// Each transition is legal from exactly one phase and lands in exactly one
/// phase; the pairs below form the whole transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    OpenProposalsRegistration,
    CloseProposalsRegistration,
    OpenVotingSession,
    CloseVotingSession,
    TallyVotes,
}

impl Transition {
    /// Every transition, in the order the workflow applies them.
    pub const ALL: [Transition; 5] = [
        Transition::OpenProposalsRegistration,
        Transition::CloseProposalsRegistration,
        Transition::OpenVotingSession,
        Transition::CloseVotingSession,
        Transition::TallyVotes,
    ];

    /// The phase this transition must start from.
    pub fn from_phase(self) -> WorkflowPhase {
        match self {
            Transition::OpenProposalsRegistration => WorkflowPhase::RegisteringVoters,
            Transition::CloseProposalsRegistration => WorkflowPhase::ProposalsRegistrationStarted,
            Transition::OpenVotingSession => WorkflowPhase::ProposalsRegistrationEnded,
            Transition::CloseVotingSession => WorkflowPhase::VotingSessionStarted,
            Transition::TallyVotes => WorkflowPhase::VotingSessionEnded,
        }
    }

    /// The phase this transition lands in.
    pub fn to_phase(self) -> WorkflowPhase {
        match self {
            Transition::OpenProposalsRegistration => WorkflowPhase::ProposalsRegistrationStarted,
            Transition::CloseProposalsRegistration => WorkflowPhase::ProposalsRegistrationEnded,
            Transition::OpenVotingSession => WorkflowPhase::VotingSessionStarted,
            Transition::CloseVotingSession => WorkflowPhase::VotingSessionEnded,
            Transition::TallyVotes => WorkflowPhase::VotesTallied,
        }
    }

    /// The transition that leaves `phase`, if any. `VotesTallied` is terminal.
    pub fn leaving(phase: WorkflowPhase) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.from_phase() == phase)
    }
}
