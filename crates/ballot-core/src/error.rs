// Business-rule rejections raised by the ballot engine.

use thiserror::Error;

use crate::model::{ParticipantId, ProposalId};
use crate::phase::WorkflowPhase;

/// Every way a command or query can be refused.
///
/// None of these are transient: retrying the same call in the same state
/// yields the same error. A rejected call never changes engine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("caller {caller} is not the ballot authority")]
    Unauthorized { caller: ParticipantId },

    #[error("{reason}: current phase is {actual}", reason = .expected.not_open_reason())]
    WrongPhase {
        expected: WorkflowPhase,
        actual: WorkflowPhase,
    },

    #[error("voter {voter} is already registered")]
    AlreadyRegistered { voter: ParticipantId },

    #[error("caller {caller} is not a registered voter")]
    NotAVoter { caller: ParticipantId },

    #[error("voter {voter} has already voted")]
    AlreadyVoted { voter: ParticipantId },

    #[error("proposal description must not be empty")]
    EmptyProposal,

    #[error("proposal {proposal_id} not found")]
    ProposalNotFound { proposal_id: ProposalId },

    #[error("proposal index {index} out of range ({len} proposals)")]
    IndexOutOfRange { index: ProposalId, len: usize },
}

impl BallotError {
    /// Stable machine-readable code, used on the wire and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            BallotError::Unauthorized { .. } => "unauthorized",
            BallotError::WrongPhase { .. } => "wrong_phase",
            BallotError::AlreadyRegistered { .. } => "already_registered",
            BallotError::NotAVoter { .. } => "not_a_voter",
            BallotError::AlreadyVoted { .. } => "already_voted",
            BallotError::EmptyProposal => "empty_proposal",
            BallotError::ProposalNotFound { .. } => "proposal_not_found",
            BallotError::IndexOutOfRange { .. } => "index_out_of_range",
        }
    }
}
