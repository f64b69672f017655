// Events emitted by successful commands.

use serde::{Deserialize, Serialize};

use crate::model::{ParticipantId, ProposalId};
use crate::phase::WorkflowPhase;

/// What happened. Exactly one is emitted per successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BallotEvent {
    VoterRegistered {
        voter: ParticipantId,
    },
    ProposalRegistered {
        proposal_id: ProposalId,
    },
    Voted {
        voter: ParticipantId,
        proposal_id: ProposalId,
    },
    WorkflowStatusChange {
        previous_phase: WorkflowPhase,
        new_phase: WorkflowPhase,
    },
}

/// An event with its position in the ballot's log. Sequence numbers start at
/// 1 and have no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub event: BallotEvent,
}
