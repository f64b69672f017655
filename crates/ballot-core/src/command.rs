// Serializable commands and queries, and their dispatch onto the engine.

use serde::{Deserialize, Serialize};

use crate::engine::BallotEngine;
use crate::error::BallotError;
use crate::events::EventRecord;
use crate::model::{ParticipantId, Proposal, ProposalId, Voter};
use crate::phase::{Transition, WorkflowPhase};

/// A state-changing request. The caller identity travels alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    RegisterVoter { voter: ParticipantId },
    OpenProposalsRegistration,
    SubmitProposal { description: String },
    CloseProposalsRegistration,
    OpenVotingSession,
    CastVote { proposal_id: ProposalId },
    CloseVotingSession,
    TallyVotes,
}

impl Command {
    /// The phase this command is accepted in. Workflow transitions take it
    /// from the transition table.
    pub fn required_phase(&self) -> WorkflowPhase {
        if let Some(transition) = self.transition() {
            return transition.from_phase();
        }
        match self {
            Command::RegisterVoter { .. } => WorkflowPhase::RegisteringVoters,
            Command::SubmitProposal { .. } => WorkflowPhase::ProposalsRegistrationStarted,
            Command::CastVote { .. } => WorkflowPhase::VotingSessionStarted,
            _ => unreachable!(),
        }
    }

    /// The workflow transition this command performs, if it is one.
    pub fn transition(&self) -> Option<Transition> {
        match self {
            Command::OpenProposalsRegistration => Some(Transition::OpenProposalsRegistration),
            Command::CloseProposalsRegistration => Some(Transition::CloseProposalsRegistration),
            Command::OpenVotingSession => Some(Transition::OpenVotingSession),
            Command::CloseVotingSession => Some(Transition::CloseVotingSession),
            Command::TallyVotes => Some(Transition::TallyVotes),
            Command::RegisterVoter { .. }
            | Command::SubmitProposal { .. }
            | Command::CastVote { .. } => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterVoter { .. } => "register_voter",
            Command::OpenProposalsRegistration => "open_proposals_registration",
            Command::SubmitProposal { .. } => "submit_proposal",
            Command::CloseProposalsRegistration => "close_proposals_registration",
            Command::OpenVotingSession => "open_voting_session",
            Command::CastVote { .. } => "cast_vote",
            Command::CloseVotingSession => "close_voting_session",
            Command::TallyVotes => "tally_votes",
        }
    }
}

/// A read-only request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    GetVoter { voter: ParticipantId },
    GetOneProposal { proposal_id: ProposalId },
    CurrentPhase,
    WinningProposalId,
    Authority,
    EventsSince { seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Voter { voter: Voter },
    Proposal { proposal: Proposal },
    Phase { phase: WorkflowPhase, status: u8 },
    WinningProposalId { proposal_id: Option<ProposalId> },
    Authority { authority: ParticipantId },
    Events { events: Vec<EventRecord> },
}

impl BallotEngine {
    /// Dispatch a [`Command`] to the matching engine method.
    pub fn apply(
        &mut self,
        caller: &ParticipantId,
        command: &Command,
    ) -> Result<EventRecord, BallotError> {
        if let Some(transition) = command.transition() {
            return self.transition(caller, transition);
        }
        match command {
            Command::RegisterVoter { voter } => self.register_voter(caller, voter),
            Command::SubmitProposal { description } => self.submit_proposal(caller, description),
            Command::CastVote { proposal_id } => self.cast_vote(caller, *proposal_id),
            _ => unreachable!(),
        }
    }

    /// Answer a [`Query`]. Only voter lookups and proposal lookups are
    /// role-gated; the rest are open reads.
    pub fn query(&self, caller: &ParticipantId, query: &Query) -> Result<QueryResult, BallotError> {
        Ok(match query {
            Query::GetVoter { voter } => QueryResult::Voter {
                voter: self.get_voter(caller, voter)?,
            },
            Query::GetOneProposal { proposal_id } => QueryResult::Proposal {
                proposal: self.get_one_proposal(caller, *proposal_id)?,
            },
            Query::CurrentPhase => QueryResult::Phase {
                phase: self.current_phase(),
                status: self.current_phase().index(),
            },
            Query::WinningProposalId => QueryResult::WinningProposalId {
                proposal_id: self.winning_proposal_id(),
            },
            Query::Authority => QueryResult::Authority {
                authority: self.authority().clone(),
            },
            Query::EventsSince { seq } => QueryResult::Events {
                events: self.events_since(*seq).to_vec(),
            },
        })
    }

    /// Rebuild an engine by re-applying a journal of accepted commands in
    /// order. Fails on the first command the rebuilt engine refuses, which
    /// means the journal does not belong to this authority or was altered.
    pub fn replay<'a, I>(authority: impl Into<ParticipantId>, journal: I) -> Result<Self, BallotError>
    where
        I: IntoIterator<Item = (&'a ParticipantId, &'a Command)>,
    {
        let mut engine = BallotEngine::new(authority);
        for (caller, command) in journal {
            engine.apply(caller, command)?;
        }
        Ok(engine)
    }
}
