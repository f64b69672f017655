// Ballot engine: phase-gated voter, proposal, and vote registries.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::BallotError;
use crate::events::{BallotEvent, EventRecord};
use crate::model::{ParticipantId, Proposal, ProposalId, Voter};
use crate::phase::{Transition, WorkflowPhase};

/// The complete state of one ballot.
///
/// Every mutating method checks, in order, the caller's role, the current
/// phase, and then its own preconditions. All checks run before any field is
/// touched, so a returned error always means the engine is unchanged and no
/// event was logged.
#[derive(Debug, Clone)]
pub struct BallotEngine {
    authority: ParticipantId,
    phase: WorkflowPhase,
    voters: HashMap<ParticipantId, Voter>,
    /// Index is the proposal id. Empty until proposal registration opens.
    proposals: Vec<Proposal>,
    winning_proposal_id: Option<ProposalId>,
    events: Vec<EventRecord>,
}

impl BallotEngine {
    /// Create a ballot in `RegisteringVoters`, administered by `authority`.
    pub fn new(authority: impl Into<ParticipantId>) -> Self {
        BallotEngine {
            authority: authority.into(),
            phase: WorkflowPhase::RegisteringVoters,
            voters: HashMap::new(),
            proposals: Vec::new(),
            winning_proposal_id: None,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Authority commands
    // ------------------------------------------------------------------

    /// Admit `voter` to the ballot.
    pub fn register_voter(
        &mut self,
        caller: &ParticipantId,
        voter: &ParticipantId,
    ) -> Result<EventRecord, BallotError> {
        self.ensure_authority(caller)?;
        self.ensure_phase(WorkflowPhase::RegisteringVoters)?;
        if self.is_voter(voter) {
            return Err(BallotError::AlreadyRegistered {
                voter: voter.clone(),
            });
        }

        self.voters.insert(voter.clone(), Voter::registered());
        debug!("Registered voter {}", voter);
        Ok(self.emit(BallotEvent::VoterRegistered {
            voter: voter.clone(),
        }))
    }

    /// Open proposal registration and create the GENESIS placeholder at id 0.
    pub fn open_proposals_registration(
        &mut self,
        caller: &ParticipantId,
    ) -> Result<EventRecord, BallotError> {
        self.transition(caller, Transition::OpenProposalsRegistration)
    }

    pub fn close_proposals_registration(
        &mut self,
        caller: &ParticipantId,
    ) -> Result<EventRecord, BallotError> {
        self.transition(caller, Transition::CloseProposalsRegistration)
    }

    pub fn open_voting_session(
        &mut self,
        caller: &ParticipantId,
    ) -> Result<EventRecord, BallotError> {
        self.transition(caller, Transition::OpenVotingSession)
    }

    pub fn close_voting_session(
        &mut self,
        caller: &ParticipantId,
    ) -> Result<EventRecord, BallotError> {
        self.transition(caller, Transition::CloseVotingSession)
    }

    /// Compute the plurality winner and move to `VotesTallied`.
    ///
    /// Ties go to the lowest proposal id. With no votes cast at all, GENESIS
    /// (id 0) wins.
    pub fn tally_votes(&mut self, caller: &ParticipantId) -> Result<EventRecord, BallotError> {
        self.transition(caller, Transition::TallyVotes)
    }

    /// Apply one of the phase-advancing commands.
    pub fn transition(
        &mut self,
        caller: &ParticipantId,
        transition: Transition,
    ) -> Result<EventRecord, BallotError> {
        self.ensure_authority(caller)?;
        self.ensure_phase(transition.from_phase())?;

        match transition {
            Transition::OpenProposalsRegistration => {
                self.proposals.push(Proposal::genesis());
            }
            Transition::TallyVotes => {
                let winner = plurality_winner(&self.proposals);
                info!("Tally complete: proposal {} wins", winner);
                self.winning_proposal_id = Some(winner);
            }
            Transition::CloseProposalsRegistration
            | Transition::OpenVotingSession
            | Transition::CloseVotingSession => {}
        }

        let previous_phase = self.phase;
        self.phase = transition.to_phase();
        info!("Workflow phase {} -> {}", previous_phase, self.phase);
        Ok(self.emit(BallotEvent::WorkflowStatusChange {
            previous_phase,
            new_phase: self.phase,
        }))
    }

    // ------------------------------------------------------------------
    // Voter commands
    // ------------------------------------------------------------------

    /// Register a proposal on behalf of a voter. Ids are handed out in
    /// submission order, starting at 1.
    pub fn submit_proposal(
        &mut self,
        caller: &ParticipantId,
        description: &str,
    ) -> Result<EventRecord, BallotError> {
        self.ensure_voter(caller)?;
        self.ensure_phase(WorkflowPhase::ProposalsRegistrationStarted)?;
        if description.is_empty() {
            return Err(BallotError::EmptyProposal);
        }

        let proposal_id = self.proposals.len() as ProposalId;
        self.proposals.push(Proposal::new(description));
        debug!("Voter {} submitted proposal {}", caller, proposal_id);
        Ok(self.emit(BallotEvent::ProposalRegistered { proposal_id }))
    }

    /// Record the caller's single vote for `proposal_id`.
    pub fn cast_vote(
        &mut self,
        caller: &ParticipantId,
        proposal_id: ProposalId,
    ) -> Result<EventRecord, BallotError> {
        let voter = self.ensure_voter(caller)?;
        let already_voted = voter.has_voted;
        self.ensure_phase(WorkflowPhase::VotingSessionStarted)?;
        if already_voted {
            return Err(BallotError::AlreadyVoted {
                voter: caller.clone(),
            });
        }
        let index = self
            .proposal_index(proposal_id)
            .ok_or(BallotError::ProposalNotFound { proposal_id })?;

        // Checks are done; both registries are updated together.
        if let Some(voter) = self.voters.get_mut(caller) {
            voter.has_voted = true;
            voter.voted_proposal_id = proposal_id;
        }
        self.proposals[index].vote_count += 1;
        debug!("Voter {} voted for proposal {}", caller, proposal_id);

        Ok(self.emit(BallotEvent::Voted {
            voter: caller.clone(),
            proposal_id,
        }))
    }

    // ------------------------------------------------------------------
    // Voter-gated reads
    // ------------------------------------------------------------------

    /// Look up a voter record. Unknown targets read as the default
    /// (unregistered) record.
    pub fn get_voter(
        &self,
        caller: &ParticipantId,
        target: &ParticipantId,
    ) -> Result<Voter, BallotError> {
        self.ensure_voter(caller)?;
        Ok(self.voters.get(target).cloned().unwrap_or_default())
    }

    pub fn get_one_proposal(
        &self,
        caller: &ParticipantId,
        proposal_id: ProposalId,
    ) -> Result<Proposal, BallotError> {
        self.ensure_voter(caller)?;
        self.proposal_index(proposal_id)
            .map(|i| self.proposals[i].clone())
            .ok_or(BallotError::IndexOutOfRange {
                index: proposal_id,
                len: self.proposals.len(),
            })
    }

    // ------------------------------------------------------------------
    // Open reads
    // ------------------------------------------------------------------

    pub fn current_phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn authority(&self) -> &ParticipantId {
        &self.authority
    }

    /// `None` until the tally has run.
    pub fn winning_proposal_id(&self) -> Option<ProposalId> {
        self.winning_proposal_id
    }

    /// The winning proposal and its id, once tallied.
    pub fn winning_proposal(&self) -> Option<(ProposalId, &Proposal)> {
        let id = self.winning_proposal_id?;
        let index = self.proposal_index(id)?;
        Some((id, &self.proposals[index]))
    }

    pub fn is_voter(&self, id: &ParticipantId) -> bool {
        self.voters.get(id).is_some_and(|v| v.is_registered)
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    /// Number of proposals, GENESIS included.
    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn voters(&self) -> impl Iterator<Item = (&ParticipantId, &Voter)> {
        self.voters.iter()
    }

    /// The full event log, oldest first.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Events with a sequence number strictly greater than `seq`.
    pub fn events_since(&self, seq: u64) -> &[EventRecord] {
        // seq n lives at index n - 1, so everything after `seq` starts at index `seq`.
        let start = usize::try_from(seq).unwrap_or(usize::MAX).min(self.events.len());
        &self.events[start..]
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_authority(&self, caller: &ParticipantId) -> Result<(), BallotError> {
        if *caller == self.authority {
            Ok(())
        } else {
            Err(BallotError::Unauthorized {
                caller: caller.clone(),
            })
        }
    }

    fn ensure_voter(&self, caller: &ParticipantId) -> Result<&Voter, BallotError> {
        self.voters
            .get(caller)
            .filter(|v| v.is_registered)
            .ok_or_else(|| BallotError::NotAVoter {
                caller: caller.clone(),
            })
    }

    fn ensure_phase(&self, expected: WorkflowPhase) -> Result<(), BallotError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(BallotError::WrongPhase {
                expected,
                actual: self.phase,
            })
        }
    }

    fn proposal_index(&self, proposal_id: ProposalId) -> Option<usize> {
        usize::try_from(proposal_id)
            .ok()
            .filter(|&i| i < self.proposals.len())
    }

    fn emit(&mut self, event: BallotEvent) -> EventRecord {
        let record = EventRecord {
            seq: self.events.len() as u64 + 1,
            event,
        };
        self.events.push(record.clone());
        record
    }
}

/// Ascending scan that only replaces the leader on a strictly higher count,
/// so the earliest proposal reaching the maximum keeps the lead.
fn plurality_winner(proposals: &[Proposal]) -> ProposalId {
    let mut winner: ProposalId = 0;
    let mut best = 0u64;
    for (id, proposal) in proposals.iter().enumerate() {
        if proposal.vote_count > best {
            best = proposal.vote_count;
            winner = id as ProposalId;
        }
    }
    winner
}
