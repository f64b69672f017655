// Library root: the ballot workflow engine and the types it exchanges with
// callers (commands, queries, events, errors).

pub mod command;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod phase;

pub use command::{Command, Query, QueryResult};
pub use engine::BallotEngine;
pub use error::BallotError;
pub use events::{BallotEvent, EventRecord};
pub use model::{ParticipantId, Proposal, ProposalId, Voter, GENESIS_DESCRIPTION};
pub use phase::{Transition, WorkflowPhase};
