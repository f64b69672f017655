// Application state and the single-writer command loop.
//
// Every request from every connection funnels through one mpsc channel into
// `run`, which owns the engine outright. Commands are therefore applied one
// at a time in arrival order, and each accepted command is journaled to the
// database before it takes effect.

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ballot_core::{BallotEngine, Command, ParticipantId, Query};

use crate::config::Config;
use crate::db::Database;
use crate::protocol::{Envelope, ErrorBody, Request, Response};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything the command loop owns.
pub struct AppState {
    pub engine: BallotEngine,
    pub db: Database,
    /// Identifies the ballot session; journal rows are scoped to it so a new
    /// ballot never replays an old one's commands.
    pub ballot_id: String,
}

impl AppState {
    pub fn new(engine: BallotEngine, db: Database, ballot_id: String) -> Self {
        AppState {
            engine,
            db,
            ballot_id,
        }
    }

    /// Build the state for the ballot stored in `db`, or start a new ballot
    /// administered by the configured authority if there is none.
    ///
    /// A stored ballot keeps the authority it was created with.
    pub fn open(config: &Config, db: Database) -> anyhow::Result<Self> {
        let ballot_id = match db.get_ballot_id()? {
            Some(id) => id,
            None => {
                let id = Database::generate_ballot_id();
                db.set_ballot_id(&id)?;
                db.set_authority(&config.authority)?;
                info!("Started new ballot {}", id);
                id
            }
        };

        let authority = match db.get_authority()? {
            Some(stored) => {
                if stored != config.authority {
                    warn!(
                        "Configured authority {} differs from ballot authority {}; keeping {}",
                        config.authority, stored, stored
                    );
                }
                stored
            }
            None => {
                db.set_authority(&config.authority)?;
                config.authority.clone()
            }
        };

        Ok(AppState::new(BallotEngine::new(authority), db, ballot_id))
    }

    /// Apply or answer one request.
    pub fn handle_request(&mut self, caller: &ParticipantId, request: &Request) -> Response {
        match request {
            Request::Command(command) => self.handle_command(caller, command),
            Request::Query(query) => self.handle_query(caller, query),
        }
    }

    /// Apply a command to a copy of the engine and keep the copy only once
    /// the command is journaled, so the engine never holds a command that a
    /// restart would not replay.
    fn handle_command(&mut self, caller: &ParticipantId, command: &Command) -> Response {
        let mut next = self.engine.clone();
        let record = match next.apply(caller, command) {
            Ok(record) => record,
            Err(err) => {
                warn!("Rejected {} from {}: {}", command.name(), caller, err);
                return Response::Rejected {
                    error: ErrorBody::from(&err),
                };
            }
        };

        if let Err(e) = self
            .db
            .record_applied(&self.ballot_id, caller, command, &record)
        {
            error!(
                "Failed to journal {} from {}, discarding it: {:#}",
                command.name(),
                caller,
                e
            );
            return Response::Rejected {
                error: ErrorBody::internal("command could not be recorded"),
            };
        }

        self.engine = next;
        info!(
            "Applied {} from {} (event #{})",
            command.name(),
            caller,
            record.seq
        );
        Response::Applied { event: record }
    }

    fn handle_query(&self, caller: &ParticipantId, query: &Query) -> Response {
        match self.engine.query(caller, query) {
            Ok(result) => Response::Answer { result },
            Err(err) => {
                warn!("Refused query {:?} from {}: {}", query, caller, err);
                Response::Rejected {
                    error: ErrorBody::from(&err),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command loop
// ---------------------------------------------------------------------------

/// Run the command loop until every sender is dropped or a
/// [`Envelope::Shutdown`] arrives. Returns the final state.
pub async fn run(mut rx: mpsc::Receiver<Envelope>, mut state: AppState) -> AppState {
    info!("Command loop started for ballot {}", state.ballot_id);

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Request {
                caller,
                request,
                reply,
            } => {
                let response = state.handle_request(&caller, &request);
                if reply.send(response).is_err() {
                    debug!("Requester for {} went away before the reply", caller);
                }
            }
            Envelope::Shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    info!("Command loop exiting");
    state
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Restore the engine from the journal of the current ballot.
///
/// Returns `Ok(false)` when there is nothing to restore. A journal the engine
/// refuses to replay is an error: the stored history no longer describes a
/// valid ballot.
pub fn recover_from_db(state: &mut AppState) -> anyhow::Result<bool> {
    if !state.db.has_ballot_in_progress(&state.ballot_id)? {
        info!("No journal for ballot {}, starting fresh", state.ballot_id);
        return Ok(false);
    }

    let journal = state.db.load_journal(&state.ballot_id)?;
    info!(
        "Crash recovery: replaying {} commands for ballot {}",
        journal.len(),
        state.ballot_id
    );

    let authority = state.engine.authority().clone();
    let engine = BallotEngine::replay(
        authority,
        journal.iter().map(|entry| (&entry.caller, &entry.command)),
    )
    .with_context(|| format!("journal for ballot {} does not replay", state.ballot_id))?;

    info!(
        "Crash recovery complete: phase {}, {} voters, {} proposals",
        engine.current_phase(),
        engine.voter_count(),
        engine.proposal_count()
    );
    state.engine = engine;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
