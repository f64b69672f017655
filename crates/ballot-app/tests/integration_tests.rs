// Integration tests for the ballot service.
//
// These run the command loop and the WebSocket server together over a real
// localhost socket, and check journaling and recovery against a file-backed
// database.

use ballot_app::app::{self, AppState};
use ballot_app::config::Config;
use ballot_app::db::Database;
use ballot_app::protocol::{Envelope, Response, ServerMessage};
use ballot_app::ws_server;
use ballot_core::{BallotEvent, ParticipantId, QueryResult, WorkflowPhase};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// ===========================================================================
// Test helpers
// ===========================================================================

fn test_config(db_path: &str) -> Config {
    Config {
        authority: ParticipantId::new("owner"),
        ws_port: 9410,
        channel_capacity: 16,
        db_path: db_path.to_string(),
    }
}

/// Start the command loop and a WebSocket server on an ephemeral port.
/// Returns the ws:// URL and the loop's sender.
async fn start_service(db_path: &str) -> (String, mpsc::Sender<Envelope>, tokio::task::JoinHandle<AppState>) {
    let config = test_config(db_path);
    let db = Database::open(db_path).unwrap();
    let mut state = AppState::open(&config, db).unwrap();
    app::recover_from_db(&mut state).unwrap();

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let app_handle = tokio::spawn(app::run(rx, state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ws_server::serve(listener, tx.clone()));

    (format!("ws://{addr}"), tx, app_handle)
}

struct Client {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    next_id: u64,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        Client { ws, next_id: 1 }
    }

    /// Send one request and wait for its reply.
    async fn call(&mut self, caller: &str, request: Value) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({"id": id, "caller": caller, "request": request});
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();

        loop {
            match self.ws.next().await.expect("connection open").unwrap() {
                Message::Text(text) => {
                    let reply: ServerMessage = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(reply.id, Some(id));
                    return reply.response;
                }
                _ => continue,
            }
        }
    }

    async fn command(&mut self, caller: &str, command: Value) -> Response {
        self.call(caller, json!({ "command": command })).await
    }

    async fn query(&mut self, caller: &str, query: Value) -> Response {
        self.call(caller, json!({ "query": query })).await
    }
}

fn expect_applied(response: Response) -> BallotEvent {
    match response {
        Response::Applied { event } => event.event,
        other => panic!("expected Applied, got {other:?}"),
    }
}

fn expect_rejected(response: Response) -> String {
    match response {
        Response::Rejected { error } => error.code,
        other => panic!("expected Rejected, got {other:?}"),
    }
}

/// A unique database file under the system temp directory.
fn temp_db_path(name: &str) -> String {
    let path = std::env::temp_dir().join(format!(
        "ballot-it-{}-{}.db",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path.to_string_lossy().into_owned()
}

// ===========================================================================
// Full ballot over the wire
// ===========================================================================

#[tokio::test]
async fn full_ballot_over_websocket() {
    let (url, tx, app_handle) = start_service(":memory:").await;
    let mut owner = Client::connect(&url).await;
    let mut voters = Client::connect(&url).await;

    for v in ["a", "b", "c"] {
        let event = expect_applied(owner.command("owner", json!({"type": "register_voter", "voter": v})).await);
        assert_eq!(event, BallotEvent::VoterRegistered { voter: ParticipantId::new(v) });
    }
    expect_applied(owner.command("owner", json!({"type": "open_proposals_registration"})).await);
    for (i, d) in ["proposal1", "proposal2", "proposal3"].iter().enumerate() {
        let event = expect_applied(
            voters
                .command("a", json!({"type": "submit_proposal", "description": d}))
                .await,
        );
        assert_eq!(event, BallotEvent::ProposalRegistered { proposal_id: i as u64 + 1 });
    }
    expect_applied(owner.command("owner", json!({"type": "close_proposals_registration"})).await);
    expect_applied(owner.command("owner", json!({"type": "open_voting_session"})).await);

    for (voter, pid) in [("a", 2), ("b", 2), ("c", 3)] {
        expect_applied(voters.command(voter, json!({"type": "cast_vote", "proposal_id": pid})).await);
    }
    assert_eq!(
        expect_rejected(voters.command("a", json!({"type": "cast_vote", "proposal_id": 1})).await),
        "already_voted"
    );

    expect_applied(owner.command("owner", json!({"type": "close_voting_session"})).await);
    let event = expect_applied(owner.command("owner", json!({"type": "tally_votes"})).await);
    assert_eq!(
        event,
        BallotEvent::WorkflowStatusChange {
            previous_phase: WorkflowPhase::VotingSessionEnded,
            new_phase: WorkflowPhase::VotesTallied,
        }
    );

    match voters.query("anyone", json!({"type": "winning_proposal_id"})).await {
        Response::Answer { result } => {
            assert_eq!(result, QueryResult::WinningProposalId { proposal_id: Some(2) })
        }
        other => panic!("unexpected {other:?}"),
    }
    match voters.query("a", json!({"type": "get_one_proposal", "proposal_id": 2})).await {
        Response::Answer {
            result: QueryResult::Proposal { proposal },
        } => {
            assert_eq!(proposal.description, "proposal2");
            assert_eq!(proposal.vote_count, 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    tx.send(Envelope::Shutdown).await.unwrap();
    let state = app_handle.await.unwrap();
    assert_eq!(state.engine.current_phase(), WorkflowPhase::VotesTallied);
}

#[tokio::test]
async fn role_and_phase_errors_reach_the_client() {
    let (url, _tx, _app) = start_service(":memory:").await;
    let mut client = Client::connect(&url).await;

    assert_eq!(
        expect_rejected(client.command("mallory", json!({"type": "open_voting_session"})).await),
        "unauthorized"
    );
    assert_eq!(
        expect_rejected(client.command("owner", json!({"type": "open_voting_session"})).await),
        "wrong_phase"
    );
    assert_eq!(
        expect_rejected(client.command("mallory", json!({"type": "submit_proposal", "description": "x"})).await),
        "not_a_voter"
    );
    assert_eq!(
        expect_rejected(client.query("mallory", json!({"type": "get_voter", "voter": "owner"})).await),
        "not_a_voter"
    );
}

#[tokio::test]
async fn observers_can_follow_the_event_log() {
    let (url, _tx, _app) = start_service(":memory:").await;
    let mut client = Client::connect(&url).await;

    expect_applied(client.command("owner", json!({"type": "register_voter", "voter": "a"})).await);
    expect_applied(client.command("owner", json!({"type": "open_proposals_registration"})).await);

    match client.query("observer", json!({"type": "events_since", "seq": 1})).await {
        Response::Answer {
            result: QueryResult::Events { events },
        } => {
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].seq, 2);
            assert_eq!(
                events[0].event,
                BallotEvent::WorkflowStatusChange {
                    previous_phase: WorkflowPhase::RegisteringVoters,
                    new_phase: WorkflowPhase::ProposalsRegistrationStarted,
                }
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ===========================================================================
// Durability
// ===========================================================================

#[tokio::test]
async fn restart_resumes_the_same_ballot() {
    let db_path = temp_db_path("restart");

    {
        let (url, tx, app_handle) = start_service(&db_path).await;
        let mut client = Client::connect(&url).await;
        expect_applied(client.command("owner", json!({"type": "register_voter", "voter": "a"})).await);
        expect_applied(client.command("owner", json!({"type": "open_proposals_registration"})).await);
        expect_applied(client.command("a", json!({"type": "submit_proposal", "description": "keep me"})).await);
        tx.send(Envelope::Shutdown).await.unwrap();
        app_handle.await.unwrap();
    }

    let (url, tx, app_handle) = start_service(&db_path).await;
    let mut client = Client::connect(&url).await;

    match client.query("x", json!({"type": "current_phase"})).await {
        Response::Answer { result } => assert_eq!(
            result,
            QueryResult::Phase {
                phase: WorkflowPhase::ProposalsRegistrationStarted,
                status: 1
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
    // The recovered registry still knows voter a.
    assert_eq!(
        expect_rejected(client.command("a", json!({"type": "submit_proposal", "description": ""})).await),
        "empty_proposal"
    );
    let event = expect_applied(client.command("a", json!({"type": "submit_proposal", "description": "second"})).await);
    assert_eq!(event, BallotEvent::ProposalRegistered { proposal_id: 2 });

    tx.send(Envelope::Shutdown).await.unwrap();
    let state = app_handle.await.unwrap();
    let journal = state.db.load_journal(&state.ballot_id).unwrap();
    assert_eq!(journal.len(), 4);

    let _ = std::fs::remove_file(&db_path);
}
