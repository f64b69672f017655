// Wire protocol between clients and the ballot service.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use ballot_core::{BallotError, Command, EventRecord, ParticipantId, Query, QueryResult};

/// What a client asks for: a state change or a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Command(Command),
    Query(Query),
}

/// A request frame as sent by a client over the WebSocket.
///
/// The caller identity is asserted by whatever sits in front of this
/// service; the engine only checks it against its registries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Client-chosen correlation id, echoed in the reply.
    #[serde(default)]
    pub id: Option<u64>,
    pub caller: ParticipantId,
    pub request: Request,
}

/// Error body carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ErrorBody {
            code: "bad_request".into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ErrorBody {
            code: "internal".into(),
            message: message.into(),
        }
    }
}

impl From<&BallotError> for ErrorBody {
    fn from(err: &BallotError) -> Self {
        ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// A command was applied and produced this event.
    Applied { event: EventRecord },
    Answer { result: QueryResult },
    Rejected { error: ErrorBody },
}

/// A reply frame sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub id: Option<u64>,
    pub response: Response,
}

/// A request handed to the app loop, with the channel its answer goes to.
#[derive(Debug)]
pub enum Envelope {
    Request {
        caller: ParticipantId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// Stop the app loop after the requests already queued ahead of it.
    Shutdown,
}
