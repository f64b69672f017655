// WebSocket ingress: JSON request frames in, JSON reply frames out.

use std::fmt::Display;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, Envelope, ErrorBody, Response, ServerMessage};

/// Bind `127.0.0.1:{port}` and serve forever (until the task is cancelled or
/// the command loop goes away).
pub async fn run(port: u16, tx: mpsc::Sender<Envelope>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    serve(listener, tx).await
}

/// Accept connections on an already-bound listener. Each connection gets its
/// own task; ordering across connections is settled by the command loop.
pub async fn serve(listener: TcpListener, tx: mpsc::Sender<Envelope>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        if tx.is_closed() {
            info!("Command loop closed, no longer accepting connections");
            break;
        }
        tokio::spawn(handle_connection(stream, addr.to_string(), tx.clone()));
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, addr: String, tx: mpsc::Sender<Envelope>) {
    info!("Accepted TCP connection from {addr}");

    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (mut write, read) = ws_stream.split();
    if process_message_stream(read, &mut write, &tx, &addr)
        .await
        .is_err()
    {
        debug!("Stopped serving {addr}");
    }
    info!("Client {addr} disconnected");
}

/// Read frames from `stream`, answer each text frame on `sink`. Returns
/// `Err(())` if the command loop is gone or the sink refuses a write.
///
/// Generic over both halves so it can be exercised with in-memory streams.
pub async fn process_message_stream<St, Si>(
    mut stream: St,
    sink: &mut Si,
    tx: &mpsc::Sender<Envelope>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let Some(reply) = dispatch(text.as_str(), tx).await else {
                    return Err(());
                };
                let json = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode reply for {addr}: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!("Failed to write reply to {addr}: {e}");
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

/// Decode one request frame, hand it to the command loop, and wait for the
/// answer. `None` means the command loop has shut down.
pub async fn dispatch(text: &str, tx: &mpsc::Sender<Envelope>) -> Option<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage {
                id: None,
                response: Response::Rejected {
                    error: ErrorBody::bad_request(format!("malformed request: {e}")),
                },
            });
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Envelope::Request {
        caller: msg.caller,
        request: msg.request,
        reply: reply_tx,
    })
    .await
    .ok()?;

    let response = match reply_rx.await {
        Ok(response) => response,
        // The loop took the request but dropped the reply sender, which only
        // happens while it is shutting down.
        Err(_) => Response::Rejected {
            error: ErrorBody::internal("service is shutting down"),
        },
    };

    Some(ServerMessage {
        id: msg.id,
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{self, AppState};
    use crate::config::Config;
    use crate::db::Database;
    use ballot_core::ParticipantId;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Helper: create a stream of Message results from a vec.
    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    /// Spawn a command loop over an in-memory ballot owned by "owner".
    fn spawn_app() -> mpsc::Sender<Envelope> {
        let config = Config {
            authority: ParticipantId::new("owner"),
            ws_port: 9410,
            channel_capacity: 8,
            db_path: ":memory:".into(),
        };
        let db = Database::open(":memory:").unwrap();
        let state = AppState::open(&config, db).unwrap();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(app::run(rx, state));
        tx
    }

    fn replies(sink: &[Message]) -> Vec<ServerMessage> {
        sink.iter()
            .map(|m| match m {
                Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    fn text(s: &str) -> Result<Message, WsError> {
        Ok(Message::Text(s.into()))
    }

    #[tokio::test]
    async fn command_frame_gets_applied_reply() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![text(
            r#"{"id":1,"caller":"owner","request":{"command":{"type":"register_voter","voter":"alice"}}}"#,
        )];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();

        let replies = replies(&sink);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, Some(1));
        assert!(matches!(replies[0].response, Response::Applied { .. }));
    }

    #[tokio::test]
    async fn rejection_carries_error_code() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![text(
            r#"{"id":2,"caller":"alice","request":{"command":{"type":"tally_votes"}}}"#,
        )];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();

        match &replies(&sink)[0].response {
            Response::Rejected { error } => assert_eq!(error.code, "unauthorized"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_gets_bad_request_and_connection_continues() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![
            text("not json"),
            text(r#"{"caller":"x","request":{"query":{"type":"current_phase"}}}"#),
        ];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();

        let replies = replies(&sink);
        assert_eq!(replies.len(), 2);
        match &replies[0].response {
            Response::Rejected { error } => assert_eq!(error.code, "bad_request"),
            other => panic!("expected bad_request, got {other:?}"),
        }
        assert!(matches!(replies[1].response, Response::Answer { .. }));
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![
            Ok(Message::Close(None)),
            text(r#"{"caller":"x","request":{"query":{"type":"authority"}}}"#),
        ];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn binary_and_ping_messages_are_ignored() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
        ];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let tx = spawn_app();
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![
            Err(WsError::ConnectionClosed),
            text(r#"{"caller":"x","request":{"query":{"type":"authority"}}}"#),
        ];

        process_message_stream(mock_stream(messages), &mut sink, &tx, "test")
            .await
            .unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn returns_err_when_command_loop_gone() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut sink: Vec<Message> = Vec::new();
        let messages = vec![text(r#"{"caller":"x","request":{"query":{"type":"authority"}}}"#)];

        let result = process_message_stream(mock_stream(messages), &mut sink, &tx, "test").await;
        assert!(result.is_err());
    }
}
