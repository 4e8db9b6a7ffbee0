//! WebSocket connection handler
//!
//! Handles individual client connections: handshake checks, the autologin
//! negotiation, the client-action loop, and cleanup when the socket drops.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info};

use crate::dispatch::{Negotiation, Session};
use crate::error::AppError;
use crate::message::ClientFrame;
use crate::server::GameServer;
use crate::socket::Socket;
use crate::user::Attachment;

/// How long queued frames may take to flush once a session ends
const CLOSE_GRACE: Duration = Duration::from_secs(2);

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Run one frame; outside negotiation every frame reports `Done`
fn feed(session: &mut Session, frame: ClientFrame, negotiating: bool) -> Negotiation {
    if negotiating {
        session.negotiate(frame)
    } else {
        session.handle(frame);
        Negotiation::Done
    }
}

/// Serve one client connection until it closes or the server shuts down
///
/// The stream is a plain TCP stream or a TLS stream; everything after the
/// handshake is the same for both.
pub async fn handle_connection<S>(stream: S, peer: String, server: GameServer) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let guard = server.shared().try_connect();
    let settings = server.settings();
    let callbacks = &server.shared().callbacks;

    let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if guard.is_none() {
            return Err(reject(StatusCode::PAYLOAD_TOO_LARGE, "Server is full."));
        }
        if req.uri().path() != settings.endpoint_path() {
            return Err(reject(StatusCode::NOT_FOUND, "Not found."));
        }
        let origin = req.headers().get("Origin").and_then(|v| v.to_str().ok());
        if !settings.origin_allowed(origin) {
            return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed."));
        }
        if !callbacks.on_client_connect(req) {
            return Err(reject(StatusCode::FORBIDDEN, "Connection refused."));
        }
        Ok(resp)
    })
    .await;

    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(tungstenite::Error::Http(response)) => {
            debug!(peer = %peer, status = %response.status(), "Handshake rejected");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (socket, mut rx) = Socket::channel();
    let session_id = socket.id();
    info!(session = %session_id, peer = %peer, "Client connected");

    // Spawn write task (outbound queue -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.encode() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize message");
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let Some(mut shutdown) = server.shared().shutdown_signal() else {
        write_task.abort();
        return Ok(());
    };
    let mut session = Session::new(server.clone(), socket);
    let mut negotiating = session.wants_negotiation();
    if negotiating {
        session.begin_negotiation();
    }
    let mut write_done = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(session = %session_id, "Server shutting down, closing session");
                break;
            }
            _ = &mut write_task => {
                debug!(session = %session_id, "Write task completed");
                write_done = true;
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame = match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) if !frame.action.is_empty() => frame,
                        Ok(_) => {
                            debug!(session = %session_id, "Frame without an action, closing session");
                            break;
                        }
                        Err(e) => {
                            debug!(session = %session_id, error = %e, "Malformed frame, closing session");
                            break;
                        }
                    };
                    // Password hashing runs on the blocking pool; the session
                    // waits for it so its frames stay in order
                    let outcome = if session.hashes_password(&frame, negotiating) {
                        let slot = session.slot();
                        let mut moved = session;
                        let task = tokio::task::spawn_blocking(move || {
                            let outcome = feed(&mut moved, frame, negotiating);
                            (moved, outcome)
                        });
                        match task.await {
                            Ok((returned, outcome)) => {
                                session = returned;
                                outcome
                            }
                            Err(e) => {
                                error!(session = %session_id, error = %e, "Client action task failed");
                                if let Some(Attachment { user, conn_id }) = slot.get() {
                                    user.logout(&conn_id);
                                }
                                return Err(e.into());
                            }
                        }
                    } else {
                        feed(&mut session, frame, negotiating)
                    };
                    match outcome {
                        Negotiation::Continue => {}
                        Negotiation::Done => negotiating = false,
                        Negotiation::Close => {
                            debug!(session = %session_id, "Autologin negotiation failed, closing session");
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session = %session_id, "Client sent close frame");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no actions
                }
                Some(Err(e)) => {
                    debug!(session = %session_id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    }

    session.close();
    drop(session);
    if !write_done && tokio::time::timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
        write_task.abort();
    }
    drop(guard);

    info!(session = %session_id, peer = %peer, "Client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::room::NewRoom;
    use crate::error::GameError;
    use crate::friends::Friend;
    use crate::room_type::RoomType;
    use crate::store::{Account, Columns, Identity, MemoryStore};
    use crate::testing::server_with;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(server: &GameServer) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        addr
    }

    async fn send(ws: &mut Client, frame: Value) {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    async fn next_json(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    fn http_status(err: tungstenite::Error) -> StatusCode {
        match err {
            tungstenite::Error::Http(response) => response.status(),
            other => panic!("expected an HTTP rejection, got {other}"),
        }
    }

    const SLOW_LOGIN: Duration = Duration::from_millis(1500);

    /// Identity whose password check takes as long as a costly hash
    struct SlowLogin(Arc<MemoryStore>);

    impl Identity for SlowLogin {
        fn sign_up(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError> {
            self.0.sign_up(name, password, columns)
        }

        fn login(
            &self,
            name: &str,
            password: &str,
            device_tag: &str,
            remember_me: bool,
            columns: Option<&Columns>,
        ) -> Result<Account, GameError> {
            std::thread::sleep(SLOW_LOGIN);
            self.0.login(name, password, device_tag, remember_me, columns)
        }

        fn auto_login(&self, device_tag: &str, pass: &str, new_pass: &str, database_id: i64) -> Result<String, GameError> {
            self.0.auto_login(device_tag, pass, new_pass, database_id)
        }

        fn remove_auto_log(&self, database_id: i64, device_tag: &str) {
            self.0.remove_auto_log(database_id, device_tag)
        }

        fn change_password(
            &self,
            name: &str,
            password: &str,
            new_password: &str,
            columns: Option<&Columns>,
        ) -> Result<(), GameError> {
            self.0.change_password(name, password, new_password, columns)
        }

        fn change_account_info(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError> {
            self.0.change_account_info(name, password, columns)
        }

        fn delete_account(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError> {
            self.0.delete_account(name, password, columns)
        }

        fn get_user_database_index(&self, name: &str) -> Result<i64, GameError> {
            self.0.get_user_database_index(name)
        }

        fn get_friends(&self, database_id: i64) -> Result<HashMap<String, Friend>, GameError> {
            self.0.get_friends(database_id)
        }
    }

    #[tokio::test]
    async fn test_password_check_does_not_stall_other_sessions() {
        let store = Arc::new(MemoryStore::with_cost(4));
        store.sign_up("alice", "pw", None).unwrap();
        let settings = Settings {
            enable_sql_features: true,
            ..Settings::default()
        };
        let server = server_with(settings, |b| {
            b.identity(Arc::new(SlowLogin(store.clone())))
                .friends_store(store.clone())
        });
        let addr = spawn_server(&server).await;
        let (mut alice, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let (mut bob, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        send(&mut alice, json!({"A": "li", "P": {"n": "alice", "p": "pw"}})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let asked = Instant::now();
        send(&mut bob, json!({"A": "zz"})).await;
        assert_eq!(
            next_json(&mut bob).await,
            json!({"c": {"a": "zz", "e": "Unrecognized client action"}})
        );
        assert!(asked.elapsed() < SLOW_LOGIN / 2, "took {:?}", asked.elapsed());

        assert_eq!(
            next_json(&mut alice).await,
            json!({"c": {"a": "li", "r": {"n": "alice", "f": []}}})
        );
        assert_eq!(server.user_count(), 1);
    }

    #[tokio::test]
    async fn test_guest_session_over_websocket() {
        let server = server_with(Settings::default(), |b| {
            b.room_type("lobby", RoomType::new().broadcast_user_enter())
        });
        server.new_room(NewRoom::new("hall", "lobby")).unwrap();
        let addr = spawn_server(&server).await;

        let (mut alice, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let (mut bob, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        send(&mut alice, json!({"A": "li", "P": {"n": "alice", "g": true}})).await;
        assert_eq!(
            next_json(&mut alice).await,
            json!({"c": {"a": "li", "r": {"n": "alice", "f": []}}})
        );
        send(&mut alice, json!({"A": "j", "P": "hall"})).await;
        assert_eq!(next_json(&mut alice).await, json!({"c": {"a": "j", "r": "hall"}}));

        send(&mut bob, json!({"A": "li", "P": {"n": "bob"}})).await;
        next_json(&mut bob).await;
        send(&mut bob, json!({"A": "j", "P": "hall"})).await;
        assert_eq!(next_json(&mut bob).await, json!({"c": {"a": "j", "r": "hall"}}));
        assert_eq!(next_json(&mut alice).await, json!({"e": {"u": "bob", "g": false}}));

        send(&mut bob, json!({"A": "c", "P": "gg"})).await;
        let chat = json!({"m": {"a": "bob", "m": "gg"}});
        assert_eq!(next_json(&mut alice).await, chat);
        assert_eq!(next_json(&mut bob).await, chat);
        assert_eq!(next_json(&mut bob).await, json!({"c": {"a": "c", "r": null}}));

        assert_eq!(server.user_count(), 2);
        bob.close(None).await.unwrap();
        wait_for(|| server.user_count() == 1).await;
        assert_eq!(server.get_room("hall").unwrap().num_users(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_session() {
        let server = server_with(Settings::default(), |b| b);
        let addr = spawn_server(&server).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        send(&mut ws, json!({"A": "li", "P": {"n": "alice"}})).await;
        next_json(&mut ws).await;
        ws.send(Message::Text("not json".to_string())).await.unwrap();

        wait_for(|| server.user_count() == 0).await;
        wait_for(|| server.connection_count() == 0).await;
    }

    #[tokio::test]
    async fn test_handshake_checks() {
        let server = server_with(
            Settings {
                max_connections: 1,
                ..Settings::default()
            },
            |b| b,
        );
        let addr = spawn_server(&server).await;

        let err = connect_async(format!("ws://{addr}/elsewhere")).await.unwrap_err();
        assert_eq!(http_status(err), StatusCode::NOT_FOUND);
        wait_for(|| server.connection_count() == 0).await;

        let (_first, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
        assert_eq!(http_status(err), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_origin_only_rejects_foreign_origin() {
        let server = server_with(
            Settings {
                origin_only: true,
                ..Settings::default()
            },
            |b| b,
        );
        let addr = spawn_server(&server).await;

        let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
        assert_eq!(http_status(err), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_autologin_handshake_starts_session() {
        let server = server_with(
            Settings {
                remember_me: true,
                enable_sql_features: true,
                ..Settings::default()
            },
            |b| b.persistence(std::sync::Arc::new(crate::store::MemoryStore::with_cost(4))),
        );
        let addr = spawn_server(&server).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        assert_eq!(next_json(&mut ws).await, json!({"t": null}));
        send(&mut ws, json!({"A": "0"})).await;
        assert!(next_json(&mut ws).await["ts"].is_string());
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let server = server_with(Settings::default(), |b| b);
        let addr = spawn_server(&server).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        send(&mut ws, json!({"A": "li", "P": {"n": "alice"}})).await;
        next_json(&mut ws).await;

        server.shutdown().unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        assert_eq!(server.user_count(), 0);
    }
}
