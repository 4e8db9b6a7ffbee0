//! Server state and lifecycle
//!
//! `GameServer` is a cheap handle over the shared registries: online users by
//! name and live rooms by name, each behind its own mutex. Sessions call into
//! users and rooms directly; there is no central actor. The lifecycle is
//! built → started ↔ paused → shut down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionClient, CustomActions, DataType};
use crate::callbacks::{NoCallbacks, ServerCallbacks};
use crate::config::Settings;
use crate::error::{AppError, GameError};
use crate::handler::handle_connection;
use crate::recovery::{self, RoomsState};
use crate::room::{NewRoom, Room};
use crate::room_type::{RoomType, RoomTypes};
use crate::store::{FriendsStore, Identity};
use crate::tls;
use crate::types::ConnId;
use crate::user::{LoginRequest, User};

/// State shared by every session, user and room
pub(crate) struct Shared {
    pub(crate) settings: Settings,
    pub(crate) room_types: RoomTypes,
    pub(crate) custom_actions: CustomActions,
    pub(crate) callbacks: Arc<dyn ServerCallbacks>,
    pub(crate) identity: Option<Arc<dyn Identity>>,
    pub(crate) friends_store: Option<Arc<dyn FriendsStore>>,
    /// Online users by name
    pub(crate) users: Mutex<HashMap<String, Arc<User>>>,
    /// Live rooms by name
    pub(crate) rooms: Mutex<HashMap<String, Arc<Room>>>,
    started: AtomicBool,
    paused: AtomicBool,
    stopped: AtomicBool,
    connections: AtomicUsize,
    shutdown: broadcast::Sender<()>,
}

impl Shared {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn online_user(&self, name: &str) -> Option<Arc<User>> {
        self.users.lock().get(name).cloned()
    }

    /// Shutdown signal receiver; `None` once the server has shut down
    pub(crate) fn shutdown_signal(&self) -> Option<broadcast::Receiver<()>> {
        let rx = self.shutdown.subscribe();
        (!self.stopped.load(Ordering::SeqCst)).then_some(rx)
    }

    /// Reserve a connection slot; `None` when `max_connections` is reached
    pub(crate) fn try_connect(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let max = self.settings.max_connections;
        self.connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (max == 0 || current < max).then_some(current + 1)
            })
            .ok()?;
        Some(ConnectionGuard {
            shared: Arc::clone(self),
        })
    }
}

/// Holds one connection slot until dropped
pub(crate) struct ConnectionGuard {
    shared: Arc<Shared>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shared.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Configures a server before it is built
///
/// Room types, custom actions, callbacks and persistence are fixed at
/// `build()`.
pub struct ServerBuilder {
    settings: Settings,
    room_types: RoomTypes,
    custom_actions: CustomActions,
    callbacks: Arc<dyn ServerCallbacks>,
    identity: Option<Arc<dyn Identity>>,
    friends_store: Option<Arc<dyn FriendsStore>>,
}

impl ServerBuilder {
    /// Start from settings; room types declared in them are registered
    pub fn new(settings: Settings) -> Self {
        let mut room_types = RoomTypes::default();
        for (name, config) in &settings.room_types {
            room_types.insert(name.clone(), RoomType::from(config));
        }
        Self {
            settings,
            room_types,
            custom_actions: CustomActions::new(),
            callbacks: Arc::new(NoCallbacks),
            identity: None,
            friends_store: None,
        }
    }

    pub fn room_type(mut self, name: impl Into<String>, room_type: RoomType) -> Self {
        self.room_types.insert(name, room_type);
        self
    }

    pub fn custom_action<F>(mut self, name: impl Into<String>, data_type: DataType, handler: F) -> Self
    where
        F: Fn(Value, &mut ActionClient) + Send + Sync + 'static,
    {
        self.custom_actions.insert(name, data_type, handler);
        self
    }

    pub fn callbacks(mut self, callbacks: impl ServerCallbacks + 'static) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    /// One store serving both accounts and friendships
    pub fn persistence<S>(self, store: Arc<S>) -> Self
    where
        S: Identity + FriendsStore + 'static,
    {
        let identity: Arc<dyn Identity> = store.clone();
        let friends: Arc<dyn FriendsStore> = store;
        self.identity(identity).friends_store(friends)
    }

    pub fn identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn friends_store(mut self, store: Arc<dyn FriendsStore>) -> Self {
        self.friends_store = Some(store);
        self
    }

    pub fn build(self) -> GameServer {
        let sql = self.settings.enable_sql_features;
        if !sql && (self.identity.is_some() || self.friends_store.is_some()) {
            warn!("Persistence was supplied but enable_sql_features is off; ignoring it");
        }
        if sql && (self.identity.is_none() || self.friends_store.is_none()) {
            warn!("enable_sql_features is on but no store was supplied");
        }
        let (shutdown, _) = broadcast::channel(1);
        GameServer {
            shared: Arc::new(Shared {
                room_types: self.room_types,
                custom_actions: self.custom_actions,
                callbacks: self.callbacks,
                identity: self.identity.filter(|_| sql),
                friends_store: self.friends_store.filter(|_| sql),
                users: Mutex::new(HashMap::new()),
                rooms: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                connections: AtomicUsize::new(0),
                shutdown,
                settings: self.settings,
            }),
        }
    }
}

/// Handle to a running (or not yet started) game server
#[derive(Clone)]
pub struct GameServer {
    shared: Arc<Shared>,
}

impl GameServer {
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn room_types(&self) -> &RoomTypes {
        &self.shared.room_types
    }

    pub fn new_room(&self, req: NewRoom) -> Result<Arc<Room>, GameError> {
        Room::create(&self.shared, req)
    }

    pub fn get_room(&self, name: &str) -> Result<Arc<Room>, GameError> {
        self.shared
            .rooms
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| GameError::room_gone(name))
    }

    /// Look up an online user
    pub fn get_user(&self, name: &str) -> Result<Arc<User>, GameError> {
        if self.shared.is_paused() {
            return Err(GameError::ServerPaused);
        }
        self.shared
            .online_user(name)
            .ok_or_else(|| GameError::Unexpected(format!("User '{}' is not logged in", name)))
    }

    pub fn room_count(&self) -> usize {
        self.shared.rooms.lock().len()
    }

    pub fn user_count(&self) -> usize {
        self.shared.users.lock().len()
    }

    /// Live transport sessions, logged in or not
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Log a connection in as a user
    pub fn login(&self, req: LoginRequest) -> Result<(Arc<User>, ConnId), GameError> {
        User::login(&self.shared, req)
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Recover saved rooms, create configured rooms and run `on_start`
    ///
    /// Starting twice does nothing.
    pub fn start(&self) -> Result<(), AppError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let settings = &self.shared.settings;

        if settings.enable_recovery {
            let state = recovery::load(&settings.recovery_file())?;
            for (name, snapshot) in state {
                match Room::restore(&self.shared, &name, snapshot) {
                    Ok(_) => debug!(room = %name, "Room recovered"),
                    Err(e) => warn!(room = %name, error = %e, "Failed to recover room"),
                }
            }
        }

        for config in &settings.rooms {
            if self.shared.rooms.lock().contains_key(&config.name) {
                continue;
            }
            let req = NewRoom::new(config.name.clone(), config.room_type.clone())
                .private(config.private)
                .max_users(config.max_users);
            Room::create(&self.shared, req).map_err(|e| {
                AppError::Config(format!("cannot create room '{}': {}", config.name, e))
            })?;
        }

        self.shared.callbacks.on_start();
        info!(
            rooms = self.room_count(),
            room_types = self.shared.room_types.len(),
            custom_actions = self.shared.custom_actions.len(),
            "Game server started"
        );
        Ok(())
    }

    /// Log every connection out and refuse logins until `resume`
    pub fn pause(&self) {
        if self.shared.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        let users: Vec<Arc<User>> = self.shared.users.lock().drain().map(|(_, user)| user).collect();
        for user in &users {
            let conns = user.drain_connections();
            user.evict(conns);
        }
        self.shared.callbacks.on_pause();
        info!(users = users.len(), "Game server paused");
    }

    pub fn resume(&self) {
        if !self.shared.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.callbacks.on_resume();
        info!("Game server resumed");
    }

    /// Pause, save rooms when recovery is on, and stop the accept loop
    pub fn shutdown(&self) -> Result<(), AppError> {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pause();
        let result = if self.shared.settings.enable_recovery {
            recovery::save(&self.shared.settings.recovery_file(), &self.rooms_state())
        } else {
            Ok(())
        };
        self.shared.callbacks.on_shutdown();
        let _ = self.shared.shutdown.send(());
        info!("Game server shut down");
        result
    }

    /// Snapshot of every live room
    pub fn rooms_state(&self) -> RoomsState {
        let rooms: Vec<Arc<Room>> = self.shared.rooms.lock().values().cloned().collect();
        rooms
            .iter()
            .filter_map(|room| Some((room.name().to_string(), room.snapshot()?)))
            .collect()
    }

    /// Accept WebSocket sessions until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AppError> {
        let settings = &self.shared.settings;
        let acceptor = match (settings.tls, &settings.cert_file, &settings.priv_key_file) {
            (true, Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key)?),
            (true, _, _) => {
                return Err(AppError::Config(
                    "tls requires both cert_file and priv_key_file".to_string(),
                ))
            }
            _ => None,
        };

        let Some(mut shutdown) = self.shared.shutdown_signal() else {
            return Ok(());
        };
        info!(
            addr = %listener.local_addr()?,
            path = settings.endpoint_path(),
            tls = settings.tls,
            "Listening for WebSocket sessions"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Accept loop stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "New TCP connection");
                        let server = self.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            let peer = addr.to_string();
                            let result = match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(stream) => handle_connection(stream, peer.clone(), server).await,
                                    Err(e) => Err(AppError::Io(e)),
                                },
                                None => handle_connection(stream, peer.clone(), server).await,
                            };
                            if let Err(e) = result {
                                warn!(peer = %peer, error = %e, "Connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    /// Bind the configured address, start, and serve
    pub async fn run(&self) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.shared.settings.bind_address()).await?;
        self.start()?;
        self.serve(listener).await
    }
}

impl std::fmt::Debug for GameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameServer")
            .field("started", &self.is_started())
            .field("paused", &self.is_paused())
            .field("users", &self.user_count())
            .field("rooms", &self.room_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoomConfig, RoomTypeConfig};
    use crate::socket::{Outbound, Socket};
    use crate::testing::{drain, login, server_with};
    use crate::user::SessionSlot;
    use rand::Rng;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl ServerCallbacks for Arc<Counting> {
        fn on_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
        fn on_resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn configured() -> Settings {
        let mut settings = Settings::default();
        settings
            .room_types
            .insert("lobby".to_string(), RoomTypeConfig::default());
        settings.rooms.push(RoomConfig {
            name: "hall".to_string(),
            room_type: "lobby".to_string(),
            private: false,
            max_users: 0,
        });
        settings
    }

    #[test]
    fn test_start_creates_configured_rooms() {
        let counting = Arc::new(Counting::default());
        let server = ServerBuilder::new(configured()).callbacks(counting.clone()).build();
        assert!(!server.is_started());
        server.start().unwrap();
        server.start().unwrap();
        assert!(server.is_started());
        assert_eq!(server.room_count(), 1);
        assert_eq!(server.get_room("hall").unwrap().owner(), "server");
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_logs_everyone_out_once() {
        let counting = Arc::new(Counting::default());
        let server = ServerBuilder::new(configured()).callbacks(counting.clone()).build();
        server.start().unwrap();
        let hall = server.get_room("hall").unwrap();
        let (alice, conn, mut alice_rx) = login(&server, "alice");
        let (_bob, _, mut bob_rx) = login(&server, "bob");
        alice.join(&hall, &conn).unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        server.pause();
        server.pause();
        let logout = json!({"c": {"a": "lo", "r": null}});
        assert_eq!(drain(&mut alice_rx), vec![logout.clone()]);
        assert_eq!(drain(&mut bob_rx), vec![logout]);
        assert_eq!(server.user_count(), 0);
        assert_eq!(hall.num_users(), 0);
        assert!(alice.room(&conn).is_none());
        assert_eq!(counting.pauses.load(Ordering::SeqCst), 1);

        let (socket, _rx) = crate::socket::Socket::channel();
        let attempt = server.login(LoginRequest::new("carol", socket, Default::default()));
        assert!(matches!(attempt, Err(GameError::ServerPaused)));
        assert!(matches!(server.get_user("bob"), Err(GameError::ServerPaused)));

        server.resume();
        assert!(!server.is_paused());
        assert_eq!(counting.resumes.load(Ordering::SeqCst), 1);
        login(&server, "carol");
        assert_eq!(server.user_count(), 1);
    }

    #[test]
    fn test_rooms_state_snapshot() {
        let server = server_with(Settings::default(), |b| b.room_type("lobby", RoomType::new()));
        let den = server
            .new_room(NewRoom::new("den", "lobby").private(true).owner("alice").max_users(4))
            .unwrap();
        den.add_invite("bob").unwrap();
        den.set_variable("map", json!("dust")).unwrap();

        let state = server.rooms_state();
        let snapshot = &state["den"];
        assert_eq!(snapshot.t, "lobby");
        assert!(snapshot.p);
        assert_eq!(snapshot.o, "alice");
        assert_eq!(snapshot.m, 4);
        assert_eq!(snapshot.i, vec!["bob".to_string()]);
        assert_eq!(snapshot.v["map"], json!("dust"));
    }

    #[test]
    fn test_shutdown_then_recover() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            enable_recovery: true,
            recovery_location: dir.path().to_path_buf(),
            ..configured()
        };

        let counting = Arc::new(Counting::default());
        let server = ServerBuilder::new(settings.clone()).callbacks(counting.clone()).build();
        server.start().unwrap();
        let den = server
            .new_room(NewRoom::new("den", "lobby").private(true))
            .unwrap();
        den.add_invite("bob").unwrap();
        server.shutdown().unwrap();
        server.shutdown().unwrap();
        assert_eq!(counting.shutdowns.load(Ordering::SeqCst), 1);
        assert!(settings.recovery_file().exists());

        let revived = ServerBuilder::new(settings).build();
        revived.start().unwrap();
        assert_eq!(revived.room_count(), 2);
        let den = revived.get_room("den").unwrap();
        assert!(den.is_private());
        assert_eq!(den.invite_list().unwrap(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_connection_cap() {
        let settings = Settings {
            max_connections: 2,
            ..Settings::default()
        };
        let server = ServerBuilder::new(settings).build();
        let first = server.shared().try_connect().unwrap();
        let _second = server.shared().try_connect().unwrap();
        assert!(server.shared().try_connect().is_none());
        assert_eq!(server.connection_count(), 2);
        drop(first);
        assert!(server.shared().try_connect().is_some());
    }

    #[test]
    fn test_store_ignored_without_sql_features() {
        let store = Arc::new(crate::store::MemoryStore::with_cost(4));
        let server = ServerBuilder::new(Settings::default()).persistence(store).build();
        assert!(server.shared().identity.is_none());
        assert!(server.shared().friends_store.is_none());
    }

    #[test]
    fn test_get_user() {
        let server = server_with(Settings::default(), |b| b);
        login(&server, "alice");
        assert_eq!(server.get_user("alice").unwrap().name(), "alice");
        assert_eq!(
            server.get_user("bob").unwrap_err().to_string(),
            "User 'bob' is not logged in"
        );
    }

    /// Pauses the server from inside `on_login`
    #[derive(Default)]
    struct PauseOnLogin {
        server: Mutex<Option<GameServer>>,
    }

    impl ServerCallbacks for Arc<PauseOnLogin> {
        fn on_login(&self, _name: &str, _database_id: i64) -> bool {
            let server = self.server.lock().clone();
            if let Some(server) = server {
                server.pause();
            }
            true
        }
    }

    #[test]
    fn test_pause_during_login_refuses_it() {
        let hook = Arc::new(PauseOnLogin::default());
        let server = server_with(Settings::default(), |b| b.callbacks(hook.clone()));
        *hook.server.lock() = Some(server.clone());

        let (socket, mut rx) = Socket::channel();
        let attempt = server.login(LoginRequest::new("alice", socket, SessionSlot::new()));
        assert!(matches!(attempt, Err(GameError::ServerPaused)));
        assert!(server.is_paused());
        assert_eq!(server.user_count(), 0);
        assert!(drain(&mut rx).is_empty());

        hook.server.lock().take();
    }

    /// Every registered user has a connection, and room pointers and room
    /// members agree in both directions
    fn assert_consistent(server: &GameServer) {
        let users: Vec<Arc<User>> = server.shared().users.lock().values().cloned().collect();
        let rooms: Vec<Arc<Room>> = server.shared().rooms.lock().values().cloned().collect();

        for user in &users {
            assert!(user.num_connections() >= 1, "{} has no connections", user.name());
            for conn in user.connection_ids() {
                let Some(room) = user.room(&conn) else {
                    continue;
                };
                assert!(rooms.iter().any(|r| Arc::ptr_eq(r, &room)), "{} is in a dead room", user.name());
                let member = room.member(user.name()).unwrap();
                assert!(Arc::ptr_eq(member.user(), user));
                assert!(member.connection_ids().contains(&conn));
            }
        }

        for room in &rooms {
            for name in room.user_names().unwrap() {
                let member = room.member(&name).unwrap();
                let user = users
                    .iter()
                    .find(|user| user.name() == name)
                    .unwrap_or_else(|| panic!("{name} is in {} but offline", room.name()));
                assert!(Arc::ptr_eq(member.user(), user));
                for conn in member.connection_ids() {
                    let current = user.room(&conn).unwrap();
                    assert!(Arc::ptr_eq(&current, room));
                }
            }
        }
    }

    #[test]
    fn test_concurrent_sessions_keep_registries_consistent() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;
        const ROOMS: [&str; 3] = ["hall", "arena", "den"];

        let settings = Settings {
            multi_connect: true,
            ..configured()
        };
        let server = server_with(settings, |b| b);
        server.new_room(NewRoom::new("arena", "lobby")).unwrap();
        server.new_room(NewRoom::new("den", "lobby").owner("p0")).unwrap();

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let server = server.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut conns: Vec<(Arc<User>, ConnId, UnboundedReceiver<Outbound>)> = Vec::new();
                    for _ in 0..ROUNDS {
                        let name = format!("p{}", rng.gen_range(0..4));
                        let room_name = ROOMS[rng.gen_range(0..ROOMS.len())];
                        match rng.gen_range(0..100) {
                            0..=24 => {
                                let (socket, rx) = Socket::channel();
                                let req = LoginRequest::new(name, socket, SessionSlot::new());
                                if let Ok((user, conn)) = server.login(req) {
                                    conns.push((user, conn, rx));
                                }
                            }
                            25..=49 if !conns.is_empty() => {
                                let (user, conn, _) = &conns[rng.gen_range(0..conns.len())];
                                if let Ok(room) = server.get_room(room_name) {
                                    let _ = user.join(&room, conn);
                                }
                            }
                            50..=64 if !conns.is_empty() => {
                                let (user, conn, _) = &conns[rng.gen_range(0..conns.len())];
                                let _ = user.leave(conn);
                            }
                            65..=79 if !conns.is_empty() => {
                                let (user, conn, _) = conns.swap_remove(rng.gen_range(0..conns.len()));
                                user.logout(&conn);
                            }
                            80..=87 => {
                                if let Ok(user) = server.get_user(&name) {
                                    user.kick();
                                }
                            }
                            88..=96 => {
                                if let Ok(room) = server.get_room(room_name) {
                                    let _ = room.delete();
                                }
                                let owner = if room_name == "den" { "p0" } else { "" };
                                let _ = server.new_room(NewRoom::new(room_name, "lobby").owner(owner));
                            }
                            97..=99 => {
                                server.pause();
                                server.resume();
                            }
                            _ => {}
                        }
                        for (_, _, rx) in conns.iter_mut() {
                            while rx.try_recv().is_ok() {}
                        }
                    }
                })
            })
            .collect();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let panicked = workers
                .into_iter()
                .map(std::thread::JoinHandle::join)
                .filter(Result::is_err)
                .count();
            let _ = done_tx.send(panicked);
        });
        let panicked = done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("workers did not finish; lock order deadlock");
        assert_eq!(panicked, 0);

        assert!(!server.is_paused());
        assert_consistent(&server);

        server.pause();
        assert_eq!(server.user_count(), 0);
        for name in ROOMS {
            if let Ok(room) = server.get_room(name) {
                assert_eq!(room.num_users(), 0);
            }
        }
    }
}
