//! Client integration tests
//!
//! These run the real rendezvous server in-process and connect real
//! clients to it over loopback TCP. Only the NAT-traversal transport is
//! mocked: a scripted transport records the signaling operations applied
//! to it and lets the tests inject transport events.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rendezvous_server::{Server, ServerConfig, ServerHandle};
use session_client::{
    ClientConfig, IceError, IceEvent, IceFactory, IceState, IceTransport, LobbyListEntry,
    SessionCallbacks, SessionClient,
};
use session_wire::{ErrorCode, Packet, RelayDirectory};

// ============================================================================
// Scripted ICE transport
// ============================================================================

#[derive(Default)]
struct MockIceInner {
    queue: VecDeque<IceEvent>,
    local_calls: u32,
    gather_calls: u32,
    remote_descriptions: Vec<String>,
    remote_candidates: Vec<String>,
    remote_done: bool,
    sent: Vec<Vec<u8>>,
}

#[derive(Clone, Default)]
struct MockHandle(Arc<Mutex<MockIceInner>>);

impl MockHandle {
    fn push(&self, event: IceEvent) {
        self.0.lock().unwrap().queue.push_back(event);
    }

    fn remote_descriptions(&self) -> Vec<String> {
        self.0.lock().unwrap().remote_descriptions.clone()
    }

    fn remote_candidates(&self) -> Vec<String> {
        self.0.lock().unwrap().remote_candidates.clone()
    }

    fn remote_done(&self) -> bool {
        self.0.lock().unwrap().remote_done
    }

    fn local_calls(&self) -> u32 {
        self.0.lock().unwrap().local_calls
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().sent.clone()
    }
}

struct MockIce {
    handle: MockHandle,
    state: IceState,
}

impl IceTransport for MockIce {
    fn local_description(&mut self) -> Result<String, IceError> {
        let mut inner = self.handle.0.lock().unwrap();
        inner.local_calls += 1;
        Ok(format!("v=0 local-{}", inner.local_calls))
    }

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), IceError> {
        self.handle.0.lock().unwrap().remote_descriptions.push(sdp.to_string());
        Ok(())
    }

    fn gather_candidates(&mut self) -> Result<(), IceError> {
        self.handle.0.lock().unwrap().gather_calls += 1;
        Ok(())
    }

    fn add_remote_candidate(&mut self, sdp: &str) -> Result<(), IceError> {
        self.handle.0.lock().unwrap().remote_candidates.push(sdp.to_string());
        Ok(())
    }

    fn remote_gathering_done(&mut self) {
        self.handle.0.lock().unwrap().remote_done = true;
    }

    fn send(&mut self, data: &[u8]) -> Result<(), IceError> {
        self.handle.0.lock().unwrap().sent.push(data.to_vec());
        Ok(())
    }

    fn state(&self) -> IceState {
        self.state
    }

    fn poll_event(&mut self) -> Option<IceEvent> {
        let event = self.handle.0.lock().unwrap().queue.pop_front();
        if let Some(IceEvent::StateChanged(state)) = &event {
            self.state = *state;
        }
        event
    }
}

/// Factory recording every transport it hands out.
struct MockFactory {
    created: Arc<Mutex<Vec<MockHandle>>>,
}

impl MockFactory {
    fn new() -> (MockFactory, Arc<Mutex<Vec<MockHandle>>>) {
        let created = Arc::new(Mutex::new(Vec::new()));
        (MockFactory { created: Arc::clone(&created) }, created)
    }
}

impl IceFactory for MockFactory {
    fn create(&self, _relays: &RelayDirectory) -> Result<Box<dyn IceTransport>, IceError> {
        let handle = MockHandle::default();
        self.created.lock().unwrap().push(handle.clone());
        Ok(Box::new(MockIce { handle, state: IceState::New }))
    }
}

fn first_mock(created: &Arc<Mutex<Vec<MockHandle>>>) -> Option<MockHandle> {
    created.lock().unwrap().first().cloned()
}

// ============================================================================
// Recording callbacks
// ============================================================================

#[derive(Default)]
struct Recorder {
    connected: Option<u64>,
    disconnected: Vec<bool>,
    lobby_created: Vec<u64>,
    lobby_joined: Vec<(u64, u64)>,
    lobby_left: Vec<(u64, u64)>,
    list: Vec<LobbyListEntry>,
    list_finished: u32,
    received: Vec<(u64, Vec<u8>)>,
    errors: Vec<(ErrorCode, u64)>,
    peer_connected: Vec<u64>,
    peer_disconnected: Vec<u64>,
}

impl SessionCallbacks for Recorder {
    fn on_connected(&mut self, user_id: u64) {
        self.connected = Some(user_id);
    }
    fn on_disconnected(&mut self, intentional: bool) {
        self.disconnected.push(intentional);
    }
    fn on_lobby_created(
        &mut self,
        lobby_id: u64,
        _game: &str,
        _version: &str,
        _host_name: &str,
        _mode: &str,
        _max_connections: u64,
    ) {
        self.lobby_created.push(lobby_id);
    }
    fn on_lobby_joined(&mut self, lobby_id: u64, user_id: u64, _owner_id: u64, _dest_id: u64) {
        self.lobby_joined.push((lobby_id, user_id));
    }
    fn on_lobby_left(&mut self, lobby_id: u64, user_id: u64) {
        self.lobby_left.push((lobby_id, user_id));
    }
    fn on_lobby_list_got(&mut self, entry: &LobbyListEntry) {
        self.list.push(entry.clone());
    }
    fn on_lobby_list_finish(&mut self) {
        self.list_finished += 1;
    }
    fn on_received(&mut self, from: u64, data: &[u8]) {
        self.received.push((from, data.to_vec()));
    }
    fn on_error(&mut self, code: ErrorCode, tag: u64) {
        self.errors.push((code, tag));
    }
    fn on_peer_connected(&mut self, peer_id: u64) {
        self.peer_connected.push(peer_id);
    }
    fn on_peer_disconnected(&mut self, peer_id: u64) {
        self.peer_disconnected.push(peer_id);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn start_server() -> (ServerHandle, SocketAddr) {
    let mut config = ServerConfig::default();
    config.port = 0;
    config.sweep_interval = Duration::from_millis(20);
    let handle = Server::bind(config).expect("bind failed").start().expect("start failed");
    let addr = SocketAddr::new("127.0.0.1".parse().unwrap(), handle.local_addr().port());
    (handle, addr)
}

fn test_client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.poll_interval = Duration::from_millis(10);
    config
}

fn connect(addr: SocketAddr) -> (SessionClient, Arc<Mutex<Vec<MockHandle>>>) {
    let (factory, created) = MockFactory::new();
    let client = SessionClient::connect(addr, Box::new(factory), test_client_config())
        .expect("client connect failed");
    (client, created)
}

/// Poll `step` (which should pump the involved clients) until it reports
/// success or the timeout elapses.
fn wait_for(mut step: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn handshake(client: &SessionClient, recorder: &mut Recorder) -> u64 {
    assert!(
        wait_for(
            || {
                client.update(recorder);
                recorder.connected.is_some()
            },
            Duration::from_secs(3),
        ),
        "handshake timed out"
    );
    recorder.connected.unwrap()
}

fn create_lobby(client: &SessionClient, recorder: &mut Recorder, password: &str) -> u64 {
    client.lobby_create("game1", "v1", "Alice", "ffa", 4, password, "");
    assert!(
        wait_for(
            || {
                client.update(recorder);
                !recorder.lobby_created.is_empty()
            },
            Duration::from_secs(3),
        ),
        "lobby creation timed out"
    );
    recorder.lobby_created[0]
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_handshake_and_intentional_disconnect() {
    let (server, addr) = start_server();
    let (client, _mocks) = connect(addr);
    let mut recorder = Recorder::default();

    let user_id = handshake(&client, &mut recorder);
    assert_ne!(user_id, 0);
    assert_eq!(client.user_id(), user_id);
    assert!(client.is_connected());

    client.disconnect();
    client.update(&mut recorder);
    assert_eq!(recorder.disconnected, vec![true]);
    assert!(!client.is_connected());

    server.shutdown();
}

#[test]
fn test_version_mismatch_is_fatal() {
    // Hand-rolled fake server that greets with the wrong protocol version.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let greeter = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let bytes = Packet::Joined { user_id: 5, version: 9999 }.encode().unwrap();
        stream.write_all(&bytes).unwrap();
        // Hold the socket open; the client must drop us, not the reverse.
        thread::sleep(Duration::from_millis(500));
    });

    let (client, _mocks) = connect(addr);
    let mut recorder = Recorder::default();

    assert!(wait_for(
        || {
            client.update(&mut recorder);
            !recorder.disconnected.is_empty()
        },
        Duration::from_secs(3),
    ));
    assert_eq!(recorder.disconnected, vec![false]);
    assert_eq!(recorder.connected, None);
    assert!(!client.is_connected());

    greeter.join().unwrap();
}

#[test]
fn test_reentrant_update_is_rejected() {
    let (server, addr) = start_server();
    let (client, _mocks) = connect(addr);
    let client = Arc::new(client);

    struct Reentrant {
        client: Arc<SessionClient>,
        inner_result: Option<bool>,
    }
    impl SessionCallbacks for Reentrant {
        fn on_connected(&mut self, _user_id: u64) {
            let mut noop = Recorder::default();
            self.inner_result = Some(self.client.update(&mut noop));
        }
    }

    let mut callbacks = Reentrant { client: Arc::clone(&client), inner_result: None };
    assert!(wait_for(
        || {
            client.update(&mut callbacks);
            callbacks.inner_result.is_some()
        },
        Duration::from_secs(3),
    ));
    assert_eq!(callbacks.inner_result, Some(false));

    drop(callbacks);
    server.shutdown();
}

#[test]
fn test_semantic_error_surfaces_without_disconnect() {
    let (server, addr) = start_server();
    let (client, _mocks) = connect(addr);
    let mut recorder = Recorder::default();
    handshake(&client, &mut recorder);

    client.lobby_join(0xDEAD_BEEF, "");
    assert!(wait_for(
        || {
            client.update(&mut recorder);
            !recorder.errors.is_empty()
        },
        Duration::from_secs(3),
    ));
    assert_eq!(recorder.errors[0], (ErrorCode::LobbyNotFound, 0xDEAD_BEEF));
    assert!(client.is_connected());
    assert!(recorder.disconnected.is_empty());

    server.shutdown();
}

#[test]
fn test_lobby_list_round_trip() {
    let (server, addr) = start_server();
    let (owner, _owner_mocks) = connect(addr);
    let mut owner_rec = Recorder::default();
    handshake(&owner, &mut owner_rec);
    create_lobby(&owner, &mut owner_rec, "");

    let (seeker, _seeker_mocks) = connect(addr);
    let mut seeker_rec = Recorder::default();
    handshake(&seeker, &mut seeker_rec);

    seeker.lobby_list("game1", "");
    assert!(wait_for(
        || {
            seeker.update(&mut seeker_rec);
            seeker_rec.list_finished > 0
        },
        Duration::from_secs(3),
    ));
    assert_eq!(seeker_rec.list.len(), 1);
    assert_eq!(seeker_rec.list[0].game, "game1");
    assert_eq!(seeker_rec.list[0].connections, 1);

    server.shutdown();
}

#[test]
fn test_full_peer_session_flow() {
    let (server, addr) = start_server();
    let (a, a_mocks) = connect(addr);
    let (b, b_mocks) = connect(addr);
    let mut ra = Recorder::default();
    let mut rb = Recorder::default();

    let id_a = handshake(&a, &mut ra);
    let id_b = handshake(&b, &mut rb);

    let lobby_id = create_lobby(&a, &mut ra, "");
    b.lobby_join(lobby_id, "");

    // Both sides learn about each other and spin up one peer session each.
    assert!(wait_for(
        || {
            a.update(&mut ra);
            b.update(&mut rb);
            ra.lobby_joined.contains(&(lobby_id, id_b))
                && rb.lobby_joined.contains(&(lobby_id, id_a))
                && a.peer_count() == 1
                && b.peer_count() == 1
        },
        Duration::from_secs(3),
    ));

    let mock_a = first_mock(&a_mocks).unwrap();
    let mock_b = first_mock(&b_mocks).unwrap();

    // The controller is the larger identifier; it must have produced the
    // offer without any coordination round.
    let (controller, controlled, mock_ctrl, mock_ctld, ctld_id) = if id_a > id_b {
        (&a, &b, &mock_a, &mock_b, id_b)
    } else {
        (&b, &a, &mock_b, &mock_a, id_a)
    };
    let (mut r_ctrl, mut r_ctld) = (Recorder::default(), Recorder::default());
    assert!(mock_ctrl.local_calls() >= 1, "controller never produced an offer");

    // Offer reaches the controlled side, which answers; the answer reaches
    // the controller.
    assert!(wait_for(
        || {
            controller.update(&mut r_ctrl);
            controlled.update(&mut r_ctld);
            !mock_ctld.remote_descriptions().is_empty()
                && !mock_ctrl.remote_descriptions().is_empty()
        },
        Duration::from_secs(3),
    ));
    assert!(mock_ctld.local_calls() >= 1, "controlled side never answered");

    // Candidate and gathering-done relay.
    mock_ctrl.push(IceEvent::CandidateFound("a=candidate:ctrl-1".into()));
    mock_ctrl.push(IceEvent::GatheringDone);
    assert!(wait_for(
        || {
            controller.update(&mut r_ctrl);
            controlled.update(&mut r_ctld);
            mock_ctld.remote_candidates() == vec!["a=candidate:ctrl-1".to_string()]
                && mock_ctld.remote_done()
        },
        Duration::from_secs(3),
    ));

    // Transport comes up on both ends: edge-triggered notifications fire.
    mock_ctrl.push(IceEvent::StateChanged(IceState::Connected));
    mock_ctld.push(IceEvent::StateChanged(IceState::Connected));
    assert!(wait_for(
        || {
            controller.update(&mut r_ctrl);
            controlled.update(&mut r_ctld);
            !r_ctrl.peer_connected.is_empty() && !r_ctld.peer_connected.is_empty()
        },
        Duration::from_secs(3),
    ));

    // A second Connected report (and the Completed refinement) do not
    // re-fire the notification.
    mock_ctrl.push(IceEvent::StateChanged(IceState::Completed));
    thread::sleep(Duration::from_millis(100));
    controller.update(&mut r_ctrl);
    assert_eq!(r_ctrl.peer_connected.len(), 1);

    // Data flows peer-to-peer once connected.
    assert!(controller.peer_send_to(ctld_id, b"ping"));
    assert_eq!(mock_ctrl.sent(), vec![b"ping".to_vec()]);
    mock_ctrl.push(IceEvent::DataReceived(b"pong".to_vec()));
    assert!(wait_for(
        || {
            controller.update(&mut r_ctrl);
            r_ctrl.received.iter().any(|(from, data)| *from == ctld_id && data == b"pong")
        },
        Duration::from_secs(3),
    ));

    // Transport failure fires the disconnected edge exactly once.
    mock_ctrl.push(IceEvent::StateChanged(IceState::Failed));
    assert!(wait_for(
        || {
            controller.update(&mut r_ctrl);
            r_ctrl.peer_disconnected.len() == 1
        },
        Duration::from_secs(3),
    ));

    server.shutdown();
}

#[test]
fn test_stalled_peer_is_reported_and_evicted() {
    let (server, addr) = start_server();

    let mut config = test_client_config();
    config.peer_failure_timeout = Duration::from_millis(200);

    let (factory_a, _a_mocks) = MockFactory::new();
    let a = SessionClient::connect(addr, Box::new(factory_a), config.clone()).unwrap();
    let (factory_b, _b_mocks) = MockFactory::new();
    let b = SessionClient::connect(addr, Box::new(factory_b), config).unwrap();

    let mut ra = Recorder::default();
    let mut rb = Recorder::default();
    let id_b = {
        handshake(&a, &mut ra);
        handshake(&b, &mut rb)
    };

    let lobby_id = create_lobby(&a, &mut ra, "");
    b.lobby_join(lobby_id, "");

    assert!(wait_for(
        || {
            a.update(&mut ra);
            b.update(&mut rb);
            a.peer_count() == 1 && b.peer_count() == 1
        },
        Duration::from_secs(3),
    ));

    // The transports never connect. A joined first (lower priority), so A
    // reports B; the server validates the priorities and evicts B.
    assert!(wait_for(
        || {
            a.update(&mut ra);
            b.update(&mut rb);
            ra.lobby_left.contains(&(lobby_id, id_b))
                && rb.lobby_left.contains(&(lobby_id, id_b))
        },
        Duration::from_secs(5),
    ));

    assert_eq!(b.current_lobby_id(), 0);
    assert_eq!(b.peer_count(), 0);
    assert_eq!(a.peer_count(), 0);
    assert_eq!(a.current_lobby_id(), lobby_id);

    server.shutdown();
}
