use resumer_core::directory::InMemoryDirectory;
use resumer_core::framing::{read_frame, write_frame};
use resumer_core::protocol::{RequestEnvelope, ResponseFrame, Trailers};
use resumer_core::{ReplicaCore, ResumerClient, ResumerConfig, StaticAccessGate};
use resumer_traits::{AccessLevel, Credentials, OwnershipDirectory, RedirectTarget, ResumerError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

struct Replica {
    address: String,
    core: ReplicaCore,
    _shutdown: broadcast::Sender<()>,
}

impl Replica {
    fn client(&self, credentials: Credentials) -> ResumerClient {
        ResumerClient::new(self.address.clone())
            .with_credentials(credentials)
            .with_connect_timeout(Duration::from_secs(2))
    }
}

fn gate() -> StaticAccessGate {
    StaticAccessGate::new()
        .with_api_key("agent-key")
        .with_token("tok-alice", "alice")
        .with_grant("alice", "a", AccessLevel::Reader)
        .with_grant("alice", "c", AccessLevel::Reader)
        .with_grant("alice", "w", AccessLevel::Writer)
}

fn agent() -> Credentials {
    Credentials::api_key("agent-key")
}

fn alice() -> Credentials {
    Credentials::bearer("tok-alice")
}

async fn spawn_replica(directory: Arc<dyn OwnershipDirectory>, enabled: bool) -> Replica {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bound = listener.local_addr().unwrap();

    let mut config = ResumerConfig::default();
    config.server.enabled = enabled;
    config.recording.record_idle_timeout_secs = 5;

    let advertised = RedirectTarget::new("127.0.0.1", bound.port()).unwrap();
    let core = ReplicaCore::with_parts(&config, directory, Arc::new(gate()), advertised);
    let server = core.server(listener, &config);

    let (shutdown, receiver) = broadcast::channel(1);
    tokio::spawn(server.run(receiver));

    Replica {
        address: bound.to_string(),
        core,
        _shutdown: shutdown,
    }
}

async fn replica_pair() -> (Replica, Replica) {
    let directory: Arc<dyn OwnershipDirectory> = Arc::new(InMemoryDirectory::new());
    let a = spawn_replica(directory.clone(), true).await;
    let b = spawn_replica(directory, true).await;
    (a, b)
}

#[tokio::test]
async fn test_replay_from_other_replica_follows_live_recording() {
    let (a, b) = replica_pair().await;

    let mut session = a.client(agent()).record("w").await.unwrap();
    session.send("H").await.unwrap();
    session.send("e").await.unwrap();

    let reader_client = b.client(alice());
    let registry = a.core.registry.clone();
    let reader = tokio::spawn(async move {
        let mut stream = reader_client.replay("w", 0).await.unwrap();
        let mut text = stream.next().await.unwrap().unwrap();
        let received_while_recording = !registry.get("w").unwrap().is_complete();
        while let Some(token) = stream.next().await.unwrap() {
            text.push_str(&token);
        }
        (received_while_recording, text, stream.position())
    });

    for token in ["l", "l", "o"] {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.send(token).await.unwrap();
    }
    let ack = session.complete().await.unwrap();
    assert_eq!(ack.position, 5);

    let (received_while_recording, text, position) = reader.await.unwrap();
    assert!(received_while_recording);
    assert_eq!(text, "Hello");
    assert_eq!(position, 5);
}

#[tokio::test]
async fn test_replay_resumes_from_position() {
    let (a, b) = replica_pair().await;

    let mut session = a.client(agent()).record("w").await.unwrap();
    for token in ["one ", "two ", "three"] {
        session.send(token).await.unwrap();
    }

    let mut stream = b.client(alice()).replay("w", 0).await.unwrap();
    assert_eq!(stream.next().await.unwrap().as_deref(), Some("one "));
    assert_eq!(stream.position(), 1);
    drop(stream);

    let reader = a.client(alice()).replay("w", 1).await.unwrap();
    session.complete().await.unwrap();
    assert_eq!(reader.collect().await.unwrap(), ["two ", "three"]);

    // Completed recordings stay replayable on the owner for a while.
    let tail = a.client(alice()).replay("w", 2).await.unwrap();
    assert_eq!(tail.collect().await.unwrap(), ["three"]);
}

#[tokio::test]
async fn test_cancel_round_trip_through_redirect() {
    let (a, b) = replica_pair().await;

    let mut session = a.client(agent()).record("w").await.unwrap();
    let ack = session.send("partial").await.unwrap();
    assert!(!ack.cancel_requested);

    assert!(b.client(alice()).cancel("w").await.unwrap());
    assert!(!a.client(alice()).cancel("w").await.unwrap());

    let ack = session.send("more").await.unwrap();
    assert!(ack.cancel_requested);
    assert!(session.cancel_requested());
    session.complete().await.unwrap();

    assert!(!b.client(alice()).cancel("w").await.unwrap());
    assert!(!a.client(alice()).cancel("w").await.unwrap());
}

#[tokio::test]
async fn test_check_filters_by_access_and_activity() {
    let (a, b) = replica_pair().await;

    let _recording_a = a.client(agent()).record("a").await.unwrap();
    let _recording_b = a.client(agent()).record("b").await.unwrap();

    let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    assert_eq!(b.client(alice()).check(&ids).await.unwrap(), ["a"]);
    assert_eq!(a.client(alice()).check(&ids).await.unwrap(), ["a"]);
    assert_eq!(b.client(agent()).check(&ids).await.unwrap(), ["a", "b"]);

    assert!(b.client(alice()).has_response_in_progress("a").await.unwrap());
    assert!(!b.client(alice()).has_response_in_progress("c").await.unwrap());
}

#[tokio::test]
async fn test_ingestion_disconnect_completes_recording() {
    let (a, _b) = replica_pair().await;

    let mut session = a.client(agent()).record("w").await.unwrap();
    session.send("x").await.unwrap();

    let reader = a.client(alice()).replay("w", 0).await.unwrap();
    drop(session);

    let tokens = tokio::time::timeout(Duration::from_secs(5), reader.collect())
        .await
        .expect("replay should end after the producer disconnects")
        .unwrap();
    assert_eq!(tokens, ["x"]);
    assert!(!a.core.registry.has_response_in_progress("w"));
}

#[tokio::test]
async fn test_second_recorder_is_rejected() {
    let (a, b) = replica_pair().await;

    let _session = a.client(agent()).record("w").await.unwrap();
    let err = b.client(agent()).record("w").await.err().unwrap();
    assert_eq!(
        err,
        ResumerError::AlreadyOwnedElsewhere {
            conversation_id: "w".to_string(),
            owner_address: a.address.clone(),
        }
    );
}

#[tokio::test]
async fn test_replaced_producer_is_told_its_tokens_were_dropped() {
    let (a, _b) = replica_pair().await;

    let mut old = a.client(agent()).record("w").await.unwrap();
    old.send("old-1").await.unwrap();

    let mut new = a.client(agent()).record("w").await.unwrap();
    new.send("new-1").await.unwrap();

    let err = old.send("old-2").await.unwrap_err();
    assert!(
        matches!(&err, ResumerError::Protocol(message) if message.contains("superseded")),
        "unexpected error: {err:?}"
    );
    assert!(old.send("old-3").await.is_err());

    let live = a.core.registry.active("w").unwrap();
    assert_eq!(live.text(), "new-1");

    new.send("new-2").await.unwrap();
    new.complete().await.unwrap();
    let tokens = a.client(alice()).replay("w", 0).await.unwrap().collect().await.unwrap();
    assert_eq!(tokens, vec!["new-1", "new-2"]);
}

#[tokio::test]
async fn test_access_errors_are_not_retried() {
    let (a, _b) = replica_pair().await;

    let anonymous = a.client(Credentials::default());
    assert_eq!(
        anonymous.cancel("w").await.unwrap_err(),
        ResumerError::Unauthenticated
    );
    assert!(matches!(
        a.client(alice()).record("a").await.err().unwrap(),
        ResumerError::AccessDenied(_)
    ));
    assert!(matches!(
        a.client(alice()).cancel("b").await.unwrap_err(),
        ResumerError::NotFound(_)
    ));
    // IsEnabled needs no credentials.
    assert!(anonymous.is_enabled().await.unwrap());
}

#[tokio::test]
async fn test_disabled_replica() {
    let directory: Arc<dyn OwnershipDirectory> = Arc::new(InMemoryDirectory::new());
    let replica = spawn_replica(directory, false).await;

    assert!(!replica.client(agent()).is_enabled().await.unwrap());
    assert_eq!(
        replica.client(agent()).record("w").await.err().unwrap(),
        ResumerError::Disabled
    );
    let replay = replica.client(agent()).replay("w", 0).await.unwrap();
    assert!(replay.collect().await.unwrap().is_empty());
    assert_eq!(
        replica.client(agent()).cancel("w").await.unwrap_err(),
        ResumerError::Disabled
    );
    assert!(
        replica
            .client(agent())
            .check(&["w".to_string()])
            .await
            .unwrap()
            .is_empty()
    );
}

#[derive(Debug, Clone, PartialEq)]
struct Hop {
    replica: usize,
    hop: u8,
    api_key: Option<String>,
}

/// Four fake replicas, each redirecting to the next.
async fn spawn_redirect_chain() -> (Vec<SocketAddr>, Vec<Arc<AtomicUsize>>, Arc<std::sync::Mutex<Vec<Hop>>>) {
    let mut listeners = Vec::new();
    for _ in 0..4 {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let addresses: Vec<SocketAddr> = listeners
        .iter()
        .map(|listener| listener.local_addr().unwrap())
        .collect();
    let hits: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    for (index, listener) in listeners.into_iter().enumerate() {
        let next = RedirectTarget::new("127.0.0.1", addresses[(index + 1) % 4].port()).unwrap();
        let hits = hits[index].clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                hits.fetch_add(1, Ordering::SeqCst);
                let envelope: RequestEnvelope = read_frame(&mut stream).await.unwrap();
                seen.lock().unwrap().push(Hop {
                    replica: index,
                    hop: envelope.hop,
                    api_key: envelope.credentials.api_key.clone(),
                });
                write_frame(&mut stream, &ResponseFrame::Trailers(Trailers::redirect(&next)))
                    .await
                    .unwrap();
            }
        });
    }
    (addresses, hits, seen)
}

#[tokio::test]
async fn test_redirect_chain_stops_after_three_hops() {
    let (addresses, hits, seen) = spawn_redirect_chain().await;

    let client = ResumerClient::new(addresses[0].to_string()).with_credentials(agent());
    let err = client.cancel("c1").await.unwrap_err();
    assert_eq!(err, ResumerError::RedirectLoop { hops: 3 });

    let counts: Vec<usize> = hits.iter().map(|hit| hit.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, [1, 1, 1, 0]);

    let seen = seen.lock().unwrap().clone();
    let expected: Vec<Hop> = (0..3)
        .map(|index| Hop {
            replica: index,
            hop: index as u8,
            api_key: Some("agent-key".to_string()),
        })
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_replay_redirect_chain_is_bounded() {
    let (addresses, hits, _seen) = spawn_redirect_chain().await;

    let client = ResumerClient::new(addresses[1].to_string()).with_credentials(agent());
    let err = client.replay("c1", 0).await.err().unwrap();
    assert_eq!(err, ResumerError::RedirectLoop { hops: 3 });
    assert_eq!(hits[0].load(Ordering::SeqCst), 0);
}
