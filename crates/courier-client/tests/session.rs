use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
    WriteHalf,
};
use tokio::sync::watch;
use tokio::time::timeout;

use courier_client::{
    AppPhase, ClientConfig, ClientError, LinkState, SendOutcome, Session, SessionEvent,
};
use courier_rpc::{RpcClient, RpcError};
use courier_shared::types::Recipient;
use courier_shared::ConversationKey;
use courier_store::{Database, MessageStatus, StoreEvent};

const WAIT: Duration = Duration::from_secs(5);

struct FakeDaemon {
    requests: Lines<BufReader<ReadHalf<DuplexStream>>>,
    out: WriteHalf<DuplexStream>,
}

impl FakeDaemon {
    async fn expect(&mut self, method: &str) -> Value {
        let line = timeout(WAIT, self.requests.next_line())
            .await
            .expect("request in time")
            .expect("read request")
            .expect("request line");
        let request: Value = serde_json::from_str(&line).expect("request is JSON");
        assert_eq!(request["method"], method, "unexpected request {request}");
        request
    }

    async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await;
    }

    async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    async fn notify(&mut self, envelope: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": "receive", "params": {"envelope": envelope}}))
            .await;
    }

    async fn send(&mut self, value: Value) {
        self.send_lines(&[value]).await;
    }

    /// Write several frames in a single write.
    async fn send_lines(&mut self, values: &[Value]) {
        let mut raw = String::new();
        for value in values {
            raw.push_str(&value.to_string());
            raw.push('\n');
        }
        self.out.write_all(raw.as_bytes()).await.unwrap();
        self.out.flush().await.unwrap();
    }
}

fn test_config() -> ClientConfig {
    ClientConfig {
        device_name: "courier-test".into(),
        link_success_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

fn session_with_daemon() -> (Arc<Session>, FakeDaemon) {
    let config = test_config();
    let (client_io, daemon_io) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (daemon_read, daemon_write) = split(daemon_io);

    let rpc = RpcClient::from_streams(client_read, client_write, config.daemon_config());
    let db = Database::open_in_memory().unwrap();
    let session = Arc::new(Session::with_parts(config, rpc, db));

    let daemon = FakeDaemon {
        requests: BufReader::new(daemon_read).lines(),
        out: daemon_write,
    };
    (session, daemon)
}

/// Start the session against a daemon that already has an account.
async fn started_in_chat() -> (Arc<Session>, FakeDaemon) {
    let (session, mut daemon) = session_with_daemon();
    let start = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let request = daemon.expect("listAccounts").await;
    daemon
        .reply(&request, json!([{"number": "+15550000000"}]))
        .await;
    timeout(WAIT, start).await.unwrap().unwrap().unwrap();
    assert_eq!(session.phase(), AppPhase::Chat);
    (session, daemon)
}

async fn wait_for_phase<F>(rx: &mut watch::Receiver<AppPhase>, matches: F) -> AppPhase
where
    F: Fn(&AppPhase) -> bool,
{
    timeout(WAIT, async {
        loop {
            let current = rx.borrow_and_update().clone();
            if matches(&current) {
                return current;
            }
            rx.changed().await.expect("phase sender alive");
        }
    })
    .await
    .expect("phase reached in time")
}

#[tokio::test]
async fn onboarding_links_device_then_enters_chat() {
    let (session, mut daemon) = session_with_daemon();
    let mut phases = session.watch_phase();

    let start = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let request = daemon.expect("listAccounts").await;
    daemon.reply(&request, json!([])).await;

    let request = daemon.expect("startLink").await;
    daemon
        .reply(&request, json!({"deviceLinkUri": "sgnl://linkdevice?uuid=abc&pub_key=def"}))
        .await;

    let request = daemon.expect("finishLink").await;
    assert_eq!(
        request["params"],
        json!({"deviceLinkUri": "sgnl://linkdevice?uuid=abc&pub_key=def", "deviceName": "courier-test"})
    );
    let waiting = wait_for_phase(&mut phases, |p| {
        matches!(p, AppPhase::Onboarding(LinkState::WaitingForScan { .. }))
    })
    .await;
    assert_eq!(
        waiting,
        AppPhase::Onboarding(LinkState::WaitingForScan {
            uri: "sgnl://linkdevice?uuid=abc&pub_key=def".into()
        })
    );
    daemon.reply(&request, json!({})).await;

    let request = daemon.expect("listAccounts").await;
    daemon
        .reply(&request, json!([{"number": "+15550000000"}]))
        .await;

    timeout(WAIT, start).await.unwrap().unwrap().unwrap();
    assert_eq!(session.phase(), AppPhase::Chat);
}

#[tokio::test]
async fn linked_account_goes_straight_to_chat() {
    let (session, _daemon) = started_in_chat().await;
    assert!(session.phase().is_chat());
}

#[tokio::test]
async fn link_rejection_is_reported_as_link_error() {
    let (session, mut daemon) = session_with_daemon();
    let start = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let request = daemon.expect("listAccounts").await;
    daemon.reply(&request, json!([])).await;
    let request = daemon.expect("startLink").await;
    daemon
        .reply_error(&request, -1, "Link request error: connection refused")
        .await;

    let err = timeout(WAIT, start).await.unwrap().unwrap().unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert!(matches!(
        session.phase(),
        AppPhase::Onboarding(LinkState::Error { ref reason }) if reason.contains("connection refused")
    ));
}

#[tokio::test]
async fn link_without_account_fails() {
    let (session, mut daemon) = session_with_daemon();
    let link = {
        let session = session.clone();
        tokio::spawn(async move {
            session.start().await
        })
    };

    let request = daemon.expect("listAccounts").await;
    daemon.reply(&request, json!([])).await;
    let request = daemon.expect("startLink").await;
    daemon
        .reply(&request, json!({"deviceLinkUri": "sgnl://linkdevice?uuid=x"}))
        .await;
    let request = daemon.expect("finishLink").await;
    daemon.reply(&request, json!({})).await;
    let request = daemon.expect("listAccounts").await;
    daemon.reply(&request, json!([])).await;

    let err = timeout(WAIT, link).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, courier_client::ClientError::LinkIncomplete));
    assert!(matches!(
        session.phase(),
        AppPhase::Onboarding(LinkState::Error { .. })
    ));
}

#[tokio::test]
async fn send_replaces_optimistic_message() {
    let (session, mut daemon) = started_in_chat().await;
    let recipient = Recipient::Direct("+1 (555) 123-4567".into());

    let send = {
        let session = session.clone();
        let recipient = recipient.clone();
        tokio::spawn(async move { session.send_message(&recipient, "hello there").await })
    };

    let request = daemon.expect("send").await;
    assert_eq!(
        request["params"],
        json!({"message": "hello there", "recipient": ["+1 (555) 123-4567"]})
    );

    // The optimistic row is visible before the daemon answers.
    let key = ConversationKey::from("+15551234567");
    let pending = session.messages(&key, 50, None).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].id.starts_with("local-"));

    daemon
        .reply(&request, json!({"timestamp": 1_700_000_000_123i64, "results": []}))
        .await;

    let outcome = timeout(WAIT, send).await.unwrap().unwrap().unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Sent {
            id: "1700000000123".into()
        }
    );

    let messages = session.messages(&key, 50, None).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "1700000000123");
    assert_eq!(messages[0].timestamp, 1_700_000_000_123);
    assert_eq!(messages[0].sender, "self");
    assert!(messages[0].outgoing);
}

#[tokio::test]
async fn group_send_uses_group_id() {
    let (session, mut daemon) = started_in_chat().await;
    let send = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send_message(&Recipient::Group("Z3JvdXA=".into()), "hi all")
                .await
        })
    };

    let request = daemon.expect("send").await;
    assert_eq!(
        request["params"],
        json!({"message": "hi all", "groupId": "Z3JvdXA="})
    );
    daemon.reply(&request, json!({"timestamp": 99})).await;

    timeout(WAIT, send).await.unwrap().unwrap().unwrap();
    let messages = session
        .messages(&ConversationKey::from("Z3JvdXA="), 50, None)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "99");
}

#[tokio::test]
async fn failed_send_marks_message_failed() {
    let (session, mut daemon) = started_in_chat().await;
    let send = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send_message(&Recipient::Direct("+15551234567".into()), "lost")
                .await
        })
    };

    let request = daemon.expect("send").await;
    daemon.reply_error(&request, -3, "Untrusted identity").await;

    let outcome = timeout(WAIT, send).await.unwrap().unwrap().unwrap();
    let SendOutcome::Failed { id, reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(id.starts_with("local-"));
    assert!(reason.contains("Untrusted identity"));

    let messages = session
        .messages(&ConversationKey::from("+15551234567"), 50, None)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Failed);
}

#[tokio::test]
async fn synced_echo_racing_the_send_response_leaves_one_row() {
    let (session, mut daemon) = started_in_chat().await;
    let send = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send_message(&Recipient::Direct("+15551234567".into()), "once")
                .await
        })
    };

    let request = daemon.expect("send").await;
    daemon
        .notify(json!({
            "sourceNumber": "+15550000000",
            "timestamp": 5000,
            "syncMessage": {"sentMessage": {
                "destinationNumber": "+15551234567",
                "timestamp": 5000,
                "message": "once"
            }}
        }))
        .await;
    daemon.reply(&request, json!({"timestamp": 5000})).await;
    timeout(WAIT, send).await.unwrap().unwrap().unwrap();

    // Let the bridge drain the echo, whichever order it lands in.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = session
        .messages(&ConversationKey::from("+15551234567"), 50, None)
        .unwrap();
    let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["5000"]);
}

#[tokio::test]
async fn incoming_message_and_receipt_reach_the_store() {
    let (session, mut daemon) = started_in_chat().await;
    let mut store_events = session.subscribe_store().unwrap();

    daemon
        .notify(json!({
            "source": "+15551234567",
            "sourceNumber": "+15551234567",
            "sourceName": "Alice",
            "timestamp": 1000,
            "dataMessage": {"timestamp": 1000, "message": "hey"}
        }))
        .await;

    let event = timeout(WAIT, store_events.recv()).await.unwrap().unwrap();
    let StoreEvent::NewMessage { message, conversation_key } = event else {
        panic!("expected new message, got {event:?}");
    };
    assert_eq!(conversation_key.as_str(), "+15551234567");
    assert_eq!(message.content, "hey");
    assert_eq!(message.sender_name.as_deref(), Some("Alice"));

    let conversations = session.conversations().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].last_message, "hey");

    // Our own message from another device, then its read receipt.
    daemon
        .notify(json!({
            "sourceNumber": "+15550000000",
            "timestamp": 2000,
            "syncMessage": {"sentMessage": {
                "destinationNumber": "+15551234567",
                "timestamp": 2000,
                "message": "hello back"
            }}
        }))
        .await;
    daemon
        .notify(json!({
            "sourceNumber": "+15551234567",
            "timestamp": 2100,
            "receiptMessage": {"type": "READ", "timestamps": [2000], "when": 2100}
        }))
        .await;

    let status = timeout(WAIT, async {
        loop {
            if let StoreEvent::StatusUpdated { timestamp, status } =
                store_events.recv().await.unwrap()
            {
                return (timestamp, status);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(status, (2000, MessageStatus::Read));

    let conversations = session.conversations().unwrap();
    assert_eq!(conversations[0].timestamp, 2000);
    assert_eq!(conversations[0].last_message, "hello back");
}

#[tokio::test]
async fn message_bursts_are_stored_without_loss() {
    let (session, mut daemon) = started_in_chat().await;
    let key = ConversationKey::from("+15551234567");

    let burst: Vec<Value> = (1..=3000i64)
        .map(|ts| {
            json!({"jsonrpc": "2.0", "method": "receive", "params": {"envelope": {
                "sourceNumber": "+15551234567",
                "timestamp": ts,
                "dataMessage": {"timestamp": ts, "message": format!("m{ts}")}
            }}})
        })
        .collect();
    daemon.send_lines(&burst).await;

    let stored = timeout(Duration::from_secs(20), async {
        loop {
            let messages = session.messages(&key, 5000, None).unwrap();
            if messages.len() == 3000 {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("every message stored");

    let timestamps: Vec<i64> = stored.iter().map(|m| m.timestamp).collect();
    assert_eq!(timestamps, (1..=3000).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn read_receipt_right_behind_the_send_response_is_kept() {
    for round in 0..50i64 {
        let (session, mut daemon) = started_in_chat().await;
        let timestamp = 5000 + round;

        let send = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send_message(&Recipient::Direct("+15551234567".into()), "seen?")
                    .await
            })
        };

        let request = daemon.expect("send").await;
        daemon
            .send_lines(&[
                json!({"jsonrpc": "2.0", "id": request["id"], "result": {"timestamp": timestamp}}),
                json!({"jsonrpc": "2.0", "method": "receive", "params": {"envelope": {
                    "sourceNumber": "+15551234567",
                    "timestamp": timestamp + 1,
                    "receiptMessage": {"type": "READ", "timestamps": [timestamp], "when": timestamp + 1}
                }}}),
            ])
            .await;
        timeout(WAIT, send).await.unwrap().unwrap().unwrap();

        let id = timestamp.to_string();
        let status = timeout(WAIT, async {
            loop {
                let messages = session
                    .messages(&ConversationKey::from("+15551234567"), 10, None)
                    .unwrap();
                if let Some(message) = messages.iter().find(|m| m.id == id) {
                    if message.status == MessageStatus::Read {
                        return message.status;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("receipt lost in round {round}"));
        assert_eq!(status, MessageStatus::Read);

        session.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn starting_a_running_session_keeps_its_phase() {
    let (session, _daemon) = started_in_chat().await;

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(RpcError::AlreadyRunning)));
    assert_eq!(session.phase(), AppPhase::Chat);
}

#[tokio::test]
async fn daemon_exit_invalidates_session() {
    let (session, daemon) = started_in_chat().await;
    let mut events = session.subscribe();

    drop(daemon);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SessionEvent::DaemonExited { code: None });
    assert!(matches!(
        session.phase(),
        AppPhase::Onboarding(LinkState::Error { .. })
    ));
}

#[tokio::test]
async fn shutdown_is_quiet_and_idempotent() {
    let (session, _daemon) = started_in_chat().await;
    let mut events = session.subscribe();

    session.shutdown().await.unwrap();
    session.shutdown().await.unwrap();

    assert_eq!(session.phase(), AppPhase::Chat);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events.try_recv().is_err());
    assert!(session.messages(&ConversationKey::from("x"), 10, None).is_err());
}

#[tokio::test]
async fn directory_calls_decode_daemon_results() {
    let (session, mut daemon) = started_in_chat().await;

    let lookup = {
        let session = session.clone();
        tokio::spawn(async move {
            let contacts = session.list_contacts().await?;
            let groups = session.list_groups().await?;
            let version = session.daemon_version().await?;
            Ok::<_, courier_client::ClientError>((contacts, groups, version))
        })
    };

    let request = daemon.expect("listContacts").await;
    daemon
        .reply(&request, json!([{"number": "+15551234567", "name": "Alice"}]))
        .await;
    let request = daemon.expect("listGroups").await;
    daemon
        .reply(&request, json!([{"id": "Z3JvdXA=", "name": "Climbing", "members": []}]))
        .await;
    let request = daemon.expect("version").await;
    daemon.reply(&request, json!({"version": "0.13.4"})).await;

    let (contacts, groups, version) = timeout(WAIT, lookup).await.unwrap().unwrap().unwrap();
    assert_eq!(contacts[0].display_name(), "Alice");
    assert_eq!(groups[0].name.as_deref(), Some("Climbing"));
    assert_eq!(version.version, "0.13.4");
}
