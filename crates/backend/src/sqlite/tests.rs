use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::types::FEED_WINDOW_LIMIT;

async fn open_temp_backend() -> (TempDir, SqliteBackend) {
    let directory = tempfile::tempdir().expect("tempdir");
    let path = directory.path().join("chirp").join("backend.sqlite3");
    let backend = SqliteBackend::open(path.to_str().expect("utf-8 path"))
        .await
        .expect("open sqlite backend");
    (directory, backend)
}

fn new_chat(text: &str, timestamp_ms: u64) -> NewChatDocument {
    NewChatDocument {
        text: text.to_string(),
        sender: "grace@example.com".to_string(),
        timestamp_ms,
    }
}

async fn wait_for_offline(backend: &SqliteBackend, uid: UserId) -> Option<PresenceRecord> {
    for _ in 0..200 {
        let record = backend.get_presence(uid).await.expect("presence read");
        if record.is_some_and(|record| !record.online) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[test]
fn database_urls_are_normalized() {
    assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("/tmp/chirp.sqlite3"),
        "sqlite:///tmp/chirp.sqlite3"
    );
    assert_eq!(
        normalize_database_url("sqlite://already.db"),
        "sqlite://already.db"
    );
}

#[tokio::test]
async fn accounts_survive_reopen() {
    let (directory, backend) = open_temp_backend().await;
    let registered = backend
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect("register");
    let database_url = backend.database_url().to_string();
    drop(backend);

    let reopened = SqliteBackend::open(&database_url).await.expect("reopen");
    let user = reopened
        .sign_in_with_email_and_password("grace@example.com", "cobol-rules")
        .await
        .expect("sign in after reopen");
    assert_eq!(user, registered);

    let error = reopened
        .sign_in_with_email_and_password("grace@example.com", "fortran")
        .await
        .expect_err("wrong password");
    assert!(matches!(error, BackendError::InvalidCredentials { .. }));

    let duplicate = reopened
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect_err("duplicate account");
    assert!(matches!(duplicate, BackendError::AccountExists { .. }));
    drop(directory);
}

#[tokio::test]
async fn window_returns_newest_documents_oldest_first() {
    let (_directory, backend) = open_temp_backend().await;
    for index in 0..25_u64 {
        backend
            .add_chat(new_chat(&format!("m{index}"), 1_000 + index))
            .await
            .expect("add");
    }

    let window = backend
        .fetch_window(FEED_WINDOW_LIMIT)
        .await
        .expect("window");
    assert_eq!(window.len(), FEED_WINDOW_LIMIT);
    assert_eq!(window.first().map(|doc| doc.text.as_str()), Some("m5"));
    assert_eq!(window.last().map(|doc| doc.text.as_str()), Some("m24"));

    let everything = backend.list_chats().await.expect("list");
    assert_eq!(everything.len(), 25);
}

#[tokio::test]
async fn delete_removes_document_and_reports_missing_ones() {
    let (_directory, backend) = open_temp_backend().await;
    let document = backend.add_chat(new_chat("bye", 1)).await.expect("add");

    backend.delete_chat(document.id).await.expect("delete");
    assert_eq!(backend.chat_count().await.expect("count"), 0);

    let error = backend
        .delete_chat(document.id)
        .await
        .expect_err("already deleted");
    assert!(matches!(error, BackendError::NotFound { .. }));
}

#[tokio::test]
async fn subscription_sees_local_writes() {
    let (_directory, backend) = open_temp_backend().await;
    let SnapshotSubscription { mut stream, worker } = backend
        .subscribe_recent(FeedQuery::recent_chats())
        .expect("subscribe");
    let _worker = tokio::spawn(worker);

    assert_eq!(stream.recv().await, Some(Vec::new()));
    backend.add_chat(new_chat("hi", 7)).await.expect("add");
    let snapshot = stream.recv().await.expect("snapshot");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text, "hi");
}

#[tokio::test]
async fn subscription_sees_writes_from_another_handle() {
    let (_directory, backend) = open_temp_backend().await;
    let other = SqliteBackend::open(backend.database_url())
        .await
        .expect("second handle");

    let SnapshotSubscription { mut stream, worker } = backend
        .subscribe_recent(FeedQuery::recent_chats())
        .expect("subscribe");
    let _worker = tokio::spawn(worker);
    assert_eq!(stream.recv().await, Some(Vec::new()));

    other.add_chat(new_chat("from afar", 3)).await.expect("add");
    let snapshot = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("poll picks up external write")
        .expect("snapshot");
    assert_eq!(snapshot[0].text, "from afar");
}

#[tokio::test]
async fn dropped_connection_fires_rule_once() {
    let (_directory, backend) = open_temp_backend().await;
    let user = backend
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect("register");

    let connection = backend.connect().await.expect("connect");
    backend
        .set_presence(user.uid, PresenceWrite::ONLINE)
        .await
        .expect("online");
    backend
        .on_disconnect_set(connection.id(), user.uid, PresenceWrite::OFFLINE)
        .await
        .expect("rule");
    let connection_id = connection.id();
    connection.close();

    let record = wait_for_offline(&backend, user.uid).await;
    assert!(record.is_some(), "rule should fire after the handle drops");

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM disconnect_rules WHERE connection_id = ?",
    )
    .bind(connection_id.to_string())
    .fetch_one(backend.pool())
    .await
    .expect("count rules");
    assert_eq!(remaining, 0);

    let error = backend
        .on_disconnect_set(connection_id, user.uid, PresenceWrite::OFFLINE)
        .await
        .expect_err("connection is gone");
    assert!(matches!(error, BackendError::ConnectionClosed { .. }));
}

#[tokio::test]
async fn orphaned_rules_fire_when_backend_reopens() {
    let (_directory, backend) = open_temp_backend().await;
    let user = backend
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect("register");
    backend
        .set_presence(user.uid, PresenceWrite::ONLINE)
        .await
        .expect("online");

    // A process that crashed leaves its rule behind without a connection row.
    sqlx::query("INSERT INTO disconnect_rules (connection_id, uid, online) VALUES (?, ?, 0)")
        .bind(ConnectionId::new_v7().to_string())
        .bind(user.uid.to_string())
        .execute(backend.pool())
        .await
        .expect("insert orphaned rule");

    let reopened = SqliteBackend::open(backend.database_url())
        .await
        .expect("reopen");
    let record = reopened
        .get_presence(user.uid)
        .await
        .expect("read")
        .expect("record exists");
    assert!(!record.online);
    assert_eq!(reopened.sweep_stale().await.expect("sweep"), 0);
}

#[tokio::test]
async fn stale_heartbeat_is_swept() {
    let (_directory, backend) = open_temp_backend().await;
    let user = backend
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect("register");

    let stale_id = ConnectionId::new_v7();
    sqlx::query("INSERT INTO connections (id, opened_at, heartbeat_at) VALUES (?, 0, 0)")
        .bind(stale_id.to_string())
        .execute(backend.pool())
        .await
        .expect("insert stale connection");
    backend
        .on_disconnect_set(stale_id, user.uid, PresenceWrite::OFFLINE)
        .await
        .expect("rule on stale connection");

    assert_eq!(backend.sweep_stale().await.expect("sweep"), 1);
    let record = backend
        .get_presence(user.uid)
        .await
        .expect("read")
        .expect("record exists");
    assert!(!record.online);
}

#[tokio::test]
async fn cancelled_rules_stay_silent_after_close() {
    let (_directory, backend) = open_temp_backend().await;
    let user = backend
        .register_account("grace@example.com", "cobol-rules")
        .await
        .expect("register");

    let connection = backend.connect().await.expect("connect");
    let connection_id = connection.id();
    backend
        .on_disconnect_set(connection_id, user.uid, PresenceWrite::OFFLINE)
        .await
        .expect("rule");
    assert_eq!(
        backend
            .cancel_on_disconnect(connection_id)
            .await
            .expect("cancel"),
        1
    );
    connection.close();

    // Wait until the watcher has retired the connection row.
    for _ in 0..200 {
        let open = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM connections WHERE id = ?")
            .bind(connection_id.to_string())
            .fetch_one(backend.pool())
            .await
            .expect("count connections");
        if open == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    backend
        .set_presence(user.uid, PresenceWrite::ONLINE)
        .await
        .expect("online");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = backend
        .get_presence(user.uid)
        .await
        .expect("read")
        .expect("record exists");
    assert!(record.online);
}
