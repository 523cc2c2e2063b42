use ragchat_core::storage::{TOKEN_KEY, USER_KEY};
use ragchat_core::{
    DurableStorage, FileStorage, GuardDecision, Route, RouteGuard, SessionStore, SessionSynchronizer,
    SyncOutcome,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn session_survives_reopening_file_storage() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("session").join("storage.json");

    let session = SessionStore::new(Arc::new(FileStorage::open(&path).expect("open")));
    session.set_token("jwt-1");
    session.set_user(json!({"id": 12, "email": "a@b.c"}));

    let reopened = SessionStore::new(Arc::new(FileStorage::open(&path).expect("reopen")));
    assert!(reopened.is_authenticated());
    assert_eq!(reopened.token().as_deref(), Some("jwt-1"));
    assert_eq!(reopened.user_id().as_deref(), Some("12"));
}

#[test]
fn logout_clears_the_document() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("storage.json");

    let session = SessionStore::new(Arc::new(FileStorage::open(&path).expect("open")));
    session.set_token("jwt-1");
    session.logout();

    let storage = FileStorage::open(&path).expect("reopen");
    assert!(storage.get(TOKEN_KEY).is_none());
    assert!(storage.get(USER_KEY).is_none());
}

#[test]
fn guard_adopts_token_written_behind_the_store() {
    let temp_dir = TempDir::new().expect("temp dir");
    let storage = Arc::new(FileStorage::open(temp_dir.path().join("storage.json")).expect("open"));
    let session = SessionStore::new(storage.clone());
    let guard = RouteGuard::new(session.clone());
    assert_eq!(guard.check(&Route::Settings), GuardDecision::Redirect(Route::Login));

    storage.set(TOKEN_KEY, "late-token");
    storage.set(USER_KEY, r#"{"id":"u7"}"#);
    assert_eq!(guard.check(&Route::Settings), GuardDecision::Synchronized);
    assert_eq!(session.user_id().as_deref(), Some("u7"));
    assert_eq!(guard.check(&Route::Settings), GuardDecision::Proceed);
}

#[test]
fn unreadable_user_document_does_not_block_synchronization() {
    let temp_dir = TempDir::new().expect("temp dir");
    let storage = Arc::new(FileStorage::open(temp_dir.path().join("storage.json")).expect("open"));
    let synchronizer = SessionSynchronizer::new(SessionStore::new(storage.clone()));

    storage.set(TOKEN_KEY, "t");
    storage.set(USER_KEY, "{not json");
    assert_eq!(
        synchronizer.synchronize(),
        SyncOutcome::Synchronized {
            user_restored: false
        }
    );
}

#[test]
fn corrupt_storage_file_starts_empty() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("storage.json");
    std::fs::write(&path, "[1, 2").expect("write");

    let storage = FileStorage::open(&path).expect("open");
    assert!(storage.get(TOKEN_KEY).is_none());
    storage.set(TOKEN_KEY, "fresh");
    assert_eq!(
        FileStorage::open(&path).expect("reopen").get(TOKEN_KEY).as_deref(),
        Some("fresh")
    );
}
