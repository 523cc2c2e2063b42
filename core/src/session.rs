use crate::storage::{clear_session, durable_token, DurableStorage, SharedStorage, TOKEN_KEY, USER_KEY};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Authentication state as observed at a single point in time.
///
/// `is_authenticated` is derived from the token and cannot be set
/// independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    token: Option<String>,
    user: Option<Value>,
    is_authenticated: bool,
}

impl Session {
    fn new(token: Option<String>, user: Option<Value>) -> Self {
        let is_authenticated = token.is_some();
        Self {
            token,
            user,
            is_authenticated,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }
}

/// Process-wide owner of the caller's authentication state, mirrored into
/// durable storage.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Session>>,
    storage: SharedStorage,
}

impl SessionStore {
    /// Restores the session persisted in `storage`.
    pub fn new(storage: SharedStorage) -> Self {
        let token = durable_token(storage.as_ref());
        let user = read_user(storage.as_ref());
        debug!(
            authenticated = token.is_some(),
            has_user = user.is_some(),
            "session restored from durable storage"
        );
        Self {
            inner: Arc::new(RwLock::new(Session::new(token, user))),
            storage,
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn snapshot(&self) -> Session {
        self.inner.read().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().token.clone()
    }

    pub fn user(&self) -> Option<Value> {
        self.inner.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_authenticated
    }

    /// Identifier of the signed-in user, as used in backend paths.
    pub fn user_id(&self) -> Option<String> {
        self.inner.read().user.as_ref().and_then(user_id_of)
    }

    /// Stores `token` and marks the session authenticated. An empty token is
    /// ignored, since durable storage reads it back as absent.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            warn!("ignoring empty session token");
            return;
        }
        let mut session = self.inner.write();
        self.storage.set(TOKEN_KEY, &token);
        session.token = Some(token);
        session.is_authenticated = true;
    }

    pub fn set_user(&self, user: Value) {
        let mut session = self.inner.write();
        self.storage.set(USER_KEY, &user.to_string());
        session.user = Some(user);
    }

    pub fn logout(&self) {
        let mut session = self.inner.write();
        clear_session(self.storage.as_ref());
        *session = Session::default();
        debug!("session cleared");
    }
}

/// Parses the persisted user document; a malformed one is logged and dropped.
pub(crate) fn read_user(storage: &dyn DurableStorage) -> Option<Value> {
    let raw = storage.get(USER_KEY)?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Null) => None,
        Ok(user) => Some(user),
        Err(err) => {
            warn!(error = %err, "ignoring malformed persisted user document");
            None
        }
    }
}

pub fn user_id_of(user: &Value) -> Option<String> {
    match user.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
