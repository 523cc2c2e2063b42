use crate::session::{read_user, SessionStore};
use crate::storage::{durable_token, SharedStorage};
use std::fmt;
use tracing::{debug, info};

/// Client-side destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Root,
    Login,
    Register,
    Settings,
    TwoFactorSettings,
    Chat { conversation_id: Option<String> },
    Conversations,
}

impl Route {
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Some(Self::Root),
            ["login"] => Some(Self::Login),
            ["register"] => Some(Self::Register),
            ["settings"] => Some(Self::Settings),
            ["settings", "2fa"] => Some(Self::TwoFactorSettings),
            ["conversations"] => Some(Self::Conversations),
            ["chat"] => Some(Self::Chat {
                conversation_id: None,
            }),
            ["chat", id] => Some(Self::Chat {
                conversation_id: Some((*id).to_owned()),
            }),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Root => "/".to_owned(),
            Self::Login => "/login".to_owned(),
            Self::Register => "/register".to_owned(),
            Self::Settings => "/settings".to_owned(),
            Self::TwoFactorSettings => "/settings/2fa".to_owned(),
            Self::Chat {
                conversation_id: Some(id),
            } => format!("/chat/{id}"),
            Self::Chat {
                conversation_id: None,
            } => "/chat".to_owned(),
            Self::Conversations => "/conversations".to_owned(),
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Self::Settings | Self::TwoFactorSettings | Self::Chat { .. } | Self::Conversations
        )
    }

    /// Static redirect declared by the route table, applied before guarding.
    pub fn redirect(&self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Conversations),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// What the synchronizer did to the in-memory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadyAuthenticated,
    Synchronized { user_restored: bool },
    NoDurableToken,
}

/// Reconciles durable storage with the in-memory [`SessionStore`].
#[derive(Clone)]
pub struct SessionSynchronizer {
    session: SessionStore,
    storage: SharedStorage,
}

impl SessionSynchronizer {
    pub fn new(session: SessionStore) -> Self {
        let storage = session.storage().clone();
        Self { session, storage }
    }

    /// Pulls a durable token (and user, when readable) into an
    /// unauthenticated store. The durable side is read on every call since
    /// other code paths may have written it after the store was built.
    pub fn synchronize(&self) -> SyncOutcome {
        if self.session.is_authenticated() {
            return SyncOutcome::AlreadyAuthenticated;
        }
        let Some(token) = durable_token(self.storage.as_ref()) else {
            return SyncOutcome::NoDurableToken;
        };
        self.session.set_token(token);
        let user = read_user(self.storage.as_ref());
        let user_restored = user.is_some();
        if let Some(user) = user {
            self.session.set_user(user);
        }
        debug!(user_restored, "session synchronized from durable storage");
        SyncOutcome::Synchronized { user_restored }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// The store was stale and has been refreshed; navigation proceeds.
    Synchronized,
    Redirect(Route),
}

impl GuardDecision {
    pub fn proceeds(&self) -> bool {
        matches!(self, Self::Proceed | Self::Synchronized)
    }
}

/// Runs before every navigation. Never performs I/O beyond durable storage.
#[derive(Clone)]
pub struct RouteGuard {
    synchronizer: SessionSynchronizer,
}

impl RouteGuard {
    pub fn new(session: SessionStore) -> Self {
        Self {
            synchronizer: SessionSynchronizer::new(session),
        }
    }

    pub fn check(&self, destination: &Route) -> GuardDecision {
        if !destination.requires_auth() {
            return GuardDecision::Proceed;
        }
        match self.synchronizer.synchronize() {
            SyncOutcome::AlreadyAuthenticated => GuardDecision::Proceed,
            SyncOutcome::Synchronized { .. } => GuardDecision::Synchronized,
            SyncOutcome::NoDurableToken => {
                info!(%destination, "access denied: not authenticated, redirecting to login");
                GuardDecision::Redirect(Route::Login)
            }
        }
    }
}
