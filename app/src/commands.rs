use anyhow::{anyhow, bail, Context, Result};
use ragchat_core::{
    ApiClient, ApiError, AuthResponse, ClientSettings, Conversation, ConversationMemory,
    FileStorage, IdentityClient, Navigator, Route, SessionStore, SharedStorage, StreamEvent,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a single command invocation needs: persisted session, both
/// HTTP clients and the navigator that guards protected operations.
pub struct ClientContext {
    session: SessionStore,
    api: ApiClient,
    identity: IdentityClient,
    navigator: Navigator,
}

impl ClientContext {
    pub fn new(settings: &ClientSettings, storage: SharedStorage) -> Result<Self> {
        let session = SessionStore::new(storage.clone());
        let (api, api_events) = ApiClient::new(settings, storage)?;
        let identity = IdentityClient::new(settings)?;
        let navigator = Navigator::new(session.clone(), api_events);
        Ok(Self {
            session,
            api,
            identity,
            navigator,
        })
    }

    /// Opens the on-disk session store selected by `settings`.
    pub fn open(settings: &ClientSettings) -> Result<Self> {
        let storage = match &settings.storage_path {
            Some(path) => FileStorage::open(path),
            None => FileStorage::open_default(),
        }
        .context("failed to open session storage")?;
        debug!(path = %storage.path().display(), "using session storage");
        Self::new(settings, Arc::new(storage))
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub async fn login(&mut self, email: &str, password: &str, code: Option<&str>) -> Result<()> {
        let mut response = self.identity.login(email, password).await?;
        if AuthResponse::from_value(&response).is_none() {
            if let Some(code) = code {
                response = self.identity.login_with_two_factor(email, code).await?;
            }
        }
        let auth = AuthResponse::from_value(&response).ok_or_else(|| {
            anyhow!("login did not return a token; a two-factor code may be required (--code)")
        })?;
        auth.apply(&self.session);
        self.navigator.navigate(Route::Root);
        Ok(())
    }

    pub async fn register(&mut self, name: &str, email: &str, password: &str) -> Result<()> {
        let response = self
            .identity
            .create_and_authenticate(name, email, password)
            .await?;
        match AuthResponse::from_value(&response) {
            Some(auth) => auth.apply(&self.session),
            None => info!("account created; log in to continue"),
        }
        Ok(())
    }

    pub fn logout(&mut self) {
        self.session.logout();
        self.navigator.navigate(Route::Login);
    }

    pub async fn conversations(&mut self) -> Result<Vec<Conversation>> {
        let user_id = self.enter(Route::Conversations)?;
        let result = self.api.user_conversations(&user_id).await;
        self.settle(result)
    }

    pub async fn create_conversation(&mut self, title: &str) -> Result<Conversation> {
        let user_id = self.enter(Route::Conversations)?;
        let result = self.api.create_conversation(&user_id, title).await;
        self.settle(result)
    }

    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let user_id = self.enter(Route::Conversations)?;
        let result = self.api.delete_conversation(conversation_id, &user_id).await;
        self.settle(result)
    }

    pub async fn share_conversation(
        &mut self,
        conversation_id: &str,
        target_user_id: &str,
    ) -> Result<Value> {
        let user_id = self.enter(Route::Conversations)?;
        let result = self
            .api
            .share_conversation(conversation_id, &user_id, target_user_id)
            .await;
        self.settle(result)
    }

    pub async fn memory(&mut self, conversation_id: &str) -> Result<Option<ConversationMemory>> {
        let user_id = self.enter(chat_route(conversation_id))?;
        let result = self.api.memory(&user_id, conversation_id).await;
        self.settle(result)
    }

    /// Streams a reply, handing each payload to `on_payload` as it arrives.
    pub async fn chat<F>(&mut self, conversation_id: &str, prompt: &str, mut on_payload: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        self.enter(chat_route(conversation_id))?;
        let result = self.api.chat_stream(conversation_id, prompt).await;
        let stream = self.settle(result)?;
        let terminal = stream
            .drive(|event| {
                if let StreamEvent::Data(payload) = event {
                    on_payload(payload);
                }
            })
            .await;
        if self.navigator.process_events() {
            bail!("session expired; log in again");
        }
        match terminal {
            StreamEvent::Error(message) => Err(anyhow!(message)),
            _ => Ok(()),
        }
    }

    /// Guards `route` and returns the signed-in user's id.
    fn enter(&mut self, route: Route) -> Result<String> {
        let landed = self.navigator.navigate(route.clone());
        if *landed != route {
            bail!("not signed in (redirected to {landed}); run `ragchat login` first");
        }
        self.session
            .user_id()
            .ok_or_else(|| anyhow!("stored user has no id; log in again"))
    }

    fn settle<T>(&mut self, result: Result<T, ApiError>) -> Result<T> {
        if self.navigator.process_events() {
            bail!("session expired; log in again");
        }
        Ok(result?)
    }
}

fn chat_route(conversation_id: &str) -> Route {
    Route::Chat {
        conversation_id: Some(conversation_id.to_owned()),
    }
}
