use crate::config::ClientSettings;
use crate::error::{message_from_body, ApiError};
use crate::model::{ChatbotRequest, Conversation, ConversationMemory, NewConversation};
use crate::sse::ChatStream;
use crate::storage::{clear_session, durable_token, SharedStorage};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use url::Url;

/// Side effects the API client reports to whoever drives navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiEvent {
    /// The backend rejected the bearer token; durable session state has
    /// already been cleared.
    Unauthorized,
}

/// Client for the chatbot backend.
///
/// Every request carries the bearer token found in durable storage at send
/// time. A `401` clears that storage and emits [`ApiEvent::Unauthorized`].
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    storage: SharedStorage,
    events_tx: UnboundedSender<ApiEvent>,
}

impl ApiClient {
    pub fn new(
        settings: &ClientSettings,
        storage: SharedStorage,
    ) -> Result<(Self, UnboundedReceiver<ApiEvent>), ApiError> {
        let http = build_http_client(settings)?;
        let (events_tx, events_rx) = unbounded_channel();
        Ok((
            Self {
                http,
                base_url: settings.api_base_url.clone(),
                storage,
                events_tx,
            },
            events_rx,
        ))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&["ai", "users", user_id, "conversations"])?;
        let response = self
            .send(self.request(Method::POST, url).json(&NewConversation { title }))
            .await?;
        let value: Value = read_json(response).await?;
        let has_id = value
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_id {
            return Err(ApiError::Protocol(
                "created conversation has no id".to_owned(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub async fn user_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        let url = self.endpoint(&["ai", "users", user_id, "conversations"])?;
        let response = self.send(self.request(Method::GET, url)).await?;
        read_json(response).await
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&["ai", "conversations", conversation_id])?;
        let response = self.send(self.request(Method::GET, url)).await?;
        read_json(response).await
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let mut url = self.endpoint(&["ai", "conversations", conversation_id])?;
        url.query_pairs_mut().append_pair("userId", user_id);
        let response = self.send(self.request(Method::DELETE, url)).await?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn share_conversation(
        &self,
        conversation_id: &str,
        owner_id: &str,
        target_user_id: &str,
    ) -> Result<Value, ApiError> {
        let mut url = self.endpoint(&["ai", "conversations", conversation_id, "share"])?;
        url.query_pairs_mut()
            .append_pair("ownerId", owner_id)
            .append_pair("targetUserId", target_user_id);
        let response = self.send(self.request(Method::POST, url)).await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Stored history of a conversation. A missing record (404, or an empty
    /// body) is `None`: the conversation simply has no history yet.
    pub async fn memory(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationMemory>, ApiError> {
        let mut url = self.endpoint(&["ai", "memory"])?;
        url.query_pairs_mut()
            .append_pair("userId", user_id)
            .append_pair("conversationId", conversation_id);
        let response = self.send(self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(conversation_id, "no memory recorded yet");
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Opens a streamed chat completion. Failures after the request has been
    /// sent surface as a terminal [`StreamEvent::Error`](crate::sse::StreamEvent::Error).
    pub async fn chat_stream(
        &self,
        conversation_id: &str,
        prompt: &str,
    ) -> Result<ChatStream, ApiError> {
        let url = self.endpoint(&["ai", "chatbot"])?;
        let request = self
            .request(Method::POST, url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&ChatbotRequest {
                conversation_id,
                prompt,
            });
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(ApiError::Unauthorized) => {
                return Ok(ChatStream::failed(ApiError::Unauthorized.to_string()))
            }
            Err(err) => return Err(err),
        };
        Ok(ChatStream::from_response(response).await)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        join_path(&self.base_url, segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match durable_token(self.storage.as_ref()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        debug!(url = %response.url(), status = %response.status(), "backend response");
        if response.status() == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }

    fn handle_unauthorized(&self) {
        warn!("backend rejected credentials; clearing persisted session");
        clear_session(self.storage.as_ref());
        if self.events_tx.send(ApiEvent::Unauthorized).is_err() {
            debug!("no listener for unauthorized events");
        }
    }
}

pub(crate) fn build_http_client(settings: &ClientSettings) -> Result<Client, ApiError> {
    let mut builder = Client::builder();
    if let Some(timeout) = settings.request_timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

pub(crate) fn join_path(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status,
        message: message_from_body(status, &body),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = ensure_success(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}
