use crate::api::{build_http_client, ensure_success, join_path};
use crate::config::ClientSettings;
use crate::error::ApiError;
use crate::session::SessionStore;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

/// Client for the external identity service. Bodies are form-encoded and
/// responses are kept as loosely typed JSON.
#[derive(Clone)]
pub struct IdentityClient {
    http: Client,
    base_url: Url,
}

/// Two-factor preferences; unset fields are left untouched by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TwoFactorSettings {
    pub require_for_basic_login: Option<bool>,
    pub require_for_social_login: Option<bool>,
}

impl IdentityClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ApiError> {
        Ok(Self {
            http: build_http_client(settings)?,
            base_url: settings.identity_base_url.clone(),
        })
    }

    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<Value, ApiError> {
        self.post_form(
            &["users", "create"],
            &[("name", name), ("email", email), ("password", password)],
        )
        .await
    }

    pub async fn create_and_authenticate(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Value, ApiError> {
        self.post_form(
            &["users", "createAuthenticate"],
            &[("name", name), ("email", email), ("password", password)],
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ApiError> {
        self.post_form(&["users", "login"], &[("email", email), ("password", password)])
            .await
    }

    pub async fn login_with_two_factor(&self, email: &str, code: &str) -> Result<Value, ApiError> {
        self.post_form(&["users", "login", "2fa"], &[("email", email), ("code", code)])
            .await
    }

    /// Raw image bytes of the enrollment QR code.
    pub async fn two_factor_qr_code(&self, email: &str, password: &str) -> Result<Vec<u8>, ApiError> {
        let request = self
            .post(&["users", "google", "2FAuth", "qrCode"])?
            .form(&[("email", email), ("password", password)]);
        let response = ensure_success(request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn validate_two_factor(
        &self,
        email: &str,
        password: &str,
        code: &str,
    ) -> Result<Value, ApiError> {
        self.post_form(
            &["users", "google", "2FAuth", "validate"],
            &[("email", email), ("password", password), ("code", code)],
        )
        .await
    }

    pub async fn update_two_factor_settings(
        &self,
        email: &str,
        settings: TwoFactorSettings,
        token: &str,
    ) -> Result<Value, ApiError> {
        let mut form = vec![("email", email.to_owned())];
        if let Some(required) = settings.require_for_basic_login {
            form.push(("require2FAForBasicLogin", required.to_string()));
        }
        if let Some(required) = settings.require_for_social_login {
            form.push(("require2FAForSocialLogin", required.to_string()));
        }
        let request = self
            .post(&["users", "2fa", "settings"])?
            .bearer_auth(token)
            .form(&form);
        read_json_or_null(request).await
    }

    fn post(&self, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = join_path(&self.base_url, segments)?;
        debug!(%url, "identity request");
        Ok(self.http.post(url))
    }

    async fn post_form(&self, segments: &[&str], form: &[(&str, &str)]) -> Result<Value, ApiError> {
        let request = self.post(segments)?.form(form);
        read_json_or_null(request).await
    }
}

/// Parses a JSON body; an empty body is `Null` and a non-JSON body (some
/// endpoints answer with a bare token) is kept as a string.
async fn read_json_or_null(request: RequestBuilder) -> Result<Value, ApiError> {
    let response = ensure_success(request.send().await?).await?;
    let body = response.text().await?;
    let body = body.trim();
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_owned())))
}

/// Credentials carried by a successful login or registration response.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub token: String,
    pub user: Option<Value>,
}

impl AuthResponse {
    const TOKEN_FIELDS: [&'static str; 4] = ["token", "jwt", "access_token", "accessToken"];

    pub fn from_value(value: &Value) -> Option<Self> {
        if let Value::String(token) = value {
            return (!token.is_empty()).then(|| Self {
                token: token.clone(),
                user: None,
            });
        }
        let token = Self::TOKEN_FIELDS
            .iter()
            .filter_map(|field| value.get(field))
            .find_map(Value::as_str)
            .filter(|token| !token.is_empty())?
            .to_owned();
        let user = value.get("user").filter(|user| user.is_object()).cloned();
        Some(Self { token, user })
    }

    /// Stores the credentials in the session.
    pub fn apply(self, session: &SessionStore) {
        session.set_token(self.token);
        if let Some(user) = self.user {
            session.set_user(user);
        }
        info!("signed in");
    }
}
