use crate::credentials::{CredentialStore, TokenRecord};
use crate::{Client, Error, ResponseShape, Result};
use http::Method;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

/// Scope requested by [`ProjectTracker::authorize_url`].
pub const DEFAULT_SCOPE: &str = "read,write";

/// A member of the project tracker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Tracker-side member id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name, if the member set one.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Profile picture location.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A board visible to a member.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Board {
    /// Tracker-side board id.
    pub id: String,
    /// Board title.
    pub name: String,
    /// Link to the board in the tracker's web UI.
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the board is archived.
    #[serde(default)]
    pub closed: bool,
}

/// Adapter for a project-management REST API.
///
/// The application authenticates with an API key in the query string (the
/// client's default API key). Each local user additionally authorizes the
/// application in the browser; the token handed back is kept in a
/// [`CredentialStore`] and sent with every call made on that user's behalf.
///
/// # Examples
///
/// ```no_run
/// use outcall::credentials::InMemoryCredentialStore;
/// use outcall::integrations::ProjectTracker;
/// use outcall::Client;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let client = Client::builder()
///     .destination("tracker")
///     .base_url("https://api.tracker.example/1")?
///     .default_api_key("app-key")
///     .build()?;
/// let tracker = ProjectTracker::new(client, Arc::new(InMemoryCredentialStore::new()))
///     .app_name("Acme Sync");
///
/// // Send the user here; the token comes back in the callback fragment.
/// let url = tracker.authorize_url("https://acme.example/tracker/callback")?;
/// # let _ = url;
/// tracker.store_token("user-7", "token-from-fragment").await?;
///
/// let me = tracker.member_profile("user-7", "me").await?;
/// println!("connected as {}", me.username);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProjectTracker {
    client: Client,
    store: Arc<dyn CredentialStore>,
    app_name: Option<String>,
    scope: String,
}

impl std::fmt::Debug for ProjectTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectTracker")
            .field("client", &self.client)
            .field("app_name", &self.app_name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ProjectTracker {
    /// Wraps `client`, keeping user tokens in `store`.
    pub fn new(client: Client, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            store,
            app_name: None,
            scope: DEFAULT_SCOPE.to_string(),
        }
    }

    /// Application name shown to the user on the authorization page.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Overrides the requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// The URL a user visits to authorize this application.
    ///
    /// After approval the browser is sent to `return_url` with the token in the
    /// URL fragment.
    pub fn authorize_url(&self, return_url: &str) -> Result<Url> {
        let mut request = self
            .client
            .request(Method::GET, "/authorize")
            .query("callback_method", "fragment")
            .query("return_url", return_url)
            .query("scope", self.scope.as_str())
            .query("expiration", "never")
            .query("response_type", "code");
        if let Some(name) = &self.app_name {
            request = request.query("name", name.as_str());
        }
        self.client.url_for(&request.build()?)
    }

    /// Keeps the token returned to `user_id` by the authorization flow.
    pub async fn store_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.store
            .upsert(TokenRecord::new(self.client.destination(), user_id, token))
            .await?;
        tracing::info!(
            destination = %self.client.destination(),
            user_id = %user_id,
            "Stored user token"
        );
        Ok(())
    }

    /// Whether `user_id` has authorized this application.
    pub async fn is_connected(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .store
            .lookup(self.client.destination(), user_id)
            .await?
            .is_some())
    }

    /// Fetches the profile of `member_id` (`"me"` for the user themselves).
    pub async fn member_profile(&self, user_id: &str, member_id: &str) -> Result<Member> {
        let token = self.token_for(user_id).await?;
        let spec = self
            .client
            .request(Method::GET, "/members/{id}")
            .path_var("id", member_id)
            .query("token", token)
            .build()?;
        Ok(self.client.fetch_one(spec).await?.data)
    }

    /// Lists the boards of the user's own member.
    pub async fn boards(&self, user_id: &str) -> Result<Vec<Board>> {
        let token = self.token_for(user_id).await?;
        let spec = self
            .client
            .request(Method::GET, "/members/me/boards")
            .query("token", token)
            .shape(ResponseShape::Collection)
            .build()?;
        Ok(self.client.fetch_many(spec).await?.data)
    }

    async fn token_for(&self, user_id: &str) -> Result<String> {
        self.store
            .lookup(self.client.destination(), user_id)
            .await?
            .map(|record| record.token)
            .ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "User `{}` has not authorized `{}`",
                    user_id,
                    self.client.destination()
                ))
            })
    }
}
