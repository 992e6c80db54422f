use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RenderError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum By {
    Class,
    Tag,
    Id,
    Css,
    Xpath,
}

/// Opaque reference to an element of the page currently loaded in a session.
/// Handles are invalidated by the next `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Document,
    Within(ElementHandle),
}

/// Read-only snapshot of a matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    handle: ElementHandle,
    text: String,
    attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(handle: ElementHandle, text: String, attributes: BTreeMap<String, String>) -> Self {
        Self {
            handle,
            text,
            attributes,
        }
    }

    pub fn handle(&self) -> ElementHandle {
        self.handle
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// The narrow browser contract the scrape engine consumes.
///
/// `find` applies the client's own bounded wait and reports "nothing matched"
/// as an empty list; errors are reserved for load, session and capability
/// problems.
#[async_trait]
pub trait RenderClient: Send {
    async fn open(&mut self, url: &Url) -> Result<(), RenderError>;
    async fn find(
        &mut self,
        scope: Scope,
        by: By,
        value: &str,
    ) -> Result<Vec<Element>, RenderError>;
    async fn click(&mut self, element: ElementHandle) -> Result<(), RenderError>;
    async fn fill(&mut self, element: ElementHandle, text: &str) -> Result<(), RenderError>;
    async fn execute(&mut self, script: &str) -> Result<serde_json::Value, RenderError>;
    async fn close(&mut self) -> Result<(), RenderError>;
}

#[async_trait]
pub trait RenderClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RenderClient>, RenderError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    #[default]
    First,
    Last,
    Index(usize),
}

impl Pick {
    fn select(self, mut found: Vec<Element>) -> Option<Element> {
        match self {
            Pick::First => found.into_iter().next(),
            Pick::Last => found.pop(),
            Pick::Index(index) => found.into_iter().nth(index),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locator {
    pub by: By,
    pub value: String,
    #[serde(default)]
    pub pick: Pick,
}

impl Locator {
    pub fn new(by: By, value: impl Into<String>) -> Self {
        Self {
            by,
            value: value.into(),
            pick: Pick::First,
        }
    }

    pub fn class(value: impl Into<String>) -> Self {
        Self::new(By::Class, value)
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self::new(By::Tag, value)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(By::Id, value)
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(By::Css, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(By::Xpath, value)
    }

    pub fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }

    pub async fn find_all(
        &self,
        client: &mut dyn RenderClient,
        scope: Scope,
    ) -> Result<Vec<Element>, RenderError> {
        client.find(scope, self.by, &self.value).await
    }

    pub async fn locate(
        &self,
        client: &mut dyn RenderClient,
        scope: Scope,
    ) -> Result<Option<Element>, RenderError> {
        let found = self.find_all(client, scope).await?;
        Ok(self.pick.select(found))
    }
}

/// Follows a chain of locators, each step searching inside the previous match.
/// An empty path never matches.
pub async fn locate_path(
    client: &mut dyn RenderClient,
    scope: Scope,
    path: &[Locator],
) -> Result<Option<Element>, RenderError> {
    let mut scope = scope;
    let mut current = None;
    for step in path {
        let Some(found) = step.locate(client, scope).await? else {
            return Ok(None);
        };
        scope = Scope::Within(found.handle());
        current = Some(found);
    }
    Ok(current)
}

/// Form-based login performed once per session before any traversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginFlow {
    pub url: Url,
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A render client checked out for exactly one traversal.
///
/// Call [`Session::release`] on every exit path; a session dropped without
/// release is reported.
pub struct Session {
    client: Box<dyn RenderClient>,
    label: String,
    released: bool,
}

impl Session {
    pub async fn acquire(
        factory: &dyn RenderClientFactory,
        label: impl Into<String>,
    ) -> Result<Self, RenderError> {
        let client = factory.connect().await?;
        let label = label.into();
        tracing::debug!(session = %label, "render session acquired");
        Ok(Self {
            client,
            label,
            released: false,
        })
    }

    pub fn client(&mut self) -> &mut dyn RenderClient {
        self.client.as_mut()
    }

    pub async fn login(&mut self, flow: &LoginFlow, credentials: &Credentials) -> Result<(), RenderError> {
        let client = self.client();
        client.open(&flow.url).await?;

        let username = flow
            .username
            .locate(client, Scope::Document)
            .await?
            .ok_or_else(|| RenderError::Session("login form has no username field".to_owned()))?;
        client.fill(username.handle(), &credentials.username).await?;

        let password = flow
            .password
            .locate(client, Scope::Document)
            .await?
            .ok_or_else(|| RenderError::Session("login form has no password field".to_owned()))?;
        client.fill(password.handle(), &credentials.password).await?;

        let submit = flow
            .submit
            .locate(client, Scope::Document)
            .await?
            .ok_or_else(|| RenderError::Session("login form has no submit control".to_owned()))?;
        client.click(submit.handle()).await.map_err(|err| match err {
            RenderError::Session(_) => err,
            other => RenderError::Session(format!("submit login: {other}")),
        })?;

        tracing::debug!(session = %self.label, "logged in");
        Ok(())
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.client.close().await {
            tracing::warn!(session = %self.label, ?err, "closing render session failed");
        }
        tracing::debug!(session = %self.label, "render session released");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(session = %self.label, "render session dropped without release");
        }
    }
}
