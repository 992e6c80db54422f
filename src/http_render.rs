use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::config::RenderSettings;
use crate::dom::Document;
use crate::error::RenderError;
use crate::render::{By, Element, ElementHandle, RenderClient, RenderClientFactory, Scope};

/// Renders pages by fetching their HTML. Nothing is executed, so infinite
/// scroll settles at once and form login is unavailable.
pub struct HttpRenderClient {
    http: reqwest::Client,
    user_agent: String,
    page: Option<(Url, Document)>,
}

impl HttpRenderClient {
    async fn fetch(&self, url: &Url) -> Result<(Url, Document), RenderError> {
        let response = self
            .http
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| classify(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Load(format!("GET {url}: HTTP {status}")));
        }
        let final_url = response.url().clone();
        let html = response.text().await.map_err(|err| classify(url, err))?;
        Ok((final_url, Document::new(html)))
    }

    fn document(&self) -> Result<&(Url, Document), RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Timeout("no page loaded".to_owned()))
    }
}

fn classify(url: &Url, err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Timeout(format!("GET {url}: {err}"))
    } else {
        RenderError::Load(format!("GET {url}: {err}"))
    }
}

#[async_trait]
impl RenderClient for HttpRenderClient {
    async fn open(&mut self, url: &Url) -> Result<(), RenderError> {
        self.page = None;
        let page = self.fetch(url).await?;
        tracing::debug!(%url, bytes = page.1.html().len(), "page fetched");
        self.page = Some(page);
        Ok(())
    }

    async fn find(&mut self, scope: Scope, by: By, value: &str) -> Result<Vec<Element>, RenderError> {
        let (_, doc) = self.document()?;
        doc.query(scope, by, value)
    }

    /// Follows anchors; any other element needs a scripting client.
    async fn click(&mut self, element: ElementHandle) -> Result<(), RenderError> {
        let (base, doc) = self.document()?;
        let href = doc
            .href_of(element)
            .ok_or_else(|| RenderError::Unsupported("click on a non-link element".to_owned()))?;
        let target = base
            .join(&href)
            .map_err(|err| RenderError::Load(format!("link {href:?}: {err}")))?;
        self.open(&target).await
    }

    async fn fill(&mut self, _element: ElementHandle, _text: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("form input".to_owned()))
    }

    async fn execute(&mut self, script: &str) -> Result<serde_json::Value, RenderError> {
        let script = script.trim();
        if script.contains("scrollHeight") {
            if script.starts_with("return") {
                let (_, doc) = self.document()?;
                return Ok(serde_json::json!(doc.html().len()));
            }
            return Ok(serde_json::Value::Null);
        }
        Err(RenderError::Unsupported(format!("script: {script}")))
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.page = None;
        Ok(())
    }
}

pub struct HttpRenderFactory {
    http: reqwest::Client,
    user_agent: String,
}

impl HttpRenderFactory {
    pub fn new(settings: &RenderSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build render http client")?;
        Ok(Self {
            http,
            user_agent: settings.user_agent.clone(),
        })
    }
}

#[async_trait]
impl RenderClientFactory for HttpRenderFactory {
    async fn connect(&self) -> Result<Box<dyn RenderClient>, RenderError> {
        Ok(Box::new(HttpRenderClient {
            http: self.http.clone(),
            user_agent: self.user_agent.clone(),
            page: None,
        }))
    }
}
