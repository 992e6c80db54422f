use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::dom::Document;
use crate::error::RenderError;
use crate::render::{By, Element, ElementHandle, RenderClient, RenderClientFactory, Scope};

/// In-memory render client: serves canned HTML by URL and replays scripted
/// scroll heights. Each click replaces the loaded page with the next scripted
/// markup.
#[derive(Debug, Default, Clone)]
pub struct FakeBrowser {
    pages: HashMap<String, String>,
    failing: HashMap<String, RenderError>,
    heights: VecDeque<u64>,
    clicks: VecDeque<String>,
    current: Option<Document>,
    log: Arc<Mutex<CallLog>>,
}

#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub opened: Vec<String>,
    pub height_reads: usize,
    pub scrolls: usize,
    pub closed: usize,
    pub finds: usize,
    pub clicks: usize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_owned(), html.to_owned());
        self
    }

    pub fn with_failure(mut self, url: &str, err: RenderError) -> Self {
        self.failing.insert(url.to_owned(), err);
        self
    }

    pub fn with_heights(mut self, heights: &[u64]) -> Self {
        self.heights = heights.iter().copied().collect();
        self
    }

    pub fn with_click_results(mut self, pages: &[&str]) -> Self {
        self.clicks = pages.iter().map(|html| (*html).to_owned()).collect();
        self
    }

    pub fn log(&self) -> Arc<Mutex<CallLog>> {
        Arc::clone(&self.log)
    }

    fn record(&self, f: impl FnOnce(&mut CallLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

#[async_trait]
impl RenderClient for FakeBrowser {
    async fn open(&mut self, url: &Url) -> Result<(), RenderError> {
        self.record(|log| log.opened.push(url.to_string()));
        if let Some(err) = self.failing.get(url.as_str()) {
            self.current = None;
            return Err(err.clone());
        }
        match self.pages.get(url.as_str()) {
            Some(html) => {
                self.current = Some(Document::new(html.clone()));
                Ok(())
            }
            None => {
                self.current = None;
                Err(RenderError::Load(format!("404 {url}")))
            }
        }
    }

    async fn find(
        &mut self,
        scope: Scope,
        by: By,
        value: &str,
    ) -> Result<Vec<Element>, RenderError> {
        self.record(|log| log.finds += 1);
        match &self.current {
            Some(doc) => doc.query(scope, by, value),
            None => Err(RenderError::Timeout("no page loaded".to_owned())),
        }
    }

    async fn click(&mut self, _element: ElementHandle) -> Result<(), RenderError> {
        if self.current.is_none() {
            return Err(RenderError::Timeout("no page loaded".to_owned()));
        }
        let Some(html) = self.clicks.pop_front() else {
            return Err(RenderError::Unsupported("click".to_owned()));
        };
        self.record(|log| log.clicks += 1);
        self.current = Some(Document::new(html));
        Ok(())
    }

    async fn fill(&mut self, _element: ElementHandle, _text: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("fill".to_owned()))
    }

    async fn execute(&mut self, script: &str) -> Result<serde_json::Value, RenderError> {
        if script.trim_start().starts_with("return") {
            self.record(|log| log.height_reads += 1);
            let height = if self.heights.len() > 1 {
                self.heights.pop_front()
            } else {
                self.heights.front().copied()
            };
            return Ok(serde_json::json!(height.unwrap_or(0)));
        }
        self.record(|log| log.scrolls += 1);
        Ok(serde_json::Value::Null)
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.record(|log| log.closed += 1);
        Ok(())
    }
}

/// Hands out clones of one configured browser; every clone shares the call log.
pub struct FakeFactory {
    browser: FakeBrowser,
}

impl FakeFactory {
    pub fn new(browser: FakeBrowser) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl RenderClientFactory for FakeFactory {
    async fn connect(&self) -> Result<Box<dyn RenderClient>, RenderError> {
        Ok(Box::new(self.browser.clone()))
    }
}
