use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RenderError, ScrapeError};
use crate::numeral::parse_numeral;
use crate::render::{Locator, RenderClient, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub url: Url,
    pub index: u32,
}

/// How the loaded page advertises that another page follows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    #[default]
    None,
    Present(Locator),
    Enabled(Locator),
    LastIndex(Locator),
}

/// How the successor page's URL is derived.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NextRef {
    #[default]
    QueryParam,
    /// The affordance element carries the next URL in this attribute, possibly
    /// wrapped in a script snippet and with `\xNN` escapes.
    Attribute(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationSpec {
    #[serde(default = "PaginationSpec::default_param")]
    pub param: String,
    #[serde(default)]
    pub affordance: Affordance,
    #[serde(default)]
    pub next: NextRef,
}

impl PaginationSpec {
    pub fn default_param() -> String {
        "page".to_owned()
    }

    pub fn single_page() -> Self {
        Self {
            param: Self::default_param(),
            affordance: Affordance::None,
            next: NextRef::QueryParam,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStep {
    Next(PageRef),
    Exhausted,
}

/// Walks one paginated collection forward, one page per round.
///
/// The caller opens `current()` with the same session it then passes to
/// `advance`; the affordance is read from whatever that session has loaded.
#[derive(Debug)]
pub struct Pager<'a> {
    spec: &'a PaginationSpec,
    current: PageRef,
    last_index: Option<u32>,
    exhausted: bool,
}

impl<'a> Pager<'a> {
    pub fn new(root: &Url, spec: &'a PaginationSpec) -> Self {
        let index = page_index(root, &spec.param).unwrap_or(1);
        Self {
            spec,
            current: PageRef {
                url: root.clone(),
                index,
            },
            last_index: None,
            exhausted: false,
        }
    }

    pub fn current(&self) -> &PageRef {
        &self.current
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn advance(&mut self, client: &mut dyn RenderClient) -> Result<PageStep, ScrapeError> {
        if self.exhausted {
            return Ok(PageStep::Exhausted);
        }
        let step = self.check(client).await;
        match &step {
            Ok(PageStep::Next(next)) => self.current = next.clone(),
            Ok(PageStep::Exhausted) | Err(_) => self.exhausted = true,
        }
        step
    }

    async fn check(&mut self, client: &mut dyn RenderClient) -> Result<PageStep, ScrapeError> {
        let affordance = match &self.spec.affordance {
            Affordance::None => return Ok(PageStep::Exhausted),
            Affordance::Present(locator) => match lookup(client, locator).await? {
                Some(found) => found,
                None => return Ok(PageStep::Exhausted),
            },
            Affordance::Enabled(locator) => match lookup(client, locator).await? {
                Some(found) if found.attribute("disabled").is_none() => found,
                _ => return Ok(PageStep::Exhausted),
            },
            Affordance::LastIndex(locator) => {
                let last = match self.last_index {
                    Some(last) => last,
                    None => {
                        let last = lookup(client, locator)
                            .await?
                            .and_then(|found| parse_numeral(found.text()))
                            .and_then(|n| u32::try_from(n).ok())
                            .unwrap_or(1);
                        self.last_index = Some(last);
                        last
                    }
                };
                if self.current.index >= last {
                    return Ok(PageStep::Exhausted);
                }
                return Ok(self.query_successor());
            }
        };

        match &self.spec.next {
            NextRef::QueryParam => Ok(self.query_successor()),
            NextRef::Attribute(name) => {
                let Some(index) = self.current.index.checked_add(1) else {
                    return Ok(PageStep::Exhausted);
                };
                let raw = affordance.attribute(name).ok_or_else(|| {
                    ScrapeError::MalformedMarkup(format!("next-page control has no {name} attribute"))
                })?;
                let url = decode_script_url(raw)
                    .and_then(|target| self.current.url.join(&target).ok())
                    .ok_or_else(|| {
                        ScrapeError::MalformedMarkup(format!("next-page {name} is not a url: {raw}"))
                    })?;
                Ok(PageStep::Next(PageRef { url, index }))
            }
        }
    }

    /// A page index past `u32::MAX` cannot be addressed, so the walk ends there.
    fn query_successor(&self) -> PageStep {
        match self.current.index.checked_add(1) {
            Some(index) => PageStep::Next(PageRef {
                url: with_page_index(&self.current.url, &self.spec.param, index),
                index,
            }),
            None => PageStep::Exhausted,
        }
    }
}

/// A lookup that timed out or hit a failed load means the control was not
/// rendered, which is how the last page looks.
async fn lookup(
    client: &mut dyn RenderClient,
    locator: &Locator,
) -> Result<Option<crate::render::Element>, ScrapeError> {
    match locator.locate(client, Scope::Document).await {
        Ok(found) => Ok(found),
        Err(RenderError::Timeout(msg)) | Err(RenderError::Load(msg)) => {
            tracing::debug!(%msg, "next-page control lookup gave up");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn page_index(url: &Url, param: &str) -> Option<u32> {
    url.query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|index| *index >= 1)
}

pub fn with_page_index(url: &Url, param: &str, index: u32) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut next = url.clone();
    next.set_query(None);
    {
        let mut pairs = next.query_pairs_mut();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(param, &index.to_string());
    }
    next
}

/// Pulls a URL out of values like `window.location='/path?a\x3d1\x26b\x3d2'`.
fn decode_script_url(raw: &str) -> Option<String> {
    let quoted = match (raw.find('\''), raw.rfind('\'')) {
        (Some(start), Some(end)) if end > start => &raw[start + 1..end],
        _ => raw.trim(),
    };
    let mut out = String::with_capacity(quoted.len());
    let mut rest = quoted;
    while let Some(pos) = rest.find("\\x") {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 2..pos + 4)?;
        let byte = u8::from_str_radix(code, 16).ok()?;
        out.push(char::from(byte));
        rest = &rest[pos + 4..];
    }
    out.push_str(rest);
    if out.is_empty() { None } else { Some(out) }
}
