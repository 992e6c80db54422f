use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FailureKind, RenderError, ScrapeError};
use crate::numeral::ParseRule;
use crate::render::{Element, Locator, RenderClient, Scope, locate_path};

const MEASURE_HEIGHT: &str = "return document.body.scrollHeight";
const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    #[default]
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Alternative locator paths, tried in order. Empty means the item itself.
    #[serde(default)]
    pub paths: Vec<Vec<Locator>>,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default)]
    pub parse: ParseRule,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
            source: ValueSource::Text,
            parse: ParseRule::FirstToken,
        }
    }

    pub fn path(mut self, path: Vec<Locator>) -> Self {
        self.paths.push(path);
        self
    }

    pub fn parse(mut self, parse: ParseRule) -> Self {
        self.parse = parse;
        self
    }
}

pub type FieldSchema = Vec<FieldSpec>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrollSpec {
    #[serde(default = "ScrollSpec::default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "ScrollSpec::default_max_polls")]
    pub max_polls: u32,
}

impl Default for ScrollSpec {
    fn default() -> Self {
        Self {
            poll_ms: Self::default_poll_ms(),
            max_polls: Self::default_max_polls(),
        }
    }
}

impl ScrollSpec {
    fn default_poll_ms() -> u64 {
        500
    }

    fn default_max_polls() -> u32 {
        50
    }
}

/// Clicks a "show more" control until it is gone or disabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpandSpec {
    pub button: Locator,
    #[serde(default = "ExpandSpec::default_max_clicks")]
    pub max_clicks: u32,
}

impl ExpandSpec {
    fn default_max_clicks() -> u32 {
        50
    }
}

/// Items that only link to the page carrying their numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailSpec {
    /// Searched inside the listing item; without it the item itself carries
    /// the attribute.
    #[serde(default)]
    pub link: Option<Locator>,
    #[serde(default = "DetailSpec::default_attribute")]
    pub attribute: String,
    /// `{}` is replaced by the attribute value; without a template the value
    /// is resolved against the listing URL.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub expand: Option<ExpandSpec>,
}

impl DetailSpec {
    fn default_attribute() -> String {
        "href".to_owned()
    }

    pub fn target(&self, item: &Element, listing: &Url) -> Result<Url, ScrapeError> {
        let value = item.attribute(&self.attribute).ok_or_else(|| {
            ScrapeError::MalformedMarkup(format!("detail link has no {} attribute", self.attribute))
        })?;
        let target = match &self.template {
            Some(template) => Url::parse(&template.replace("{}", value)),
            None => listing.join(value),
        };
        target.map_err(|err| ScrapeError::MalformedMarkup(format!("detail link {value:?}: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of extracting one item. Fields that failed are listed in
/// `failures`; the remaining fields keep their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRecord {
    pub values: BTreeMap<String, u64>,
    pub failures: Vec<FieldFailure>,
}

impl ItemRecord {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every field of `schema` failed for the same reason.
    pub fn failed(schema: &[FieldSpec], err: &ScrapeError) -> Self {
        Self {
            values: BTreeMap::new(),
            failures: schema
                .iter()
                .map(|field| FieldFailure {
                    field: field.name.clone(),
                    kind: err.kind(),
                    message: err.to_string(),
                })
                .collect(),
        }
    }
}

/// Scrolls to the bottom until two consecutive height readings agree.
/// Returns the number of readings taken.
pub async fn settle_scroll(
    client: &mut dyn RenderClient,
    spec: &ScrollSpec,
) -> Result<u32, ScrapeError> {
    let mut last = measure_height(client).await?;
    let mut readings = 1;
    for _ in 0..spec.max_polls {
        client.execute(SCROLL_TO_BOTTOM).await?;
        tokio::time::sleep(Duration::from_millis(spec.poll_ms)).await;
        let height = measure_height(client).await?;
        readings += 1;
        if height == last {
            return Ok(readings);
        }
        last = height;
    }
    Err(ScrapeError::TransientLoad(format!(
        "page height still growing after {} scrolls",
        spec.max_polls
    )))
}

async fn measure_height(client: &mut dyn RenderClient) -> Result<u64, ScrapeError> {
    let value = client.execute(MEASURE_HEIGHT).await?;
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|height| height.max(0.0) as u64))
        .ok_or_else(|| ScrapeError::MalformedMarkup(format!("scroll height is not a number: {value}")))
}

pub async fn expand(client: &mut dyn RenderClient, spec: &ExpandSpec) -> Result<u32, ScrapeError> {
    let mut clicks = 0;
    while clicks < spec.max_clicks {
        let Some(button) = spec.button.locate(client, Scope::Document).await? else {
            break;
        };
        if button.attribute("disabled").is_some() {
            break;
        }
        client.click(button.handle()).await?;
        clicks += 1;
    }
    Ok(clicks)
}

/// The items of one loaded page, extracted one at a time.
#[derive(Debug)]
pub struct ItemCursor {
    items: VecDeque<Element>,
}

impl ItemCursor {
    /// Settles infinite scroll when asked to, then enumerates the page's items.
    pub async fn open(
        client: &mut dyn RenderClient,
        items: &Locator,
        scroll: Option<&ScrollSpec>,
    ) -> Result<Self, ScrapeError> {
        if let Some(scroll) = scroll {
            let readings = settle_scroll(client, scroll).await?;
            tracing::debug!(readings, "scroll height settled");
        }
        let found = match items.find_all(client, Scope::Document).await {
            Ok(found) => found,
            Err(RenderError::Timeout(_)) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            items: found.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The next raw item element, for callers that follow item links instead
    /// of reading fields in place.
    pub fn next_element(&mut self) -> Option<Element> {
        self.items.pop_front()
    }

    pub async fn next(
        &mut self,
        client: &mut dyn RenderClient,
        schema: &[FieldSpec],
    ) -> Option<ItemRecord> {
        let item = self.items.pop_front()?;
        Some(extract_fields(client, Scope::Within(item.handle()), Some(&item), schema).await)
    }
}

/// Extracts every field of `schema` inside `scope`. `item` is the element the
/// scope was taken from; it answers fields with an empty path.
pub async fn extract_fields(
    client: &mut dyn RenderClient,
    scope: Scope,
    item: Option<&Element>,
    schema: &[FieldSpec],
) -> ItemRecord {
    let mut record = ItemRecord::default();
    for field in schema {
        match extract_field(client, scope, item, field).await {
            Ok(value) => {
                record.values.insert(field.name.clone(), value);
            }
            Err(err) => record.failures.push(FieldFailure {
                field: field.name.clone(),
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
    record
}

async fn extract_field(
    client: &mut dyn RenderClient,
    scope: Scope,
    item: Option<&Element>,
    field: &FieldSpec,
) -> Result<u64, ScrapeError> {
    if field.paths.is_empty() {
        let item = item.ok_or_else(|| {
            ScrapeError::MalformedMarkup(format!("field {} needs a locator path", field.name))
        })?;
        return read_value(item, field);
    }

    let mut last_err = None;
    for path in &field.paths {
        match locate_path(client, scope, path).await {
            Ok(Some(element)) => match read_value(&element, field) {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            },
            Ok(None) => {
                last_err = Some(ScrapeError::TransientLoad(format!(
                    "no element for field {}",
                    field.name
                )))
            }
            Err(RenderError::Session(msg)) => return Err(ScrapeError::Session(msg)),
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ScrapeError::MalformedMarkup(format!("field {} has no usable path", field.name))
    }))
}

fn read_value(element: &Element, field: &FieldSpec) -> Result<u64, ScrapeError> {
    let text = match &field.source {
        ValueSource::Text => element.text(),
        ValueSource::Attribute(name) => element.attribute(name).ok_or_else(|| {
            ScrapeError::MalformedMarkup(format!("field {} lacks attribute {name}", field.name))
        })?,
    };
    field.parse.parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_render::FakeBrowser;
    use crate::render::Pick;

    const PROFILES: &str = r#"<html><body>
      <div class="container-fluid">
        <span class="u-ml0x">Professor</span>
        <span class="u-ml0x">Followers 12 Views 1,204</span>
        <span class="papers">8 papers</span>
      </div>
      <div class="container-fluid">
        <span class="u-ml0x">Lecturer</span>
        <span class="u-ml0x">Followers 3 Views 55</span>
      </div>
      <div class="container-fluid">
        <span class="u-ml0x">Visitor</span>
        <span class="u-ml0x">Followers 1 Views hidden</span>
        <span class="papers">2 papers</span>
      </div>
    </body></html>"#;

    fn schema() -> FieldSchema {
        vec![
            FieldSpec::new("views")
                .path(vec![Locator::class("u-ml0x").pick(Pick::Index(1))])
                .parse(ParseRule::Token(3)),
            FieldSpec::new("papers").path(vec![Locator::class("papers")]),
        ]
    }

    async fn cursor_over(html: &str) -> anyhow::Result<(FakeBrowser, ItemCursor)> {
        let mut browser = FakeBrowser::new().with_page("https://example.com/", html);
        browser.open(&Url::parse("https://example.com/")?).await?;
        let cursor = ItemCursor::open(&mut browser, &Locator::class("container-fluid"), None).await?;
        Ok((browser, cursor))
    }

    #[tokio::test]
    async fn one_failed_field_keeps_the_others() -> anyhow::Result<()> {
        let (mut browser, mut cursor) = cursor_over(PROFILES).await?;
        assert_eq!(cursor.len(), 3);

        let first = cursor.next(&mut browser, &schema()).await.expect("first item");
        assert!(first.is_complete());
        assert_eq!(first.values.get("views"), Some(&1204));
        assert_eq!(first.values.get("papers"), Some(&8));

        let second = cursor.next(&mut browser, &schema()).await.expect("second item");
        assert_eq!(second.values.get("views"), Some(&55));
        assert_eq!(second.failures.len(), 1);
        assert_eq!(second.failures[0].field, "papers");
        assert_eq!(second.failures[0].kind, FailureKind::TransientLoad);

        let third = cursor.next(&mut browser, &schema()).await.expect("third item");
        assert_eq!(third.values.get("papers"), Some(&2));
        assert_eq!(third.failures[0].field, "views");
        assert_eq!(third.failures[0].kind, FailureKind::UnparsableNumeral);

        assert!(cursor.next(&mut browser, &schema()).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn page_without_items_is_empty_not_error() -> anyhow::Result<()> {
        let (mut browser, mut cursor) = cursor_over("<html><body><p>none</p></body></html>").await?;
        assert!(cursor.is_empty());
        assert!(cursor.next(&mut browser, &schema()).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn empty_path_reads_the_item_itself() -> anyhow::Result<()> {
        let mut browser = FakeBrowser::new().with_page(
            "https://example.com/docs",
            r#"<html><body><span class="js-view-count">1,500 Views</span><span class="js-view-count">20 Views</span></body></html>"#,
        );
        browser.open(&Url::parse("https://example.com/docs")?).await?;
        let mut cursor = ItemCursor::open(&mut browser, &Locator::class("js-view-count"), None).await?;
        let schema = vec![FieldSpec::new("reads")];

        let mut total = 0;
        while let Some(record) = cursor.next(&mut browser, &schema).await {
            total += record.values.get("reads").copied().unwrap_or(0);
        }
        assert_eq!(total, 1520);
        Ok(())
    }

    #[tokio::test]
    async fn fallback_path_is_used_when_first_is_unsupported() -> anyhow::Result<()> {
        let mut browser = FakeBrowser::new().with_page(
            "https://example.com/profile",
            r#"<html><body><div class="stat"><div>17</div></div><div class="stat"><div>4</div></div></body></html>"#,
        );
        browser.open(&Url::parse("https://example.com/profile")?).await?;
        let field = FieldSpec::new("citations")
            .path(vec![Locator::xpath("//*[@id='about']/div")])
            .path(vec![Locator::class("stat").pick(Pick::Index(1)), Locator::tag("div")]);

        let record = extract_fields(&mut browser, Scope::Document, None, &[field]).await;
        assert_eq!(record.values.get("citations"), Some(&4));
        assert!(record.is_complete());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_settles_after_two_equal_readings() -> anyhow::Result<()> {
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/docs", "<html><body></body></html>")
            .with_heights(&[100, 250, 250]);
        let log = browser.log();
        browser.open(&Url::parse("https://example.com/docs")?).await?;

        let readings = settle_scroll(&mut browser, &ScrollSpec::default()).await?;
        assert_eq!(readings, 3);
        let log = log.lock().expect("call log");
        assert_eq!(log.height_reads, 3);
        assert_eq!(log.scrolls, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_enumerated_only_after_scroll_settles() -> anyhow::Result<()> {
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/docs", r#"<html><body><i class="n">1</i></body></html>"#)
            .with_heights(&[100, 250, 250]);
        let log = browser.log();
        browser.open(&Url::parse("https://example.com/docs")?).await?;

        let cursor = ItemCursor::open(&mut browser, &Locator::class("n"), Some(&ScrollSpec::default())).await?;
        assert_eq!(cursor.len(), 1);
        let log = log.lock().expect("call log");
        assert_eq!(log.height_reads, 3);
        assert_eq!(log.finds, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn endless_scroll_surfaces_transient_failure() -> anyhow::Result<()> {
        let heights: Vec<u64> = (1..=20).map(|n| n * 100).collect();
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/docs", "<html><body></body></html>")
            .with_heights(&heights);
        browser.open(&Url::parse("https://example.com/docs")?).await?;

        let spec = ScrollSpec {
            poll_ms: 10,
            max_polls: 5,
        };
        let err = settle_scroll(&mut browser, &spec)
            .await
            .expect_err("growing page must not settle");
        assert_eq!(err.kind(), FailureKind::TransientLoad);
        Ok(())
    }

    fn rows(count: usize, button: &str) -> String {
        let rows: String = (1..=count).map(|n| format!("<tr class=\"row\"><td>{n}</td></tr>")).collect();
        format!("<html><body><table>{rows}</table>{button}</body></html>")
    }

    #[tokio::test]
    async fn show_more_clicks_until_the_button_is_gone_or_disabled() -> anyhow::Result<()> {
        let more = r#"<button id="more">Show more</button>"#;
        let spec = ExpandSpec {
            button: Locator::id("more"),
            max_clicks: 50,
        };

        let gone = rows(3, "");
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/p", &rows(1, more))
            .with_click_results(&[rows(2, more).as_str(), gone.as_str()]);
        browser.open(&Url::parse("https://example.com/p")?).await?;
        assert_eq!(expand(&mut browser, &spec).await?, 2);
        let cursor = ItemCursor::open(&mut browser, &Locator::class("row"), None).await?;
        assert_eq!(cursor.len(), 3);

        let disabled = rows(2, r#"<button id="more" disabled>Show more</button>"#);
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/p", &rows(1, more))
            .with_click_results(&[disabled.as_str(), rows(9, more).as_str()]);
        let log = browser.log();
        browser.open(&Url::parse("https://example.com/p")?).await?;
        assert_eq!(expand(&mut browser, &spec).await?, 1);
        assert_eq!(log.lock().expect("call log").clicks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn show_more_stops_at_the_click_bound() -> anyhow::Result<()> {
        let more = r#"<button id="more">Show more</button>"#;
        let pages: Vec<String> = (2..=10).map(|n| rows(n, more)).collect();
        let pages: Vec<&str> = pages.iter().map(String::as_str).collect();
        let mut browser = FakeBrowser::new()
            .with_page("https://example.com/p", &rows(1, more))
            .with_click_results(&pages);
        let log = browser.log();
        browser.open(&Url::parse("https://example.com/p")?).await?;

        let spec = ExpandSpec {
            button: Locator::id("more"),
            max_clicks: 3,
        };
        assert_eq!(expand(&mut browser, &spec).await?, 3);
        assert_eq!(log.lock().expect("call log").clicks, 3);
        let cursor = ItemCursor::open(&mut browser, &Locator::class("row"), None).await?;
        assert_eq!(cursor.len(), 4);
        Ok(())
    }

    #[test]
    fn detail_target_uses_template_or_listing_url() -> anyhow::Result<()> {
        let listing = Url::parse("https://scholar.example/citations?view_op=search")?;
        let item = Element::new(
            crate::render::ElementHandle(0),
            String::new(),
            [
                ("href".to_owned(), "/citations?user=abc".to_owned()),
                ("data-account-key".to_owned(), "Jane_Doe".to_owned()),
            ]
            .into_iter()
            .collect(),
        );

        let joined = DetailSpec {
            link: Some(Locator::class("gs_ai_pho")),
            attribute: "href".to_owned(),
            template: None,
            expand: None,
        };
        assert_eq!(
            joined.target(&item, &listing)?.as_str(),
            "https://scholar.example/citations?user=abc"
        );

        let templated = DetailSpec {
            link: None,
            attribute: "data-account-key".to_owned(),
            template: Some("https://rg.example/profile/{}".to_owned()),
            expand: None,
        };
        assert_eq!(
            templated.target(&item, &listing)?.as_str(),
            "https://rg.example/profile/Jane_Doe"
        );

        let missing = DetailSpec {
            attribute: "data-missing".to_owned(),
            ..templated
        };
        assert!(missing.target(&item, &listing).is_err());
        Ok(())
    }
}
