use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::{DetailSpec, ExpandSpec, FieldSchema, FieldSpec, ScrollSpec};
use crate::numeral::ParseRule;
use crate::pager::{Affordance, NextRef, PaginationSpec};
use crate::render::{Locator, LoginFlow, Pick};

/// Everything the engine needs to know about one site's markup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteProfile {
    pub name: String,
    #[serde(default)]
    pub login: Option<LoginFlow>,
    #[serde(default)]
    pub discovery: Option<DiscoveryRule>,
    pub collections: Vec<CollectionSpec>,
}

/// How an institutional index page lists its departments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryRule {
    pub marker: Locator,
    pub link: Locator,
    #[serde(default = "DiscoveryRule::default_attribute")]
    pub attribute: String,
    /// The final marker is page chrome rather than a department.
    #[serde(default)]
    pub skip_last_marker: bool,
    /// Collection names, by link position within a marker.
    pub link_collections: Vec<String>,
}

impl DiscoveryRule {
    fn default_attribute() -> String {
        "href".to_owned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Appended to explicit and direct roots to reach this collection.
    #[serde(default)]
    pub root_suffix: Option<String>,
    pub items: Locator,
    #[serde(default = "PaginationSpec::single_page")]
    pub pagination: PaginationSpec,
    #[serde(default)]
    pub scroll: Option<ScrollSpec>,
    #[serde(default)]
    pub detail: Option<DetailSpec>,
    pub schema: FieldSchema,
}

impl CollectionSpec {
    pub fn root_for(&self, base: &Url) -> Result<Url, url::ParseError> {
        match &self.root_suffix {
            None => Ok(base.clone()),
            Some(suffix) => {
                let mut joined = base.as_str().trim_end_matches('/').to_owned();
                joined.push_str(suffix);
                Url::parse(&joined)
            }
        }
    }
}

impl SiteProfile {
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "academia" => Some(academia()),
            "google_scholar" => Some(google_scholar()),
            "researchgate" => Some(researchgate()),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Metric names across all collections, in first-seen order.
    pub fn metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = Vec::new();
        for field in self.collections.iter().flat_map(|c| c.schema.iter()) {
            if !metrics.contains(&field.name) {
                metrics.push(field.name.clone());
            }
        }
        metrics
    }
}

pub fn academia() -> SiteProfile {
    let pagination = PaginationSpec {
        param: "page".to_owned(),
        affordance: Affordance::Present(Locator::class("next_page")),
        next: NextRef::QueryParam,
    };
    SiteProfile {
        name: "academia".to_owned(),
        login: None,
        discovery: Some(DiscoveryRule {
            marker: Locator::class("u-fs12"),
            link: Locator::tag("a"),
            attribute: "href".to_owned(),
            skip_last_marker: true,
            link_collections: vec!["profiles".to_owned(), "documents".to_owned()],
        }),
        collections: vec![
            CollectionSpec {
                name: "profiles".to_owned(),
                root_suffix: None,
                items: Locator::class("container-fluid"),
                pagination: pagination.clone(),
                scroll: None,
                detail: None,
                schema: vec![
                    FieldSpec::new("views")
                        .path(vec![Locator::class("u-ml0x").pick(Pick::Index(1))])
                        .parse(ParseRule::Token(3)),
                ],
            },
            CollectionSpec {
                name: "documents".to_owned(),
                root_suffix: Some("/Documents".to_owned()),
                items: Locator::class("js-view-count"),
                pagination,
                scroll: Some(ScrollSpec::default()),
                detail: None,
                schema: vec![FieldSpec::new("reads")],
            },
        ],
    }
}

pub fn google_scholar() -> SiteProfile {
    SiteProfile {
        name: "google_scholar".to_owned(),
        login: None,
        discovery: None,
        collections: vec![CollectionSpec {
            name: "authors".to_owned(),
            root_suffix: None,
            items: Locator::css("#gsc_sa_ccl .gsc_1usr"),
            pagination: PaginationSpec {
                param: "page".to_owned(),
                affordance: Affordance::Enabled(Locator::tag("button").pick(Pick::Last)),
                next: NextRef::Attribute("onclick".to_owned()),
            },
            scroll: None,
            detail: Some(DetailSpec {
                link: Some(Locator::class("gs_ai_pho")),
                attribute: "href".to_owned(),
                template: None,
                expand: Some(ExpandSpec {
                    button: Locator::id("gsc_bpf_more"),
                    max_clicks: 50,
                }),
            }),
            schema: vec![
                FieldSpec::new("publications")
                    .path(vec![Locator::id("gsc_a_nn")])
                    .parse(ParseRule::LastSegment("–".to_owned())),
                FieldSpec::new("citations").path(vec![Locator::class("gsc_rsb_std")]),
            ],
        }],
    }
}

pub fn researchgate() -> SiteProfile {
    let nested_div = || vec![Locator::tag("div"); 5];
    let box_item = |index: usize| {
        let mut path = vec![Locator::class("application-box-layout__item").pick(Pick::Index(index))];
        path.extend(nested_div());
        path
    };
    let login_url = Url::parse("https://www.researchgate.net/login");
    SiteProfile {
        name: "researchgate".to_owned(),
        login: login_url.ok().map(|url| LoginFlow {
            url,
            username: Locator::id("input-login"),
            password: Locator::id("input-password"),
            submit: Locator::xpath("//*[contains(@class, 'nova-c-button__label')]/.."),
        }),
        discovery: None,
        collections: vec![CollectionSpec {
            name: "members".to_owned(),
            root_suffix: None,
            items: Locator::css("li.people-item"),
            pagination: PaginationSpec {
                param: "page".to_owned(),
                affordance: Affordance::LastIndex(
                    Locator::class("navi-page-link").pick(Pick::Last),
                ),
                next: NextRef::QueryParam,
            },
            scroll: None,
            detail: Some(DetailSpec {
                link: None,
                attribute: "data-account-key".to_owned(),
                template: Some("https://www.researchgate.net/profile/{}".to_owned()),
                expand: None,
            }),
            schema: vec![
                FieldSpec::new("reads")
                    .path(vec![Locator::xpath(
                        r#"//*[@id="about"]/div/div/div[2]/div/div/div[2]/div[1]"#,
                    )])
                    .path(box_item(3))
                    .parse(ParseRule::Whole),
                FieldSpec::new("citations")
                    .path(vec![Locator::xpath(
                        r#"//*[@id="about"]/div/div/div[2]/div/div/div[3]/div[1]"#,
                    )])
                    .path(box_item(1))
                    .parse(ParseRule::Whole),
            ],
        }],
    }
}
