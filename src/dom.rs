use std::collections::{BTreeMap, HashMap};

use scraper::{ElementRef, Html, Selector};

use crate::error::RenderError;
use crate::render::{By, Element, ElementHandle, Scope};

/// A fetched HTML document that can be queried like a rendered page.
///
/// Handles are the document-order index of an element, so they stay valid
/// for as long as the same markup is kept. The parsed tree is rebuilt per
/// query; `scraper::Html` is not `Send` and a session must be.
#[derive(Debug, Clone, Default)]
pub struct Document {
    html: String,
}

impl Document {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn query(&self, scope: Scope, by: By, value: &str) -> Result<Vec<Element>, RenderError> {
        let css = css_for(by, value)?;
        let selector = Selector::parse(&css)
            .map_err(|err| RenderError::Unsupported(format!("selector {css:?}: {err:?}")))?;

        let parsed = Html::parse_document(&self.html);
        let order: HashMap<_, usize> = elements_in_order(&parsed)
            .enumerate()
            .map(|(index, element)| (element.id(), index))
            .collect();

        let matches: Vec<ElementRef<'_>> = match scope {
            Scope::Document => parsed.select(&selector).collect(),
            Scope::Within(ElementHandle(index)) => {
                let Some(parent) = elements_in_order(&parsed).nth(index) else {
                    return Err(RenderError::Load(format!(
                        "stale element handle {index}"
                    )));
                };
                parent.select(&selector).collect()
            }
        };

        Ok(matches
            .into_iter()
            .filter_map(|element| {
                let index = order.get(&element.id()).copied()?;
                Some(snapshot(ElementHandle(index), element))
            })
            .collect())
    }

    /// The `href` an element links to, if the handle names an anchor.
    pub fn href_of(&self, handle: ElementHandle) -> Option<String> {
        let parsed = Html::parse_document(&self.html);
        let element = elements_in_order(&parsed).nth(handle.0)?;
        element.value().attr("href").map(str::to_owned)
    }
}

fn elements_in_order(parsed: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    parsed.root_element().descendants().filter_map(ElementRef::wrap)
}

fn css_for(by: By, value: &str) -> Result<String, RenderError> {
    let value = value.trim();
    match by {
        By::Class => Ok(value
            .split_whitespace()
            .map(|class| format!(".{class}"))
            .collect::<String>()),
        By::Tag => Ok(value.to_owned()),
        By::Id => Ok(format!("#{value}")),
        By::Css => Ok(value.to_owned()),
        By::Xpath => Err(RenderError::Unsupported(format!("xpath {value:?}"))),
    }
}

fn snapshot(handle: ElementHandle, element: ElementRef<'_>) -> Element {
    let text = element
        .text()
        .flat_map(str::split_ascii_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    let attributes: BTreeMap<String, String> = element
        .value()
        .attrs()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
    Element::new(handle, text, attributes)
}
