use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{MetricTotals, Totals};
use crate::error::{FailureKind, ScrapeError};
use crate::extract::FieldFailure;
use crate::resolve::{CollectionRoot, Subunit};

/// Resolved roots and frozen totals of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub institution: String,
    pub site: String,
    pub run_id: String,
    pub written_at: String,
    pub roots: BTreeMap<String, Vec<CollectionRoot>>,
    pub totals: BTreeMap<String, MetricTotals>,
}

impl Checkpoint {
    pub fn new(site: &str, subunits: &[Subunit], totals: &Totals) -> Self {
        Self {
            institution: totals.institution().to_owned(),
            site: site.to_owned(),
            run_id: uuid::Uuid::new_v4().to_string(),
            written_at: chrono::Utc::now().to_rfc3339(),
            roots: subunits
                .iter()
                .map(|subunit| (subunit.name.clone(), subunit.collection_roots.clone()))
                .collect(),
            totals: totals.subunits().clone(),
        }
    }

    pub fn subunit(&self, name: &str) -> Option<Subunit> {
        self.roots.get(name).map(|roots| Subunit {
            name: name.to_owned(),
            collection_roots: roots.clone(),
        })
    }

    pub fn totals(&self) -> Totals {
        Totals::from_parts(self.institution.clone(), self.totals.clone())
    }
}

/// One caught failure, as written to `diagnostics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub subunit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

impl DiagnosticRecord {
    pub fn new(subunit: &str, err: &ScrapeError) -> Self {
        Self {
            subunit: subunit.to_owned(),
            collection: None,
            url: None,
            field: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn field_failure(subunit: &str, failure: &FieldFailure) -> Self {
        Self {
            subunit: subunit.to_owned(),
            collection: None,
            url: None,
            field: Some(failure.field.clone()),
            kind: failure.kind,
            message: failure.message.clone(),
        }
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_owned());
        self
    }

    pub fn url(mut self, url: &url::Url) -> Self {
        self.url = Some(url.to_string());
        self
    }
}
