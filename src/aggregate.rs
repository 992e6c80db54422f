use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type MetricTotals = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FoldError {
    #[error("unknown subunit: {0}")]
    UnknownSubunit(String),
}

/// Running sums of one institution: subunit -> metric -> total.
///
/// Folding only ever adds, so the same multiset of increments gives the same
/// totals in any order. `freeze` consumes the aggregator, so nothing can be
/// folded into totals that have been handed out.
#[derive(Debug, Clone)]
pub struct Aggregator {
    institution: String,
    totals: BTreeMap<String, MetricTotals>,
}

impl Aggregator {
    /// Every subunit starts with every metric at zero.
    pub fn new<S, M>(institution: impl Into<String>, subunits: S, metrics: M) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        let zeroed: MetricTotals = metrics.into_iter().map(|metric| (metric.into(), 0)).collect();
        let totals = subunits
            .into_iter()
            .map(|subunit| (subunit.into(), zeroed.clone()))
            .collect();
        Self {
            institution: institution.into(),
            totals,
        }
    }

    pub fn fold<I, K>(&mut self, subunit: &str, increments: I) -> Result<(), FoldError>
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        let cells = self
            .totals
            .get_mut(subunit)
            .ok_or_else(|| FoldError::UnknownSubunit(subunit.to_owned()))?;
        for (metric, value) in increments {
            let cell = cells.entry(metric.into()).or_insert(0);
            *cell = cell.saturating_add(value);
        }
        Ok(())
    }

    pub fn freeze(self) -> Totals {
        Totals {
            institution: self.institution,
            subunits: self.totals,
        }
    }
}

/// Frozen totals, read by reporting and checkpointing once traversal ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    institution: String,
    subunits: BTreeMap<String, MetricTotals>,
}

impl Totals {
    pub fn from_parts(institution: impl Into<String>, subunits: BTreeMap<String, MetricTotals>) -> Self {
        Self {
            institution: institution.into(),
            subunits,
        }
    }

    pub fn institution(&self) -> &str {
        &self.institution
    }

    pub fn totals_for(&self, subunit: &str) -> Option<&MetricTotals> {
        self.subunits.get(subunit)
    }

    pub fn subunits(&self) -> &BTreeMap<String, MetricTotals> {
        &self.subunits
    }
}
