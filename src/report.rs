use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::aggregate::Totals;
use crate::cli::ReportArgs;

/// One `"<subunit> <phrase> <value>"` line per subunit and metric. Subunits in
/// `order` come first, the rest follow alphabetically.
pub fn render(totals: &Totals, order: &[String], phrases: &BTreeMap<String, String>) -> String {
    let subunits = totals.subunits();
    let mut names: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|name| subunits.contains_key(*name))
        .collect();
    for name in subunits.keys() {
        if !names.contains(&name.as_str()) {
            names.push(name.as_str());
        }
    }

    let mut out = String::new();
    for name in names {
        let Some(metrics) = subunits.get(name) else {
            continue;
        };
        for (metric, value) in metrics {
            let phrase = phrases
                .get(metric)
                .cloned()
                .unwrap_or_else(|| format!("{metric} total"));
            out.push_str(&format!("{name} {phrase} {value}\n"));
        }
    }
    out
}

pub async fn run(args: ReportArgs) -> anyhow::Result<()> {
    let checkpoint = crate::checkpoint::load(Path::new(&args.checkpoint))
        .await
        .context("load checkpoint")?;

    let (order, phrases) = match &args.config {
        Some(path) => {
            let config = crate::config::RunConfig::load(path).context("load run config")?;
            let order = config.subunits.iter().map(|entry| entry.name.clone()).collect();
            (order, config.report)
        }
        None => (Vec::new(), BTreeMap::new()),
    };

    let text = render(&checkpoint.totals(), &order, &phrases);
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes()).context("write report")?;
    stdout.flush().context("flush report")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;

    #[test]
    fn lines_follow_configured_order_and_phrases() {
        let mut aggregator = Aggregator::new("IPP", ["ESE", "ISEP", "ESHT"], ["reads", "views"]);
        aggregator.fold("ISEP", [("reads", 120), ("views", 7)]).expect("fold");
        aggregator.fold("ESE", [("reads", 3)]).expect("fold");
        let totals = aggregator.freeze();

        let order = vec!["ISEP".to_owned(), "ESE".to_owned()];
        let phrases: BTreeMap<String, String> =
            [("views".to_owned(), "profile views".to_owned())].into_iter().collect();

        assert_eq!(
            render(&totals, &order, &phrases),
            "ISEP reads total 120\n\
             ISEP profile views 7\n\
             ESE reads total 3\n\
             ESE profile views 0\n\
             ESHT reads total 0\n\
             ESHT profile views 0\n"
        );
    }

    #[test]
    fn empty_totals_render_nothing() {
        let totals = Aggregator::new("IPP", Vec::<String>::new(), ["reads"]).freeze();
        assert_eq!(render(&totals, &[], &BTreeMap::new()), "");
    }
}
