use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::RunArgs;
use crate::config::RunConfig;
use crate::formats::Checkpoint;
use crate::http_render::HttpRenderFactory;
use crate::traverse::{SubunitPlan, SubunitWork, Traversal};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.jsonl";
pub const REPORT_FILE: &str = "report.txt";

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let out_dir = PathBuf::from(&args.out);
    if out_dir.exists() {
        anyhow::bail!("run output directory already exists: {}", out_dir.display());
    }

    let config = RunConfig::load(&args.config).context("load run config")?;
    let site = config.site_profile().context("select site profile")?;

    let resumed = match &args.checkpoint {
        Some(path) => {
            let checkpoint = crate::checkpoint::load(std::path::Path::new(path))
                .await
                .context("load resume checkpoint")?;
            if checkpoint.site != site.name {
                anyhow::bail!(
                    "checkpoint was written for site {} but config selects {}",
                    checkpoint.site,
                    site.name
                );
            }
            Some(checkpoint)
        }
        None => None,
    };
    let plans = plan(&config, resumed.as_ref());

    let factory = HttpRenderFactory::new(&config.render).context("build http render client")?;
    let mut traversal = Traversal::new(site.clone(), Arc::new(factory))
        .concurrency(args.concurrency.unwrap_or(config.concurrency));
    if site.login.is_some() {
        traversal = traversal.credentials(config.credentials().context("read credentials")?);
    }

    tracing::info!(
        institution = %config.institution,
        site = %site.name,
        subunits = plans.len(),
        resumed = resumed.is_some(),
        "starting run"
    );
    let result = traversal
        .run(&config.institution, plans)
        .await
        .context("traverse subunits")?;

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output dir: {}", out_dir.display()))?;

    let checkpoint = Checkpoint::new(&site.name, &result.subunits, &result.totals);
    crate::checkpoint::write(&out_dir.join(CHECKPOINT_FILE), &checkpoint)
        .await
        .context("write checkpoint")?;
    crate::checkpoint::write_diagnostics(&out_dir.join(DIAGNOSTICS_FILE), &result.diagnostics)
        .await
        .context("write diagnostics")?;

    let order: Vec<String> = config.subunits.iter().map(|entry| entry.name.clone()).collect();
    let report = crate::report::render(&result.totals, &order, &config.report);
    let report_path = out_dir.join(REPORT_FILE);
    std::fs::write(&report_path, report)
        .with_context(|| format!("write report: {}", report_path.display()))?;

    let aborted = result.outcomes.iter().filter(|o| o.aborted.is_some()).count();
    tracing::info!(
        run_id = %checkpoint.run_id,
        subunits = result.outcomes.len(),
        aborted,
        diagnostics = result.diagnostics.len(),
        out = %out_dir.display(),
        "run complete"
    );
    Ok(())
}

/// Subunits found in the checkpoint reuse its roots; the rest are resolved.
fn plan(config: &RunConfig, checkpoint: Option<&Checkpoint>) -> Vec<SubunitPlan> {
    config
        .subunits
        .iter()
        .map(|entry| {
            let work = match checkpoint.and_then(|checkpoint| checkpoint.subunit(&entry.name)) {
                Some(subunit) => SubunitWork::Resolved(subunit),
                None => SubunitWork::Topology(entry.topology.clone()),
            };
            SubunitPlan {
                name: entry.name.clone(),
                work,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::resolve::{CollectionRoot, Subunit};

    #[test]
    fn checkpoint_roots_replace_topology_per_subunit() -> anyhow::Result<()> {
        let config: RunConfig = crate::config::from_yaml(
            "institution: IPP\nsite: academia\nsubunits:\n  - name: ISEP\n    topology:\n      discover: https://isep.example/\n  - name: ESE\n    topology:\n      direct: https://ese.example/\n",
        )?;
        let resolved = Subunit {
            name: "ISEP".to_owned(),
            collection_roots: vec![CollectionRoot {
                collection: "profiles".to_owned(),
                url: url::Url::parse("https://isep.example/Departments/Math")?,
            }],
        };
        let totals = Aggregator::new("IPP", ["ISEP"], ["views"]).freeze();
        let checkpoint = Checkpoint::new("academia", std::slice::from_ref(&resolved), &totals);

        let plans = plan(&config, Some(&checkpoint));
        assert!(matches!(&plans[0].work, SubunitWork::Resolved(subunit) if *subunit == resolved));
        assert!(matches!(&plans[1].work, SubunitWork::Topology(crate::resolve::Topology::Direct(_))));

        let fresh = plan(&config, None);
        assert!(fresh.iter().all(|p| matches!(p.work, SubunitWork::Topology(_))));
        Ok(())
    }
}
