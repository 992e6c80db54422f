use std::path::PathBuf;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ResolveArgs;
use crate::error::{RenderError, ScrapeError};
use crate::render::{RenderClient, Scope, Session};
use crate::sites::{DiscoveryRule, SiteProfile};

/// Where a subunit's collections live on one site.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// An institutional index page listing department links.
    Discover(Url),
    /// Department pages that are already known.
    Roots(Vec<Url>),
    /// One page used as-is.
    Direct(Url),
    /// The subunit has no presence on this site.
    #[default]
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionRoot {
    pub collection: String,
    pub url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subunit {
    pub name: String,
    pub collection_roots: Vec<CollectionRoot>,
}

impl Subunit {
    pub fn without_roots(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection_roots: Vec::new(),
        }
    }
}

/// A resolved subunit plus the parts of its topology that had to be skipped.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub subunit: Subunit,
    pub skipped: Vec<(Option<Url>, ScrapeError)>,
    /// False when discovery could not read the index, so the roots may be
    /// missing departments. Skipped malformed markers do not count.
    pub complete: bool,
}

/// Normalizes a topology into collection roots. Only a session failure is an
/// error; everything else shrinks the result and is listed in `skipped`.
pub async fn resolve(
    client: &mut dyn RenderClient,
    site: &SiteProfile,
    name: &str,
    topology: &Topology,
) -> Result<Resolved, ScrapeError> {
    let mut resolved = Resolved {
        subunit: Subunit::without_roots(name),
        skipped: Vec::new(),
        complete: true,
    };

    match topology {
        Topology::Absent => {}
        Topology::Direct(url) => expand_base(site, url, &mut resolved),
        Topology::Roots(urls) => {
            for url in urls {
                expand_base(site, url, &mut resolved);
            }
        }
        Topology::Discover(index) => match &site.discovery {
            Some(rule) => discover(client, rule, index, &mut resolved).await?,
            None => {
                resolved.complete = false;
                resolved.skipped.push((
                    Some(index.clone()),
                    ScrapeError::MalformedMarkup(format!("site {} has no discovery rule", site.name)),
                ));
            }
        },
    }

    tracing::debug!(
        subunit = name,
        roots = resolved.subunit.collection_roots.len(),
        skipped = resolved.skipped.len(),
        complete = resolved.complete,
        "resolved topology"
    );
    Ok(resolved)
}

fn expand_base(site: &SiteProfile, base: &Url, resolved: &mut Resolved) {
    for collection in &site.collections {
        match collection.root_for(base) {
            Ok(url) => resolved.subunit.collection_roots.push(CollectionRoot {
                collection: collection.name.clone(),
                url,
            }),
            Err(err) => resolved.skipped.push((
                Some(base.clone()),
                ScrapeError::MalformedMarkup(format!("root for {}: {err}", collection.name)),
            )),
        }
    }
}

async fn discover(
    client: &mut dyn RenderClient,
    rule: &DiscoveryRule,
    index: &Url,
    resolved: &mut Resolved,
) -> Result<(), ScrapeError> {
    if let Err(err) = client.open(index).await {
        let err = ScrapeError::from(err);
        if err.is_session() {
            return Err(err);
        }
        resolved.complete = false;
        resolved.skipped.push((Some(index.clone()), err));
        return Ok(());
    }

    let mut markers = match rule.marker.find_all(client, Scope::Document).await {
        Ok(markers) => markers,
        Err(RenderError::Timeout(_)) => Vec::new(),
        Err(err) => return skip_or_fail(err, index, resolved),
    };
    if rule.skip_last_marker {
        markers.pop();
    }

    for marker in markers {
        let links = match rule.link.find_all(client, Scope::Within(marker.handle())).await {
            Ok(links) => links,
            Err(err) => {
                skip_or_fail(err, index, resolved)?;
                continue;
            }
        };

        if links.is_empty() || links.len() > rule.link_collections.len() {
            resolved.skipped.push((
                Some(index.clone()),
                ScrapeError::MalformedMarkup(format!(
                    "department marker has {} links: {:?}",
                    links.len(),
                    marker.text()
                )),
            ));
            continue;
        }

        for (link, collection) in links.iter().zip(&rule.link_collections) {
            let target = link
                .attribute(&rule.attribute)
                .ok_or_else(|| format!("link has no {} attribute", rule.attribute))
                .and_then(|href| index.join(href).map_err(|err| format!("{href:?}: {err}")));
            match target {
                Ok(url) => resolved.subunit.collection_roots.push(CollectionRoot {
                    collection: collection.clone(),
                    url,
                }),
                Err(msg) => resolved
                    .skipped
                    .push((Some(index.clone()), ScrapeError::MalformedMarkup(msg))),
            }
        }
    }
    Ok(())
}

fn skip_or_fail(err: RenderError, index: &Url, resolved: &mut Resolved) -> Result<(), ScrapeError> {
    let err = ScrapeError::from(err);
    if err.is_session() {
        return Err(err);
    }
    resolved.complete = false;
    resolved.skipped.push((Some(index.clone()), err));
    Ok(())
}

/// `resolve` command: discovery only, written out as a checkpoint with zeroed
/// totals so a later `run --checkpoint` can skip it. Subunits that did not
/// resolve completely are left out of the roots.
pub async fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    if out_path.exists() {
        anyhow::bail!("checkpoint output already exists: {}", out_path.display());
    }

    let config = crate::config::RunConfig::load(&args.config).context("load run config")?;
    let site = config.site_profile().context("select site profile")?;
    let factory = crate::http_render::HttpRenderFactory::new(&config.render)
        .context("build http render client")?;

    let mut session = Session::acquire(&factory, "resolve")
        .await
        .context("open render session")?;
    let outcome = resolve_subunits(&mut session, &config, &site).await;
    session.release().await;
    let subunits = outcome?;

    let totals = crate::aggregate::Aggregator::new(
        config.institution.clone(),
        config.subunits.iter().map(|entry| entry.name.clone()),
        site.metrics(),
    )
    .freeze();
    let checkpoint = crate::formats::Checkpoint::new(&site.name, &subunits, &totals);
    crate::checkpoint::write(&out_path, &checkpoint)
        .await
        .context("write checkpoint")?;

    tracing::info!(
        subunits = subunits.len(),
        roots = subunits.iter().map(|s| s.collection_roots.len()).sum::<usize>(),
        out = %out_path.display(),
        "resolved collection roots"
    );
    Ok(())
}

async fn resolve_subunits(
    session: &mut Session,
    config: &crate::config::RunConfig,
    site: &SiteProfile,
) -> anyhow::Result<Vec<Subunit>> {
    if let Some(flow) = &site.login {
        let credentials = config.credentials().context("read credentials")?;
        session
            .login(flow, &credentials)
            .await
            .context("log in")?;
    }

    let mut subunits = Vec::with_capacity(config.subunits.len());
    for entry in &config.subunits {
        let resolved = resolve(session.client(), site, &entry.name, &entry.topology)
            .await
            .with_context(|| format!("resolve {}", entry.name))?;
        for (url, err) in &resolved.skipped {
            tracing::warn!(subunit = %entry.name, url = ?url.as_ref().map(Url::as_str), %err, "skipped during discovery");
        }
        if resolved.complete {
            subunits.push(resolved.subunit);
        } else {
            tracing::warn!(subunit = %entry.name, "left unresolved");
        }
    }
    Ok(subunits)
}
