use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use url::Url;

use crate::aggregate::{Aggregator, MetricTotals, Totals};
use crate::error::ScrapeError;
use crate::extract::{ItemCursor, ItemRecord, expand, extract_fields};
use crate::formats::DiagnosticRecord;
use crate::pager::{PageRef, PageStep, Pager};
use crate::render::{Credentials, RenderClient, RenderClientFactory, Scope, Session};
use crate::resolve::{CollectionRoot, Subunit, Topology, resolve};
use crate::sites::{CollectionSpec, SiteProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubunitState {
    Pending,
    DiscoveringRoots,
    Paginating,
    Extracting,
    Folding,
    Done,
}

/// What one scraped page contributes, and whether another page follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Continue { totals: MetricTotals, next: PageRef },
    Done { totals: MetricTotals },
}

#[derive(Debug, Clone)]
pub enum SubunitWork {
    Topology(Topology),
    /// Roots from an earlier run; discovery is skipped.
    Resolved(Subunit),
}

#[derive(Debug, Clone)]
pub struct SubunitPlan {
    pub name: String,
    pub work: SubunitWork,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubunitOutcome {
    pub subunit: String,
    pub state: SubunitState,
    pub pages: u32,
    pub items: u64,
    pub failed_fields: u64,
    /// Why traversal stopped early. Totals folded before that still count.
    pub aborted: Option<String>,
}

#[derive(Debug)]
pub struct RunResult {
    pub totals: Totals,
    /// Subunits whose roots were fully resolved. Unresolved ones are left out
    /// so a resumed run resolves them again.
    pub subunits: Vec<Subunit>,
    pub outcomes: Vec<SubunitOutcome>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

/// Totals tallied on a page before extraction failed.
struct PartialPage {
    totals: MetricTotals,
    err: ScrapeError,
}

enum Event {
    Fold {
        subunit: String,
        increments: MetricTotals,
    },
    Diagnostic(DiagnosticRecord),
}

/// Runs every subunit of one institution against one site.
pub struct Traversal {
    site: Arc<SiteProfile>,
    factory: Arc<dyn RenderClientFactory>,
    credentials: Option<Credentials>,
    concurrency: usize,
}

impl Traversal {
    pub fn new(site: SiteProfile, factory: Arc<dyn RenderClientFactory>) -> Self {
        Self {
            site: Arc::new(site),
            factory,
            credentials: None,
            concurrency: 1,
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self, institution: &str, plans: Vec<SubunitPlan>) -> anyhow::Result<RunResult> {
        let order: Vec<String> = plans.iter().map(|plan| plan.name.clone()).collect();
        let mut aggregator = Aggregator::new(institution, order.iter().cloned(), self.site.metrics());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (events_tx, mut events_rx) = mpsc::channel::<Event>(256);
        let mut tasks = JoinSet::new();

        for plan in plans {
            let walker = SubunitWalker {
                site: Arc::clone(&self.site),
                factory: Arc::clone(&self.factory),
                credentials: self.credentials.clone(),
                events: events_tx.clone(),
                outcome: SubunitOutcome::pending(&plan.name),
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                walker.walk(plan.work).await
            });
        }
        drop(events_tx);

        let mut diagnostics = Vec::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                Event::Fold { subunit, increments } => {
                    if let Err(err) = aggregator.fold(&subunit, increments) {
                        tracing::warn!(%err, "dropping increments");
                    }
                }
                Event::Diagnostic(record) => diagnostics.push(record),
            }
        }

        let mut finished = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (subunit, outcome) = joined.context("subunit task failed")?;
            finished.insert(outcome.subunit.clone(), (subunit, outcome));
        }

        let mut subunits = Vec::with_capacity(order.len());
        let mut outcomes = Vec::with_capacity(order.len());
        for name in &order {
            if let Some((subunit, outcome)) = finished.remove(name) {
                subunits.extend(subunit);
                outcomes.push(outcome);
            }
        }

        Ok(RunResult {
            totals: aggregator.freeze(),
            subunits,
            outcomes,
            diagnostics,
        })
    }
}

impl SubunitOutcome {
    fn pending(subunit: &str) -> Self {
        Self {
            subunit: subunit.to_owned(),
            state: SubunitState::Pending,
            pages: 0,
            items: 0,
            failed_fields: 0,
            aborted: None,
        }
    }
}

/// One subunit's traversal; owns its session for the whole walk.
struct SubunitWalker {
    site: Arc<SiteProfile>,
    factory: Arc<dyn RenderClientFactory>,
    credentials: Option<Credentials>,
    events: mpsc::Sender<Event>,
    outcome: SubunitOutcome,
}

impl SubunitWalker {
    async fn walk(mut self, work: SubunitWork) -> (Option<Subunit>, SubunitOutcome) {
        let name = self.outcome.subunit.clone();
        let fallback = match &work {
            SubunitWork::Resolved(subunit) => Some(subunit.clone()),
            SubunitWork::Topology(_) => None,
        };

        let subunit = match Session::acquire(self.factory.as_ref(), name.as_str()).await {
            Ok(mut session) => {
                let subunit = self.walk_with(&mut session, work).await;
                session.release().await;
                subunit.or(fallback)
            }
            Err(err) => {
                self.abort(None, None, ScrapeError::Session(err.to_string())).await;
                fallback
            }
        };

        self.transition(SubunitState::Done);
        tracing::info!(
            subunit = %name,
            pages = self.outcome.pages,
            items = self.outcome.items,
            failed_fields = self.outcome.failed_fields,
            aborted = self.outcome.aborted.is_some(),
            "subunit done"
        );
        (subunit, self.outcome)
    }

    /// Returns the subunit once its roots are fully resolved, or `None` when
    /// resolution failed or was only partial.
    async fn walk_with(&mut self, session: &mut Session, work: SubunitWork) -> Option<Subunit> {
        let site = Arc::clone(&self.site);

        if let Some(flow) = &site.login {
            let logged_in = match &self.credentials {
                Some(credentials) => session
                    .login(flow, credentials)
                    .await
                    .map_err(|err| ScrapeError::Session(format!("login: {err}"))),
                None => Err(ScrapeError::Session("login required but no credentials".to_owned())),
            };
            if let Err(err) = logged_in {
                self.abort(None, Some(&flow.url), err).await;
                return None;
            }
        }

        self.transition(SubunitState::DiscoveringRoots);
        let (subunit, complete) = match work {
            SubunitWork::Resolved(subunit) => (subunit, true),
            SubunitWork::Topology(topology) => {
                match resolve(session.client(), &site, &self.outcome.subunit, &topology).await {
                    Ok(resolved) => {
                        for (url, err) in resolved.skipped {
                            self.diagnose(None, url.as_ref(), &err).await;
                        }
                        (resolved.subunit, resolved.complete)
                    }
                    Err(err) => {
                        self.abort(None, None, err).await;
                        return None;
                    }
                }
            }
        };

        for root in &subunit.collection_roots {
            let Some(collection) = site.collection(&root.collection) else {
                let err = ScrapeError::MalformedMarkup(format!("unknown collection {}", root.collection));
                self.diagnose(None, Some(&root.url), &err).await;
                continue;
            };
            if let Err((url, err)) = self.walk_collection(session.client(), collection, root).await {
                self.abort(Some(&collection.name), Some(&url), err).await;
                break;
            }
        }
        complete.then_some(subunit)
    }

    async fn walk_collection(
        &mut self,
        client: &mut dyn RenderClient,
        collection: &CollectionSpec,
        root: &CollectionRoot,
    ) -> Result<(), (Url, ScrapeError)> {
        let mut pager = Pager::new(&root.url, &collection.pagination);
        loop {
            self.transition(SubunitState::Paginating);
            let page = pager.current().clone();
            client
                .open(&page.url)
                .await
                .map_err(|err| (page.url.clone(), ScrapeError::from(err)))?;
            self.outcome.pages += 1;

            let outcome = self.scrape_page(client, collection, &mut pager, &page).await;

            self.transition(SubunitState::Folding);
            match outcome {
                Ok(PageOutcome::Continue { totals, next }) => {
                    self.fold(totals).await;
                    tracing::debug!(subunit = %self.outcome.subunit, next = %next.url, index = next.index, "next page");
                }
                Ok(PageOutcome::Done { totals }) => {
                    self.fold(totals).await;
                    return Ok(());
                }
                Err(PartialPage { totals, err }) => {
                    self.fold(totals).await;
                    return Err((page.url, err));
                }
            }
        }
    }

    /// Extracts the loaded page and checks its pagination affordance. A
    /// failure part way through still hands back what the page had tallied.
    async fn scrape_page(
        &mut self,
        client: &mut dyn RenderClient,
        collection: &CollectionSpec,
        pager: &mut Pager<'_>,
        page: &PageRef,
    ) -> Result<PageOutcome, PartialPage> {
        self.transition(SubunitState::Extracting);
        let mut totals = MetricTotals::new();
        match self.extract_page(&mut totals, client, collection, pager, page).await {
            Ok(PageStep::Next(next)) => Ok(PageOutcome::Continue { totals, next }),
            Ok(PageStep::Exhausted) => Ok(PageOutcome::Done { totals }),
            Err(err) => Err(PartialPage { totals, err }),
        }
    }

    /// Detail pages are visited only after the affordance has been read.
    async fn extract_page(
        &mut self,
        totals: &mut MetricTotals,
        client: &mut dyn RenderClient,
        collection: &CollectionSpec,
        pager: &mut Pager<'_>,
        page: &PageRef,
    ) -> Result<PageStep, ScrapeError> {
        let mut cursor = ItemCursor::open(client, &collection.items, collection.scroll.as_ref()).await?;
        tracing::debug!(subunit = %self.outcome.subunit, url = %page.url, items = cursor.len(), "page loaded");

        let step = match &collection.detail {
            None => {
                while let Some(record) = cursor.next(client, &collection.schema).await {
                    self.tally(totals, record, collection, &page.url).await?;
                }
                self.advance(client, collection, pager, page).await?
            }
            Some(detail) => {
                let mut targets = Vec::with_capacity(cursor.len());
                while let Some(item) = cursor.next_element() {
                    let linked = match &detail.link {
                        Some(link) => link
                            .locate(client, Scope::Within(item.handle()))
                            .await
                            .map_err(ScrapeError::from)
                            .and_then(|found| {
                                found.ok_or_else(|| {
                                    ScrapeError::MalformedMarkup("item has no detail link".to_owned())
                                })
                            })
                            .and_then(|anchor| detail.target(&anchor, &page.url)),
                        None => detail.target(&item, &page.url),
                    };
                    match linked {
                        Ok(url) => targets.push(url),
                        Err(err) if err.is_session() => return Err(err),
                        Err(err) => {
                            let record = ItemRecord::failed(&collection.schema, &err);
                            self.tally(totals, record, collection, &page.url).await?;
                        }
                    }
                }

                let step = self.advance(client, collection, pager, page).await?;
                for target in targets {
                    let record = self.visit_detail(client, collection, &target).await?;
                    self.tally(totals, record, collection, &target).await?;
                }
                step
            }
        };
        Ok(step)
    }

    /// A next-page control that cannot be followed ends the collection with a
    /// diagnostic. Only a session failure is passed up.
    async fn advance(
        &mut self,
        client: &mut dyn RenderClient,
        collection: &CollectionSpec,
        pager: &mut Pager<'_>,
        page: &PageRef,
    ) -> Result<PageStep, ScrapeError> {
        match pager.advance(client).await {
            Ok(step) => Ok(step),
            Err(err) if err.is_session() => Err(err),
            Err(err) => {
                self.diagnose(Some(&collection.name), Some(&page.url), &err).await;
                Ok(PageStep::Exhausted)
            }
        }
    }

    async fn visit_detail(
        &mut self,
        client: &mut dyn RenderClient,
        collection: &CollectionSpec,
        target: &Url,
    ) -> Result<ItemRecord, ScrapeError> {
        if let Err(err) = client.open(target).await {
            let err = ScrapeError::from(err);
            if err.is_session() {
                return Err(err);
            }
            return Ok(ItemRecord::failed(&collection.schema, &err));
        }
        if let Some(spec) = collection.detail.as_ref().and_then(|detail| detail.expand.as_ref()) {
            match expand(client, spec).await {
                Ok(clicks) => tracing::debug!(%target, clicks, "expanded detail page"),
                Err(err) if err.is_session() => return Err(err),
                Err(err) => self.diagnose(Some(&collection.name), Some(target), &err).await,
            }
        }
        Ok(extract_fields(client, Scope::Document, None, &collection.schema).await)
    }

    async fn tally(
        &mut self,
        totals: &mut MetricTotals,
        record: ItemRecord,
        collection: &CollectionSpec,
        url: &Url,
    ) -> Result<(), ScrapeError> {
        self.outcome.items += 1;
        for (metric, value) in record.values {
            let cell = totals.entry(metric).or_insert(0);
            *cell = cell.saturating_add(value);
        }
        for failure in record.failures {
            self.outcome.failed_fields += 1;
            let diagnostic = DiagnosticRecord::field_failure(&self.outcome.subunit, &failure)
                .collection(&collection.name)
                .url(url);
            self.emit(diagnostic).await;
            if failure.kind == crate::error::FailureKind::Session {
                return Err(ScrapeError::Session(failure.message));
            }
        }
        Ok(())
    }

    async fn fold(&self, increments: MetricTotals) {
        let event = Event::Fold {
            subunit: self.outcome.subunit.clone(),
            increments,
        };
        if self.events.send(event).await.is_err() {
            tracing::warn!(subunit = %self.outcome.subunit, "aggregator is gone; increments dropped");
        }
    }

    async fn diagnose(&self, collection: Option<&str>, url: Option<&Url>, err: &ScrapeError) {
        let mut record = DiagnosticRecord::new(&self.outcome.subunit, err);
        if let Some(collection) = collection {
            record = record.collection(collection);
        }
        if let Some(url) = url {
            record = record.url(url);
        }
        self.emit(record).await;
    }

    async fn abort(&mut self, collection: Option<&str>, url: Option<&Url>, err: ScrapeError) {
        self.outcome.aborted = Some(err.to_string());
        self.diagnose(collection, url, &err).await;
    }

    async fn emit(&self, record: DiagnosticRecord) {
        tracing::warn!(
            subunit = %record.subunit,
            collection = record.collection.as_deref().unwrap_or("-"),
            url = record.url.as_deref().unwrap_or("-"),
            field = record.field.as_deref().unwrap_or("-"),
            kind = ?record.kind,
            message = %record.message,
            "scrape failure"
        );
        let _ = self.events.send(Event::Diagnostic(record)).await;
    }

    fn transition(&mut self, next: SubunitState) {
        tracing::trace!(subunit = %self.outcome.subunit, from = ?self.outcome.state, to = ?next, "state");
        self.outcome.state = next;
    }
}
