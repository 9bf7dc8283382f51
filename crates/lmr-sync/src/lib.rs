//! Reconciliation pass: manifest rows are matched to upcoming catalog launches
//! and each match is written back as a partial update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use lmr_adapters::{
    normalize_date_cell, AdapterError, FileManifestSource, HttpManifestSource, ManifestSource, TableDecoder,
    WikiStrideDecoder, DEFAULT_MANIFEST_SELECTOR,
};
use lmr_core::{CatalogLaunch, ManifestRow, ReconError, ReconciledUpdate};
use lmr_storage::{CatalogStore, HttpCatalogStore, HttpClientConfig, HttpFetcher, LaunchQuery, MemoryCatalogStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod launchpad;
pub mod matcher;
pub mod precision;
pub mod renumber;
pub mod report;

pub use launchpad::{lookup_site, LaunchpadResolver, LaunchpadRule, ResolvedSite};
pub use matcher::{FuzzyMatcher, MatchScore};
pub use precision::{classify, render_instant};
pub use renumber::{assigned_flight_number, base_flight_number, FlightConflict, FlightLedger};
pub use report::{write_pass_report, AppliedUpdate, PassOutcome, PassReport};

pub const CRATE_NAME: &str = "lmr-sync";

/// Manifest rows past this index are outside the near-term horizon and ignored.
pub const DEFAULT_MAX_ROWS: usize = 30;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub manifest_url: String,
    pub manifest_selector: String,
    pub series_pattern: String,
    pub healthcheck_url: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_rows: usize,
    pub dry_run: bool,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub workspace_root: PathBuf,
    pub reports_dir: Option<PathBuf>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("LMR_API_URL").unwrap_or_else(|_| "http://localhost:6673/v4".to_string()),
            api_key: env_nonempty("LMR_API_KEY"),
            manifest_url: std::env::var("LMR_MANIFEST_URL")
                .unwrap_or_else(|_| "https://old.reddit.com/r/spacex/wiki/launches/manifest".to_string()),
            manifest_selector: std::env::var("LMR_MANIFEST_SELECTOR")
                .unwrap_or_else(|_| DEFAULT_MANIFEST_SELECTOR.to_string()),
            series_pattern: std::env::var("LMR_SERIES_PATTERN")
                .unwrap_or_else(|_| matcher::DEFAULT_SERIES_PATTERN.to_string()),
            healthcheck_url: env_nonempty("LMR_HEALTHCHECK_URL"),
            user_agent: std::env::var("LMR_USER_AGENT").unwrap_or_else(|_| "lmr-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("LMR_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            max_rows: std::env::var("LMR_MAX_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_ROWS),
            dry_run: env_flag("LMR_DRY_RUN"),
            scheduler_enabled: env_flag("LMR_SCHEDULER_ENABLED"),
            sync_cron: std::env::var("SYNC_CRON").unwrap_or_else(|_| "0 */10 * * * *".to_string()),
            workspace_root: std::env::var("LMR_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            reports_dir: env_nonempty("LMR_REPORTS_DIR").map(PathBuf::from),
        }
    }

    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            max_rows: self.max_rows,
            dry_run: self.dry_run,
            ..ReconcileOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub max_rows: usize,
    pub dry_run: bool,
    pub enforce_unique_flight_numbers: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            dry_run: false,
            enforce_unique_flight_numbers: true,
        }
    }
}

/// Liveness signal sent after a fully successful pass.
#[async_trait]
pub trait HealthSink: Send + Sync {
    async fn notify(&self) -> Result<()>;
}

pub struct HttpHealthSink {
    http: HttpFetcher,
    url: String,
}

impl HttpHealthSink {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

#[async_trait]
impl HealthSink for HttpHealthSink {
    async fn notify(&self) -> Result<()> {
        self.http
            .ping(&self.url)
            .await
            .with_context(|| format!("pinging {}", self.url))
    }
}

pub struct Reconciler {
    options: ReconcileOptions,
    catalog: Arc<dyn CatalogStore>,
    source: Box<dyn ManifestSource>,
    decoder: Box<dyn TableDecoder>,
    matcher: FuzzyMatcher,
    launchpads: LaunchpadResolver,
    health: Option<Box<dyn HealthSink>>,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        source: Box<dyn ManifestSource>,
        decoder: Box<dyn TableDecoder>,
    ) -> Self {
        Self {
            options: ReconcileOptions::default(),
            catalog,
            source,
            decoder,
            matcher: FuzzyMatcher::default(),
            launchpads: LaunchpadResolver::default(),
            health: None,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_matcher(mut self, matcher: FuzzyMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_launchpads(mut self, launchpads: LaunchpadResolver) -> Self {
        self.launchpads = launchpads;
        self
    }

    pub fn with_health(mut self, health: Box<dyn HealthSink>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run one pass, waiting for any pass already in flight to finish first.
    pub async fn run_pass(&self) -> PassOutcome {
        let _guard = self.pass_lock.lock().await;
        self.execute_pass().await
    }

    /// Run one pass and log its outcome. Pass failures never surface as an
    /// error here; callers read the outcome or the logs.
    pub async fn run_logged(&self) -> PassOutcome {
        let outcome = self.run_pass().await;
        log_outcome(&outcome);
        outcome
    }

    /// Like [`Reconciler::run_logged`], but skips the run when another pass holds the lock.
    pub async fn try_run_pass(&self) -> Option<PassOutcome> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            warn!("previous reconcile pass still running; skipping trigger");
            return None;
        };
        let outcome = self.execute_pass().await;
        log_outcome(&outcome);
        Some(outcome)
    }

    async fn execute_pass(&self) -> PassOutcome {
        let run_id = Uuid::new_v4();
        let mut report = PassReport::new(
            run_id,
            self.decoder.schema_version(),
            self.source.describe(),
            self.options.dry_run,
        );

        let result = self
            .reconcile(&mut report)
            .instrument(info_span!("reconcile_pass", %run_id))
            .await;
        report.finished_at = Some(Utc::now());

        match result {
            Ok(()) => {
                self.notify_health().await;
                PassOutcome::Completed(report)
            }
            Err(error) => {
                report.error = Some(error.to_string());
                PassOutcome::Aborted { report, error }
            }
        }
    }

    async fn reconcile(&self, report: &mut PassReport) -> Result<(), ReconError> {
        let launches = self
            .catalog
            .list_launches(&LaunchQuery::all())
            .await
            .map_err(|e| ReconError::UpstreamFetch(format!("catalog listing: {e}")))?;
        let (upcoming, completed): (Vec<_>, Vec<_>) = launches.into_iter().partition(|l| l.upcoming);

        let manifest = self
            .source
            .fetch_manifest(report.run_id)
            .await
            .map_err(adapter_error)?;
        report.manifest_sha256 = Some(manifest.sha256.clone());

        let mut rows = self.decoder.decode(&manifest).map_err(adapter_error)?;
        rows.truncate(self.options.max_rows);
        report.manifest_rows = rows.len();

        let base = base_flight_number(&completed, rows.first().map(|r| r.payload.as_str()));
        report.base_flight_number = Some(base);
        info!(
            rows = rows.len(),
            upcoming = upcoming.len(),
            completed = completed.len(),
            base_flight_number = base,
            "manifest decoded"
        );

        let mut ledger = FlightLedger::new(self.options.enforce_unique_flight_numbers);
        let result = self
            .reconcile_rows(&upcoming, &rows, base, &mut ledger, report)
            .await;
        report.flight_conflicts = ledger.conflicts().to_vec();
        result
    }

    async fn reconcile_rows(
        &self,
        upcoming: &[CatalogLaunch],
        rows: &[ManifestRow],
        base: u32,
        ledger: &mut FlightLedger,
        report: &mut PassReport,
    ) -> Result<(), ReconError> {
        let mut sites: HashMap<String, ResolvedSite> = HashMap::new();

        for launch in upcoming.iter().filter(|l| l.is_reconcilable()) {
            for row in rows {
                let score = self.matcher.score(&launch.name, &row.payload);
                if !score.accepted() {
                    continue;
                }
                debug!(launch = %launch.name, row = row.index, payload = %row.payload, ?score, "manifest row matched");

                let update = self.build_update(launch, row, base, ledger, &mut sites).await?;
                let dispatched = self.dispatch(launch, &update).await?;
                report.updates.push(AppliedUpdate {
                    launch_id: launch.id.clone(),
                    launch_name: launch.name.clone(),
                    row_index: row.index,
                    payload: row.payload.clone(),
                    raw_date: row.raw_date.clone(),
                    dispatched,
                    update,
                });
            }
        }
        Ok(())
    }

    async fn build_update(
        &self,
        launch: &CatalogLaunch,
        row: &ManifestRow,
        base: u32,
        ledger: &mut FlightLedger,
        sites: &mut HashMap<String, ResolvedSite>,
    ) -> Result<ReconciledUpdate, ReconError> {
        let cleaned = normalize_date_cell(&row.raw_date);
        let date = classify(&row.raw_date, &cleaned)?;

        let flight_number = assigned_flight_number(base, row.index);
        ledger.record(flight_number, launch)?;

        let canonical = self.launchpads.canonical_name(&row.site)?;
        let site = match sites.get(canonical) {
            Some(site) => site.clone(),
            None => {
                let site = lookup_site(self.catalog.as_ref(), canonical).await?;
                sites.insert(canonical.to_string(), site.clone());
                site
            }
        };

        let rendered = render_instant(date.instant, site.tz);
        Ok(ReconciledUpdate {
            flight_number,
            date_unix: rendered.unix,
            date_utc: rendered.utc,
            date_local: rendered.local,
            date_precision: date.kind,
            launchpad: site.record.id,
            tbd: date.tbd,
            net: date.net,
        })
    }

    async fn dispatch(&self, launch: &CatalogLaunch, update: &ReconciledUpdate) -> Result<bool, ReconError> {
        info!(
            launch = %launch.name,
            launch_id = %launch.id,
            flight_number = update.flight_number,
            date_unix = update.date_unix,
            date_utc = %update.date_utc,
            date_local = %update.date_local,
            date_precision = %update.date_precision,
            launchpad = %update.launchpad,
            tbd = update.tbd,
            net = update.net,
            dry_run = self.options.dry_run,
            "reconciled launch"
        );
        if self.options.dry_run {
            return Ok(false);
        }
        self.catalog
            .patch_launch(&launch.id, update)
            .await
            .map_err(|e| ReconError::Dispatch {
                launch_id: launch.id.clone(),
                message: e.to_string(),
            })?;
        Ok(true)
    }

    async fn notify_health(&self) {
        if self.options.dry_run {
            return;
        }
        let Some(health) = &self.health else {
            return;
        };
        if let Err(err) = health.notify().await {
            warn!("health ping failed: {err:#}");
        }
    }
}

fn adapter_error(err: AdapterError) -> ReconError {
    match err {
        AdapterError::Layout { .. } | AdapterError::Selector { .. } => ReconError::ManifestLayout(err.to_string()),
        AdapterError::Fetch(_) | AdapterError::Io { .. } => ReconError::UpstreamFetch(err.to_string()),
    }
}

fn log_outcome(outcome: &PassOutcome) {
    let report = outcome.report();
    match outcome.error() {
        None => info!(
            run_id = %report.run_id,
            rows = report.manifest_rows,
            updates = report.updates.len(),
            "reconcile pass complete"
        ),
        Some(err) => error!(
            run_id = %report.run_id,
            code = err.code(),
            applied = report.updates.len(),
            "reconcile pass aborted: {err}"
        ),
    }
}

/// Best-effort report persistence; a failed write is logged, never raised.
pub async fn persist_report(dir: Option<&Path>, report: &PassReport) {
    let Some(dir) = dir else {
        return;
    };
    match write_pass_report(dir, report).await {
        Ok(path) => info!(path = %path.display(), "pass report written"),
        Err(err) => warn!("writing pass report failed: {err:#}"),
    }
}

pub fn reconciler_from_config(config: &SyncConfig) -> Result<Reconciler> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;
    let catalog = Arc::new(HttpCatalogStore::new(&http, config.api_url.clone(), config.api_key.clone()));
    let source = Box::new(HttpManifestSource::new(http.clone(), config.manifest_url.clone()));
    let decoder = Box::new(WikiStrideDecoder::new(config.manifest_selector.clone()));
    let launchpads = LaunchpadResolver::from_workspace_root(&config.workspace_root)?;
    let matcher = FuzzyMatcher::new(&config.series_pattern)
        .with_context(|| format!("compiling series pattern {:?}", config.series_pattern))?;

    let mut reconciler = Reconciler::new(catalog, source, decoder)
        .with_matcher(matcher)
        .with_launchpads(launchpads)
        .with_options(config.options());
    if let Some(url) = &config.healthcheck_url {
        reconciler = reconciler.with_health(Box::new(HttpHealthSink::new(http, url.clone())));
    }
    Ok(reconciler)
}

pub async fn run_once(config: &SyncConfig) -> Result<PassOutcome> {
    let reconciler = reconciler_from_config(config)?;
    let outcome = reconciler.run_logged().await;
    persist_report(config.reports_dir.as_deref(), outcome.report()).await;
    Ok(outcome)
}

/// Replay a pass offline from `manifest.html`, `launches.json` and
/// `launchpads.json` in `dir`. Patches land in the returned in-memory store.
pub async fn replay_fixture_dir(
    dir: &Path,
    options: ReconcileOptions,
) -> Result<(PassOutcome, Arc<MemoryCatalogStore>)> {
    let store = Arc::new(MemoryCatalogStore::from_json_files(
        dir.join("launches.json"),
        dir.join("launchpads.json"),
    )?);
    let source = Box::new(FileManifestSource::new(dir.join("manifest.html")));
    let launchpads = LaunchpadResolver::from_workspace_root(dir)?;

    let reconciler = Reconciler::new(store.clone(), source, Box::new(WikiStrideDecoder::default()))
        .with_launchpads(launchpads)
        .with_options(options);
    let outcome = reconciler.run_logged().await;
    Ok((outcome, store))
}

pub async fn build_scheduler(
    reconciler: Arc<Reconciler>,
    cron: &str,
    reports_dir: Option<PathBuf>,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let reconciler = Arc::clone(&reconciler);
        let reports_dir = reports_dir.clone();
        Box::pin(async move {
            if let Some(outcome) = reconciler.try_run_pass().await {
                persist_report(reports_dir.as_deref(), outcome.report()).await;
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lmr_adapters::RawManifest;
    use lmr_core::{DatePrecision, LaunchpadRecord};
    use lmr_storage::{FetchError, StoreError};

    struct StaticSource(String);

    #[async_trait]
    impl ManifestSource for StaticSource {
        fn describe(&self) -> String {
            "static".into()
        }

        async fn fetch_manifest(&self, _run_id: Uuid) -> Result<RawManifest, AdapterError> {
            Ok(RawManifest::new("static", self.0.clone(), Utc::now()))
        }
    }

    struct MissingFileSource;

    #[async_trait]
    impl ManifestSource for MissingFileSource {
        fn describe(&self) -> String {
            "missing.html".into()
        }

        async fn fetch_manifest(&self, _run_id: Uuid) -> Result<RawManifest, AdapterError> {
            Err(AdapterError::Io {
                path: PathBuf::from("missing.html"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
        }
    }

    /// Delegates to a memory store, but listing can be made to fail and the
    /// n-th patch (1-based) is rejected with a server error.
    struct FlakyStore {
        inner: MemoryCatalogStore,
        fail_listing: bool,
        reject_patch: Option<usize>,
        patch_calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(inner: MemoryCatalogStore) -> Self {
            Self {
                inner,
                fail_listing: false,
                reject_patch: None,
                patch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn list_launches(&self, query: &LaunchQuery) -> Result<Vec<CatalogLaunch>, StoreError> {
            if self.fail_listing {
                return Err(StoreError::Fetch(FetchError::HttpStatus {
                    status: 503,
                    url: "http://catalog/launches/query".into(),
                }));
            }
            self.inner.list_launches(query).await
        }

        async fn resolve_site(&self, canonical_name: &str) -> Result<Option<LaunchpadRecord>, StoreError> {
            self.inner.resolve_site(canonical_name).await
        }

        async fn patch_launch(&self, id: &str, update: &ReconciledUpdate) -> Result<(), StoreError> {
            let call = self.patch_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject_patch == Some(call) {
                return Err(StoreError::Fetch(FetchError::HttpStatus {
                    status: 500,
                    url: format!("http://catalog/launches/{id}"),
                }));
            }
            self.inner.patch_launch(id, update).await
        }
    }

    #[derive(Clone, Default)]
    struct CountingHealth(Arc<AtomicUsize>);

    #[async_trait]
    impl HealthSink for CountingHealth {
        async fn notify(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manifest_html(rows: &[(&str, &str, &str)]) -> String {
        let mut html = String::from("<html><body><table>\n<tbody>\n");
        for (date, payload, site) in rows {
            html.push_str("<tr>\n");
            for cell in [*date, "F9 B5", *site, "LEO", "?", *payload, "SpaceX"] {
                html.push_str(&format!("<td>{cell}</td>\n"));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table></body></html>");
        html
    }

    fn launch(id: &str, name: &str, flight_number: u32, upcoming: bool) -> CatalogLaunch {
        CatalogLaunch {
            id: id.into(),
            name: name.into(),
            flight_number,
            upcoming,
            auto_update: true,
        }
    }

    fn pads() -> Vec<LaunchpadRecord> {
        vec![
            LaunchpadRecord {
                id: "pad-slc40".into(),
                name: "CCSFS SLC 40".into(),
                timezone: "America/New_York".into(),
            },
            LaunchpadRecord {
                id: "pad-slc4e".into(),
                name: "VAFB SLC 4E".into(),
                timezone: "America/Los_Angeles".into(),
            },
        ]
    }

    fn reconciler(store: &Arc<MemoryCatalogStore>, rows: &[(&str, &str, &str)]) -> Reconciler {
        Reconciler::new(
            store.clone(),
            Box::new(StaticSource(manifest_html(rows))),
            Box::new(WikiStrideDecoder::new("table > tbody")),
        )
    }

    #[tokio::test]
    async fn new_launch_gets_next_flight_number() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("sl49", "Starlink 4-9", 999, true),
            ],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Mar 15 [18:00]", "Starlink 4-9", "SLC-40")])
            .run_pass()
            .await;

        assert!(outcome.is_completed(), "{:?}", outcome.error());
        let patches = store.patches().await;
        assert_eq!(patches.len(), 1);
        let (id, update) = &patches[0];
        assert_eq!(id, "sl49");
        assert_eq!(update.flight_number, 201);
        assert_eq!(update.date_precision, DatePrecision::Hour);
        assert_eq!(update.launchpad, "pad-slc40");
        assert!(!update.tbd);
        assert!(!update.net);
        assert_eq!(update.date_utc, "2022-03-15T18:00:00Z");
        assert_eq!(update.date_local, "2022-03-15T14:00:00-04:00");
        assert_eq!(update.date_unix, 1_647_367_200);
        assert_eq!(outcome.report().base_flight_number, Some(201));
    }

    #[tokio::test]
    async fn still_listed_last_launch_keeps_its_number() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "Starlink 4-8", 150, false),
                launch("next", "Transporter-4", 160, true),
            ],
            pads(),
        ));
        let outcome = reconciler(
            &store,
            &[
                ("2022 Mar 3", "Starlink 4-8", "SLC-40"),
                ("NET 2022 Q2", "Transporter-4", "SLC-4E"),
            ],
        )
        .run_pass()
        .await;

        assert!(outcome.is_completed());
        let patches = store.patches().await;
        assert_eq!(patches.len(), 1);
        let update = &patches[0].1;
        assert_eq!(update.flight_number, 151);
        assert_eq!(update.date_precision, DatePrecision::Quarter);
        assert!(update.net);
        assert_eq!(update.date_utc, "2022-04-01T00:00:00Z");
        assert_eq!(update.launchpad, "pad-slc4e");
        assert_eq!(update.date_local, "2022-03-31T17:00:00-07:00");
    }

    #[tokio::test]
    async fn paused_launches_are_left_alone() {
        let mut paused = launch("paused", "Starlink 4-9", 201, true);
        paused.auto_update = false;
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), paused],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Mar 15", "Starlink 4-9", "SLC-40")])
            .run_pass()
            .await;
        assert!(outcome.is_completed());
        assert!(store.patches().await.is_empty());
    }

    #[tokio::test]
    async fn failure_aborts_pass_but_keeps_earlier_patches() {
        let health = CountingHealth::default();
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("a", "Starlink 4-9", 201, true),
                launch("b", "SES-22", 202, true),
                launch("c", "Nusantara Satu", 203, true),
            ],
            pads(),
        ));
        let outcome = reconciler(
            &store,
            &[
                ("2022 Mar 15 [18:00]", "Starlink 4-9", "SLC-40"),
                ("sometime soon", "SES-22", "SLC-40"),
                ("2022 Apr", "Nusantara Satu", "SLC-40"),
            ],
        )
        .with_health(Box::new(health.clone()))
        .run_logged()
        .await;

        match outcome.error() {
            Some(ReconError::UnparseableDate { raw, .. }) => assert_eq!(raw, "sometime soon"),
            other => panic!("unexpected outcome {other:?}"),
        }
        let patches = store.patches().await;
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "a");
        assert_eq!(outcome.report().updates.len(), 1);
        assert!(outcome.report().error.is_some());
        assert_eq!(health.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_site_code_aborts() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), launch("a", "SES-22", 201, true)],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Mar", "SES-22", "XYZ-1")]).run_pass().await;
        assert_eq!(
            outcome.error(),
            Some(&ReconError::UnresolvedLaunchpad { raw: "XYZ-1".into() })
        );
        assert!(store.patches().await.is_empty());
    }

    #[tokio::test]
    async fn missing_launchpad_record_aborts() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), launch("a", "Axiom-1", 201, true)],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Mar 30", "Axiom-1", "LC-39A")]).run_pass().await;
        assert_eq!(
            outcome.error(),
            Some(&ReconError::SiteLookupMiss { canonical: "KSC LC 39A".into() })
        );
    }

    #[tokio::test]
    async fn duplicate_flight_numbers_abort_before_dispatch() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("a", "Nusantara", 201, true),
                launch("b", "Nusantara Satu", 202, true),
            ],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Feb", "Nusantara Satu", "SLC-40")])
            .run_pass()
            .await;
        assert_eq!(
            outcome.error(),
            Some(&ReconError::MatchAmbiguity {
                flight_number: 201,
                first: "a".into(),
                second: "b".into(),
            })
        );
        assert_eq!(store.patches().await.len(), 1);
    }

    #[tokio::test]
    async fn lenient_mode_reports_duplicate_flight_numbers() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("a", "Nusantara", 201, true),
                launch("b", "Nusantara Satu", 202, true),
            ],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Feb", "Nusantara Satu", "SLC-40")])
            .with_options(ReconcileOptions {
                enforce_unique_flight_numbers: false,
                ..ReconcileOptions::default()
            })
            .run_pass()
            .await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.report().flight_conflicts.len(), 1);
        assert_eq!(store.patches().await.len(), 2);
    }

    #[tokio::test]
    async fn dry_run_dispatches_nothing() {
        let health = CountingHealth::default();
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), launch("a", "SES-22", 205, true)],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Jun 29 [21:04]", "SES-22", "SLC-40")])
            .with_options(ReconcileOptions {
                dry_run: true,
                ..ReconcileOptions::default()
            })
            .with_health(Box::new(health.clone()))
            .run_pass()
            .await;

        assert!(outcome.is_completed());
        assert!(store.patches().await.is_empty());
        let applied = &outcome.report().updates;
        assert_eq!(applied.len(), 1);
        assert!(!applied[0].dispatched);
        assert_eq!(applied[0].update.flight_number, 201);
        assert_eq!(health.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_pass_pings_health() {
        let health = CountingHealth::default();
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false)],
            pads(),
        ));
        let outcome = reconciler(&store, &[("2022 Mar", "Starlink 4-9", "SLC-40")])
            .with_health(Box::new(health.clone()))
            .run_pass()
            .await;
        assert!(outcome.is_completed());
        assert_eq!(health.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rows_beyond_window_are_ignored() {
        let payloads: Vec<String> = (0..31).map(|i| format!("Mission {i}X")).collect();
        let rows: Vec<(&str, &str, &str)> = payloads
            .iter()
            .map(|p| ("2022 Dec", p.as_str(), "SLC-40"))
            .collect();
        let store = Arc::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("late", "Mission 30X", 250, true),
                launch("early", "Mission 29X", 249, true),
            ],
            pads(),
        ));
        let outcome = reconciler(&store, &rows).run_pass().await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.report().manifest_rows, 30);
        let patches = store.patches().await;
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "early");
        assert_eq!(patches[0].1.flight_number, 230);
    }

    #[tokio::test]
    async fn layout_drift_is_reported_as_layout_error() {
        let store = Arc::new(MemoryCatalogStore::new(vec![launch("past", "CRS-24", 200, false)], pads()));
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticSource("<html><body><p>moved</p></body></html>".into())),
            Box::new(WikiStrideDecoder::new("table > tbody")),
        );
        let outcome = reconciler.run_pass().await;
        assert!(matches!(outcome.error(), Some(ReconError::ManifestLayout(_))));
        assert_eq!(outcome.report().schema_version, "wiki-stride/v1");
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let store = Arc::new(MemoryCatalogStore::new(vec![launch("past", "CRS-24", 200, false)], pads()));
        let reconciler = reconciler(&store, &[("2022 Mar", "Starlink 4-9", "SLC-40")]);
        let guard = reconciler.pass_lock.lock().await;
        assert!(reconciler.try_run_pass().await.is_none());
        drop(guard);
        assert!(reconciler.try_run_pass().await.is_some());
    }

    #[tokio::test]
    async fn catalog_listing_failure_aborts_before_fetching() {
        let health = CountingHealth::default();
        let mut store = FlakyStore::new(MemoryCatalogStore::new(vec![launch("a", "SES-22", 201, true)], pads()));
        store.fail_listing = true;
        let reconciler = Reconciler::new(
            Arc::new(store),
            Box::new(StaticSource(manifest_html(&[("2022 Mar", "SES-22", "SLC-40")]))),
            Box::new(WikiStrideDecoder::new("table > tbody")),
        )
        .with_health(Box::new(health.clone()));

        let outcome = reconciler.run_logged().await;
        match outcome.error() {
            Some(ReconError::UpstreamFetch(message)) => assert!(message.contains("503"), "{message}"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(outcome.report().manifest_sha256.is_none());
        assert_eq!(health.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_manifest_is_an_upstream_failure() {
        let store = Arc::new(MemoryCatalogStore::new(vec![launch("past", "CRS-24", 200, false)], pads()));
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(MissingFileSource),
            Box::new(WikiStrideDecoder::new("table > tbody")),
        );

        let outcome = reconciler.run_pass().await;
        match outcome.error() {
            Some(ReconError::UpstreamFetch(message)) => assert!(message.contains("missing.html"), "{message}"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(outcome.report().manifest_source, "missing.html");
        assert!(store.patches().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_patch_aborts_and_keeps_earlier_dispatches() {
        let health = CountingHealth::default();
        let mut store = FlakyStore::new(MemoryCatalogStore::new(
            vec![
                launch("past", "CRS-24", 200, false),
                launch("a", "SES-22", 201, true),
                launch("b", "Nusantara Satu", 202, true),
                launch("c", "Crew-4", 203, true),
            ],
            pads(),
        ));
        store.reject_patch = Some(2);
        let store = Arc::new(store);
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticSource(manifest_html(&[
                ("2022 Jun 29 [21:04]", "SES-22", "SLC-40"),
                ("2022 Feb", "Nusantara Satu (PSN-6)", "SLC-40"),
                ("2022 Apr 27", "Crew-4 (ISS)", "SLC-40"),
            ]))),
            Box::new(WikiStrideDecoder::new("table > tbody")),
        )
        .with_health(Box::new(health.clone()));

        let outcome = reconciler.run_logged().await;
        match outcome.error() {
            Some(ReconError::Dispatch { launch_id, message }) => {
                assert_eq!(launch_id, "b");
                assert!(message.contains("500"), "{message}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let patches = store.inner.patches().await;
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "a");
        assert_eq!(outcome.report().updates.len(), 1);
        assert_eq!(store.patch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(health.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn configured_matcher_replaces_default_series_gate() {
        let store = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), launch("t4", "Transporter-4", 201, true)],
            pads(),
        ));
        let rows = [("2022 Q2", "Transporter-4 (SSO Rideshare)", "SLC-40")];

        let outcome = reconciler(&store, &rows).run_pass().await;
        assert!(outcome.is_completed());
        assert_eq!(store.patches().await.len(), 1);

        let strict = Arc::new(MemoryCatalogStore::new(
            vec![launch("past", "CRS-24", 200, false), launch("t4", "Transporter-4", 201, true)],
            pads(),
        ));
        let outcome = reconciler(&strict, &rows)
            .with_matcher(FuzzyMatcher::new(r"(?i)^transporter").unwrap())
            .run_pass()
            .await;
        assert!(outcome.is_completed());
        assert!(strict.patches().await.is_empty());
    }
}
