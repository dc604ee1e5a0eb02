//! Organizer service: owns the mirror components and implements the
//! query/trigger surface used by the scheduler and the HTTP API.

use crate::catalog::{CatalogClient, CatalogError};
use crate::cleanup::{sweep, CleanupReport};
use crate::concurrency::derive_plan;
use crate::config::Config;
use crate::job_executor::{SubmitError, Submitted, TranscodeExecutor};
use crate::layout::MirrorLayout;
use crate::orphans::{detect_orphans, OrphanRecord};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::record::{Page, VideoRecord};
use crate::ringlog::{LogTail, RingLog, SharedLog};
use crate::startup::{run_startup_checks, StartupError};
use crate::status::{FlightTicket, JobKind, SingleFlight, StatusReport, Trigger};
use crate::store::{StateStore, StoreError};
use crate::transcode::{FfmpegTools, MediaTools, Transcoder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type for organizer operations
#[derive(Debug, Error)]
pub enum OrganizerError {
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Transcode error: {0}")]
    Submit(#[from] SubmitError),

    /// Another guarded job is running
    #[error("Busy: {0} is running")]
    Busy(JobKind),

    #[error("Background task failed: {0}")]
    Join(String),
}

/// What one full pass did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassSummary {
    pub catalog_videos: usize,
    /// False when catalog pagination stopped on an error
    pub catalog_complete: bool,
    pub cleanup: CleanupReport,
    pub reconcile: ReconcileReport,
}

impl PassSummary {
    pub fn summary(&self) -> String {
        let catalog = if self.catalog_complete {
            format!("{} catalog videos", self.catalog_videos)
        } else {
            format!("{} catalog videos (partial)", self.catalog_videos)
        };
        format!(
            "{}; cleanup: {}; links: {}",
            catalog,
            self.cleanup.summary(),
            self.reconcile.summary()
        )
    }
}

pub struct Organizer {
    config: Config,
    store: StateStore,
    catalog: CatalogClient,
    layout: MirrorLayout,
    op_log: SharedLog,
    transcode_log: SharedLog,
    guard: SingleFlight,
    executor: TranscodeExecutor,
}

impl Organizer {
    /// Run the startup checks, open the state store under the configured data
    /// directory and wire up the real ffmpeg tools.
    pub async fn new(config: Config) -> Result<Self, OrganizerError> {
        let startup = run_startup_checks(&config)?;
        let store = StateStore::open(&config.paths.database_path()).await?;
        let tools = Arc::new(FfmpegTools::new(
            config.transcode.ffmpeg_bin.clone(),
            config.transcode.ffprobe_bin.clone(),
        ));

        let organizer = Self::with_parts(config, store, tools)?;
        if let Some(version) = &startup.ffmpeg_version {
            organizer.transcode_log.info(format!("ffmpeg {}", version));
        }
        for warning in &startup.warnings {
            organizer.op_log.warn(warning);
        }
        Ok(organizer)
    }

    /// Build an organizer from an existing store and media tools.
    pub fn with_parts(
        config: Config,
        store: StateStore,
        tools: Arc<dyn MediaTools>,
    ) -> Result<Self, OrganizerError> {
        let catalog = CatalogClient::new(&config.catalog)?;
        let layout = MirrorLayout::from_config(&config.paths);
        let op_log = RingLog::shared("organizer", config.logs.capacity, config.logs.max_line_len);
        let transcode_log =
            RingLog::shared("transcode", config.logs.capacity, config.logs.max_line_len);

        let transcoder = Arc::new(Transcoder::new(tools, layout.clone(), transcode_log.clone()));
        let plan = derive_plan(&config.transcode);
        log::info!(
            "Transcode slots: {} ({} cores)",
            plan.max_concurrent_transcodes,
            plan.total_cores
        );
        let executor = TranscodeExecutor::new(plan, transcoder, transcode_log.clone());

        Ok(Self {
            config,
            store,
            catalog,
            layout,
            op_log,
            transcode_log,
            guard: SingleFlight::new(),
            executor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn op_log(&self) -> SharedLog {
        self.op_log.clone()
    }

    pub fn guard(&self) -> &SingleFlight {
        &self.guard
    }

    pub async fn status(&self) -> Result<StatusReport, OrganizerError> {
        Ok(StatusReport {
            counts: self.store.counts().await?,
            videos: self.store.all().await?,
            job: self.guard.snapshot(),
            transcodes: self.executor.jobs().await,
        })
    }

    pub async fn missing(&self, page: u32, per_page: u32) -> Result<Page<VideoRecord>, OrganizerError> {
        Ok(self.store.missing_page(page, per_page).await?)
    }

    pub fn log_tail(&self, offset: u64, limit: usize) -> LogTail {
        self.op_log.tail(offset, limit)
    }

    pub fn transcode_log_tail(&self, offset: u64, limit: usize) -> LogTail {
        self.transcode_log.tail(offset, limit)
    }

    /// Start a full pass in the background unless a guarded job is running.
    pub fn trigger_scan(self: &Arc<Self>) -> Trigger {
        let Some(ticket) = self.guard.try_begin(JobKind::Scan) else {
            self.op_log.warn("Scan requested while busy, ignored");
            return Trigger::Busy;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move { this.scan_with(ticket).await });
        Trigger::Accepted
    }

    /// Start a cleanup sweep in the background unless a guarded job is running.
    pub fn trigger_cleanup(self: &Arc<Self>) -> Trigger {
        let Some(ticket) = self.guard.try_begin(JobKind::Cleanup) else {
            self.op_log.warn("Cleanup requested while busy, ignored");
            return Trigger::Busy;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.run_cleanup().await {
                Ok(report) => ticket.finish(format!("cleanup: {}", report.summary())),
                Err(e) => {
                    this.op_log.error(format!("Cleanup failed: {}", e));
                    ticket.finish(format!("cleanup failed: {}", e));
                }
            }
        });
        Trigger::Accepted
    }

    /// Pass started by the scheduler; skipped when a guarded job is running.
    pub async fn scheduled_pass(&self) -> Trigger {
        match self.guard.try_begin(JobKind::Scan) {
            Some(ticket) => {
                self.scan_with(ticket).await;
                Trigger::Accepted
            }
            None => {
                let running = self.guard.snapshot().running;
                self.op_log.info(format!(
                    "Scheduled scan skipped, {} is running",
                    running.map(|k| k.as_str()).unwrap_or("another job")
                ));
                Trigger::Busy
            }
        }
    }

    /// Find dangling links, mark them missing in the store and return them.
    pub async fn detect_orphans(&self) -> Result<Vec<OrphanRecord>, OrganizerError> {
        let ticket = self.guard.try_begin(JobKind::Orphans).ok_or_else(|| {
            OrganizerError::Busy(self.guard.snapshot().running.unwrap_or(JobKind::Orphans))
        })?;

        self.op_log.info("Orphan detection started");
        let layout = self.layout.clone();
        let orphans = match tokio::task::spawn_blocking(move || detect_orphans(&layout)).await {
            Ok(orphans) => orphans,
            Err(e) => {
                ticket.finish("orphan detection failed");
                return Err(OrganizerError::Join(e.to_string()));
            }
        };

        for orphan in &orphans {
            self.op_log.warn(format!(
                "Orphan: {} -> {}",
                orphan.symlink_path.display(),
                orphan.target.display()
            ));
        }
        let records: Vec<VideoRecord> = orphans.iter().map(OrphanRecord::to_record).collect();
        if let Err(e) = self.store.upsert_many(&records).await {
            self.op_log.error(format!("Failed to record orphans: {}", e));
            ticket.finish("orphan detection failed");
            return Err(e.into());
        }

        let summary = format!("{} orphaned links", orphans.len());
        self.op_log.info(format!("Orphan detection finished: {}", summary));
        ticket.finish(summary);
        Ok(orphans)
    }

    /// Queue a transcode and return the encoder it will use.
    pub async fn trigger_transcode(&self, path: PathBuf) -> Result<Submitted, OrganizerError> {
        Ok(self.executor.submit(path).await?)
    }

    async fn scan_with(&self, ticket: FlightTicket) {
        match self.run_pass().await {
            Ok(pass) => ticket.finish(pass.summary()),
            Err(e) => {
                self.op_log.error(format!("Scan failed: {}", e));
                ticket.finish(format!("scan failed: {}", e));
            }
        }
    }

    /// Fetch the catalog, sweep legacy folders, reconcile links and persist
    /// the linked rows. Callers hold the guard.
    pub async fn run_pass(&self) -> Result<PassSummary, OrganizerError> {
        self.op_log.info("Scan started");

        let snapshot = self.catalog.fetch_all().await;
        match &snapshot.error {
            None => self.op_log.info(format!(
                "Catalog: {} videos from {} pages",
                snapshot.videos.len(),
                snapshot.pages_fetched
            )),
            Some(e) => self.op_log.warn(format!(
                "Catalog incomplete ({}), continuing with {} videos",
                e,
                snapshot.videos.len()
            )),
        }

        let cleanup = self.run_cleanup().await?;

        let layout = self.layout.clone();
        let catalog_videos = snapshot.videos.len();
        let catalog_complete = snapshot.is_complete();
        let videos = snapshot.videos;
        let pass = tokio::task::spawn_blocking(move || reconcile(&videos, &layout))
            .await
            .map_err(|e| OrganizerError::Join(e.to_string()))?;

        for failure in pass.report.failures() {
            self.op_log.warn(failure);
        }
        self.store.replace_linked(&pass.records).await?;

        let summary = PassSummary {
            catalog_videos,
            catalog_complete,
            cleanup,
            reconcile: pass.report,
        };
        self.op_log.info(format!("Scan finished: {}", summary.summary()));
        Ok(summary)
    }

    /// Sweep legacy folders. Callers hold the guard.
    pub async fn run_cleanup(&self) -> Result<CleanupReport, OrganizerError> {
        let target_root = self.layout.target_root.clone();
        let report = tokio::task::spawn_blocking(move || sweep(&target_root))
            .await
            .map_err(|e| OrganizerError::Join(e.to_string()))?;

        for removed in &report.removed {
            self.op_log.info(format!("Removed legacy folder {}", removed.display()));
        }
        for skipped in &report.skipped {
            self.op_log.warn(format!(
                "Kept legacy folder {}: {}",
                skipped.path.display(),
                skipped.reason
            ));
        }
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CatalogConfig, PathsConfig};
    use crate::record::VideoStatus;
    use crate::transcode::tests::{codecs, FakeTools};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn serve_catalog(entries: Vec<serde_json::Value>) -> String {
        let body = json!({
            "data": entries,
            "paginate": {"current_page": 1, "last_page": 1}
        });
        let app = Router::new().route(
            "/api/video/",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    pub(crate) async fn organizer(tmp: &TempDir, catalog_url: String) -> Arc<Organizer> {
        let config = Config {
            catalog: CatalogConfig {
                url: catalog_url,
                token: "t".to_string(),
                timeout_secs: 5,
                max_pages: 10,
            },
            paths: PathsConfig {
                source_root: tmp.path().join("source"),
                target_root: tmp.path().join("target"),
                host_source_root: PathBuf::from("/mnt/host/bp"),
                data_dir: tmp.path().join("data"),
            },
            ..Config::default()
        };
        fs::create_dir_all(&config.paths.source_root).unwrap();
        fs::create_dir_all(&config.paths.target_root).unwrap();

        let store = StateStore::in_memory().await.unwrap();
        let tools = Arc::new(FakeTools::new(codecs("vp9", "opus"), "", vec![]));
        Arc::new(Organizer::with_parts(config, store, tools).unwrap())
    }

    pub(crate) async fn wait_idle(org: &Organizer) {
        for _ in 0..300 {
            if !org.guard().is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("organizer stayed busy");
    }

    fn add_source(tmp: &TempDir, channel: &str, file: &str) {
        let dir = tmp.path().join("source").join(channel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), b"video").unwrap();
    }

    #[tokio::test]
    async fn test_scan_links_and_records() {
        let tmp = TempDir::new().unwrap();
        add_source(&tmp, "UC1", "abc.mp4");
        add_source(&tmp, "UC1", "zzz.mp4");
        let url = serve_catalog(vec![json!({
            "youtube_id": "abc",
            "title": "T",
            "channel": {"channel_name": "Ch"},
            "published": "2020-01-02T00:00:00"
        })])
        .await;
        let org = organizer(&tmp, url).await;

        assert_eq!(org.trigger_scan(), Trigger::Accepted);
        wait_idle(&org).await;

        let link = tmp.path().join("target/Ch/2020-01-02 - T/video.mp4");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            PathBuf::from("/mnt/host/bp/UC1/abc.mp4")
        );

        let status = org.status().await.unwrap();
        assert_eq!(status.counts.linked, 1);
        assert_eq!(status.videos[0].video_id, "abc");
        let summary = status.job.last_summary.unwrap();
        assert!(summary.contains("1 new"), "{}", summary);
        assert!(summary.contains("1 not in catalog"), "{}", summary);
    }

    #[tokio::test]
    async fn test_second_pass_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        add_source(&tmp, "UC1", "abc.mp4");
        let url = serve_catalog(vec![json!({"youtube_id": "abc", "title": "T"})]).await;
        let org = organizer(&tmp, url).await;

        let first = org.run_pass().await.unwrap();
        assert_eq!(first.reconcile.created, 1);
        let second = org.run_pass().await.unwrap();
        assert_eq!(second.reconcile.new_links(), 0);
        assert_eq!(second.reconcile.verified, 1);
        assert_eq!(org.store().counts().await.unwrap().linked, 1);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_still_sweeps() {
        let tmp = TempDir::new().unwrap();
        let legacy = tmp.path().join("target/Ch/2020-01-02T00:00:00 - T");
        fs::create_dir_all(&legacy).unwrap();
        symlink("/mnt/host/bp/UC1/abc.mp4", legacy.join("video.mp4")).unwrap();

        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;
        let pass = org.run_pass().await.unwrap();
        assert!(!pass.catalog_complete);
        assert_eq!(pass.cleanup.removed, vec![legacy.clone()]);
        assert!(!legacy.exists());
    }

    #[tokio::test]
    async fn test_triggers_rejected_while_busy() {
        let tmp = TempDir::new().unwrap();
        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;

        let ticket = org.guard().try_begin(JobKind::Scan).unwrap();
        assert_eq!(org.trigger_scan(), Trigger::Busy);
        assert_eq!(org.trigger_cleanup(), Trigger::Busy);
        assert_eq!(org.scheduled_pass().await, Trigger::Busy);
        assert!(matches!(
            org.detect_orphans().await,
            Err(OrganizerError::Busy(JobKind::Scan))
        ));

        let status = org.status().await.unwrap();
        assert_eq!(status.job.running, Some(JobKind::Scan));
        drop(ticket);
        assert_eq!(org.trigger_cleanup(), Trigger::Accepted);
        wait_idle(&org).await;
    }

    #[tokio::test]
    async fn test_detect_orphans_marks_missing() {
        let tmp = TempDir::new().unwrap();
        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;
        let folder = tmp.path().join("target/Chan/2021-05-01 - My Title");
        fs::create_dir_all(&folder).unwrap();
        symlink("/mnt/host/bp/UC1/gone.mp4", folder.join("video.mp4")).unwrap();

        let orphans = org.detect_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);

        let row = org.store().get("gone").await.unwrap().unwrap();
        assert_eq!(row.status, VideoStatus::Missing);
        assert_eq!(row.title, "My Title");

        let page = org.missing(1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(!org.guard().is_busy());
        assert!(!org.log_tail(0, 100).lines.is_empty());
    }

    #[tokio::test]
    async fn test_relink_clears_missing() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("target/Ch/2020-01-02 - T");
        fs::create_dir_all(&folder).unwrap();
        symlink("/mnt/host/bp/UC1/abc.mp4", folder.join("video.mp4")).unwrap();

        let url = serve_catalog(vec![json!({
            "youtube_id": "abc",
            "title": "T",
            "channel": {"channel_name": "Ch"},
            "published": "2020-01-02"
        })])
        .await;
        let org = organizer(&tmp, url).await;
        org.detect_orphans().await.unwrap();
        assert_eq!(org.store().counts().await.unwrap().missing, 1);

        // The file comes back and the next pass relinks it
        add_source(&tmp, "UC1", "abc.mp4");
        let pass = org.run_pass().await.unwrap();
        assert_eq!(pass.reconcile.verified, 1);
        let counts = org.store().counts().await.unwrap();
        assert_eq!((counts.linked, counts.missing), (1, 0));
    }

    #[tokio::test]
    async fn test_trigger_transcode_reports_encoder() {
        let tmp = TempDir::new().unwrap();
        add_source(&tmp, "UC1", "abc.mp4");
        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;

        let submitted = org
            .trigger_transcode(tmp.path().join("source/UC1/abc.mp4"))
            .await
            .unwrap();
        assert_eq!(submitted.encoder, "libx264");

        let missing = org.trigger_transcode(tmp.path().join("nope.mp4")).await;
        assert!(matches!(missing, Err(OrganizerError::Submit(_))));
    }
}
