//! Organizerr
//!
//! Keeps a browsable symlink mirror of a video archive in step with its
//! catalog, and normalizes the archive's files to H.264/AAC on request.

pub mod catalog;
pub mod cleanup;
pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod job_executor;
pub mod layout;
pub mod orphans;
pub mod probe;
pub mod reconcile;
pub mod record;
pub mod replace;
pub mod ringlog;
pub mod sanitize;
pub mod scheduler;
pub mod server;
pub mod startup;
pub mod status;
pub mod store;
pub mod transcode;

pub use organizerr_config as config;
pub use organizerr_config::Config;
pub use catalog::{CatalogClient, CatalogError, CatalogSnapshot};
pub use cleanup::{is_legacy_folder, sweep, CleanupReport};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{Organizer, OrganizerError, PassSummary};
pub use encode::{select_encoder, EncodePlan, EncodeStrategy, H264Encoder};
pub use job_executor::{JobState, SubmitError, Submitted, TranscodeExecutor, TranscodeJob};
pub use layout::MirrorLayout;
pub use orphans::{detect_orphans, OrphanRecord};
pub use reconcile::{reconcile, LinkOutcome, ReconcileReport};
pub use record::{Page, StatusCounts, VideoMeta, VideoRecord, VideoStatus};
pub use ringlog::{LogTail, RingLog, SharedLog};
pub use sanitize::sanitize;
pub use scheduler::{run_scheduler, start_scheduler};
pub use server::{create_router, run_server, ServerError};
pub use startup::{run_startup_checks, StartupError, StartupReport};
pub use status::{JobKind, JobStatus, StatusReport, Trigger};
pub use store::{StateStore, StoreError};
pub use transcode::{FfmpegTools, MediaTools, TranscodeError, TranscodeOutcome, Transcoder};
