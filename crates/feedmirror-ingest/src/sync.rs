//! Sync loop
//!
//! One cycle walks every stage in order. Each stage checks its own output
//! first and skips when there is nothing to do, so a cycle that follows a
//! failed one resumes where the data left off. A stage error ends the cycle
//! early; the loop logs it and sleeps until the next interval.

use crate::config::SyncConfig;
use crate::duplicates::{detect_duplicates, enrich_duplicates};
use crate::error::{ErrorKind, Result, StageOutcome};
use crate::extractor::extract;
use crate::fetcher::Fetcher;
use crate::indexes::ensure_indexes;
use crate::loader::RecordLoader;
use crate::store::FeedStore;
use crate::tracker::MetadataTracker;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    CheckingFreshness,
    Fetching,
    Extracting,
    Loading,
    Indexing,
    DetectingDuplicates,
    Enriching,
    Sleeping,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::CheckingFreshness => "checking_freshness",
            SyncState::Fetching => "fetching",
            SyncState::Extracting => "extracting",
            SyncState::Loading => "loading",
            SyncState::Indexing => "indexing",
            SyncState::DetectingDuplicates => "detecting_duplicates",
            SyncState::Enriching => "enriching",
            SyncState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: SyncState,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: SyncState,
    pub kind: ErrorKind,
    pub message: String,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Stages that finished, in execution order
    pub stages: Vec<StageReport>,
    pub failure: Option<StageFailure>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn outcome(&self, stage: SyncState) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.outcome)
    }
}

/// Elapsed time as `h:mm:ss.mmm`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed.subsec_millis()
    )
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn FeedStore>,
    tracker: MetadataTracker,
    fetcher: Fetcher,
    loader: RecordLoader,
    state: watch::Sender<SyncState>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn FeedStore>) -> Result<Self> {
        let tracker = MetadataTracker::new(store.clone());
        let fetcher = Fetcher::new(&config, tracker.clone())?;
        let loader = RecordLoader::new(store.clone(), &config.pipeline);
        let (state, _) = watch::channel(SyncState::Idle);

        Ok(Self {
            config,
            store,
            tracker,
            fetcher,
            loader,
            state,
        })
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn tracker(&self) -> &MetadataTracker {
        &self.tracker
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// Run one full cycle without sleeping
    pub async fn run_once(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        info!("Starting sync cycle");
        if let Err(e) = self.cycle(&mut report).await {
            let stage = self.state();
            error!(stage = %stage, kind = %e.kind(), error = %e, "Sync cycle failed");
            report.failure = Some(StageFailure {
                stage,
                kind: e.kind(),
                message: e.to_string(),
            });
        }
        report.elapsed = started.elapsed();
        self.set_state(SyncState::Idle);

        info!(
            elapsed = %format_elapsed(report.elapsed),
            success = report.is_success(),
            "Finished sync cycle"
        );
        report
    }

    /// Cycle forever, sleeping `check_interval` between cycles, until `cancel`
    /// fires. Cancellation is only observed while sleeping.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.store.ping().await {
            warn!(error = %e, "Document store unreachable at startup, retrying next cycle");
        }

        let interval = self.config.check_interval();
        loop {
            self.run_once().await;

            self.set_state(SyncState::Sleeping);
            info!(next_check_secs = interval.as_secs(), "Sleeping until next check");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync loop cancelled");
                    break;
                },
                _ = tokio::time::sleep(interval) => {},
            }
        }
        self.set_state(SyncState::Idle);
    }

    async fn cycle(&self, report: &mut CycleReport) -> Result<()> {
        tokio::fs::create_dir_all(self.config.work_dir()).await?;
        let archive = self.config.archive_path();
        let dataset = self.config.dataset_path();

        let mut needs_fetch = true;
        self.stage(report, SyncState::CheckingFreshness, async {
            needs_fetch = self.fetcher.needs_fetch(&archive).await?;
            Ok(StageOutcome::Completed)
        })
        .await?;

        self.stage(report, SyncState::Fetching, async {
            if needs_fetch {
                self.fetcher.fetch().await
            } else {
                Ok(StageOutcome::skipped("remote archive unchanged"))
            }
        })
        .await?;

        self.stage(
            report,
            SyncState::Extracting,
            extract(
                &archive,
                &self.config.paths.member_name,
                &dataset,
                self.config.pipeline.extract_chunk_size,
            ),
        )
        .await?;

        self.stage(report, SyncState::Loading, async {
            Ok(self.loader.load(&dataset).await?.outcome())
        })
        .await?;

        self.stage(report, SyncState::Indexing, ensure_indexes(self.store.as_ref()))
            .await?;

        self.stage(
            report,
            SyncState::DetectingDuplicates,
            detect_duplicates(self.store.as_ref()),
        )
        .await?;

        self.stage(
            report,
            SyncState::Enriching,
            enrich_duplicates(self.store.as_ref(), self.config.pipeline.enrich_page_size),
        )
        .await?;

        Ok(())
    }

    async fn stage(
        &self,
        report: &mut CycleReport,
        stage: SyncState,
        work: impl Future<Output = Result<StageOutcome>>,
    ) -> Result<()> {
        self.set_state(stage);
        let started = Instant::now();
        let outcome = work.await?;
        let elapsed = started.elapsed();

        info!(
            stage = %stage,
            outcome = %outcome,
            elapsed = %format_elapsed(elapsed),
            "Finished stage"
        );
        report.stages.push(StageReport {
            stage,
            outcome,
            elapsed,
        });
        Ok(())
    }
}
