//! Backup cycle orchestration
//!
//! A normal run stages every volume (drain, closure build, snapshot
//! selection), then writes rsyncd.conf. A post-backup run deletes the
//! snapshots this tool created. Volumes are processed in parallel up to
//! `max_parallel_volumes`. Every volume is attempted before any failure is
//! reported, and all failures are reported together.

use crate::hooks::{Hook, HookRunner};
use crate::locks::RunLock;
use crate::logs;
use crate::records::SnapshotRecordStore;
use crate::rsyncd::{self, RsyncModule, RsyncdConf};
use crate::settings::Settings;
use anyhow::{Context, Result};
use journal::{build_closure, drain, ClosureOutcome, DrainOutcome, QueueRetention};
use snapshot::{CleanupReport, Selection, SnapshotManager, SnapshotProvider};
use stage_core::{Stage, StageError, VolumeConfig, VolumeFailure, VolumeId};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What the upcoming rsync pass will transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackupType {
    /// Only paths in each volume's filter list
    #[default]
    Incr,
    /// Whole volumes; filter lists are not consulted
    Full,
}

/// Outcome of the rsync pass, reported to `post-backup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupResult {
    Success,
    Failed,
}

impl BackupResult {
    fn hook(&self) -> Hook {
        match self {
            BackupResult::Success => Hook::PostBackupSuccess,
            BackupResult::Failed => Hook::PostBackupFailed,
        }
    }
}

/// Per-volume outcome of a normal run
#[derive(Debug)]
pub struct VolumeRun {
    pub volume: VolumeId,
    pub drained: Option<DrainOutcome>,
    pub closure: Option<ClosureOutcome>,
    pub selection: Option<Selection>,
}

impl VolumeRun {
    fn new(volume: VolumeId) -> Self {
        Self {
            volume,
            drained: None,
            closure: None,
            selection: None,
        }
    }

    /// Drain and closure build both completed, so the filter list is usable
    pub fn pipeline_ok(&self) -> bool {
        self.closure.is_some()
    }
}

/// Result of a normal run
#[derive(Debug, Default)]
pub struct RunReport {
    pub volumes: Vec<VolumeRun>,
    pub failures: Vec<VolumeFailure>,
    /// Modules written to rsyncd.conf
    pub modules: usize,
}

/// Per-volume outcome of a post-backup run
#[derive(Debug)]
pub struct VolumeCleanup {
    pub volume: VolumeId,
    pub deleted: usize,
    pub gone: usize,
    pub kept: usize,
    pub queue_cleared: bool,
}

/// Result of a post-backup run
#[derive(Debug, Default)]
pub struct CleanupSummary {
    pub volumes: Vec<VolumeCleanup>,
    pub failures: Vec<VolumeFailure>,
}

/// Wraps the collected failures of a run, if any
pub fn aggregate(failures: Vec<VolumeFailure>) -> stage_core::Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(StageError::Aggregate(failures))
    }
}

impl RunReport {
    pub fn into_result(self) -> stage_core::Result<()> {
        aggregate(self.failures)
    }
}

impl CleanupSummary {
    pub fn into_result(self) -> stage_core::Result<()> {
        aggregate(self.failures)
    }
}

/// Run `task` once per volume, at most `limit` at a time, and wait for all
///
/// Results come back sorted by volume. A task that panicked or was cancelled
/// still produces an entry, as [`StageError::TaskAborted`].
pub async fn fan_out<T, F, Fut>(
    volumes: Vec<VolumeConfig>,
    limit: usize,
    task: F,
) -> Vec<(VolumeId, stage_core::Result<T>)>
where
    F: Fn(VolumeConfig) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks: JoinSet<(VolumeId, T)> = JoinSet::new();
    let mut pending: BTreeSet<VolumeId> = BTreeSet::new();

    for volume in volumes {
        let id = volume.id.clone();
        pending.insert(id.clone());

        let work = task(volume);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            // The semaphore is never closed; a missing permit only lifts the bound
            let _permit = semaphore.acquire_owned().await.ok();
            (id, work.await)
        });
    }

    let mut results = Vec::with_capacity(pending.len());
    let mut join_errors = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, output)) => {
                pending.remove(&id);
                results.push((id, Ok(output)));
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "volume task panicked"
                } else {
                    "volume task was cancelled"
                };
                error!(error = %e, "{}", reason);
                join_errors.push(reason);
            }
        }
    }

    // Whatever did not report back is accounted for here
    let reason = join_errors.first().copied().unwrap_or("volume task lost");
    for id in pending {
        results.push((id, Err(StageError::TaskAborted(reason.to_string()))));
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Stage one volume: drain, build the filter list, then pick a snapshot
///
/// A pipeline failure does not stop snapshot selection; the volume is still
/// backed up, just without a trustworthy filter list.
async fn stage_volume(
    volume: VolumeConfig,
    manager: SnapshotManager,
    retention: QueueRetention,
) -> (VolumeRun, Vec<VolumeFailure>) {
    let mut run = VolumeRun::new(volume.id.clone());
    let mut failures = Vec::new();

    let pipeline = async {
        let drained = drain(&volume.input_queue, &volume.intermediate_queue).await?;
        let closure = build_closure(&volume.intermediate_queue, &volume.output_filter, retention).await?;
        Ok::<_, StageError>((drained, closure))
    };

    match pipeline.await {
        Ok((drained, closure)) => {
            info!(
                volume = %volume.id,
                drained = drained.lines(),
                rules = closure.rules_written,
                dropped = closure.dropped,
                "Filter list ready"
            );
            run.drained = Some(drained);
            run.closure = Some(closure);
        }
        Err(e) => {
            error!(volume = %volume.id, error = %e, "Change list pipeline failed");
            failures.push(VolumeFailure::new(volume.id.clone(), Stage::Pipeline, e));
        }
    }

    match manager.select(&volume).await {
        Ok(selection) => run.selection = Some(selection),
        Err(e) => {
            error!(volume = %volume.id, error = %e, "No snapshot for volume");
            failures.push(VolumeFailure::new(volume.id.clone(), Stage::Snapshot, e));
        }
    }

    (run, failures)
}

/// Drives normal and post-backup runs
pub struct Orchestrator {
    settings: Arc<Settings>,
    manager: SnapshotManager,
    records: SnapshotRecordStore,
    hooks: HookRunner,
}

impl Orchestrator {
    pub fn new(settings: Arc<Settings>, provider: Arc<dyn SnapshotProvider>) -> Self {
        let manager = SnapshotManager::new(provider, settings.provider_timeout());
        let records = SnapshotRecordStore::open(&settings.state_dir());
        let hooks = HookRunner::new(settings.hook_scripts_dir());
        Self {
            settings,
            manager,
            records,
            hooks,
        }
    }

    pub fn records(&self) -> &SnapshotRecordStore {
        &self.records
    }

    fn volumes(&self) -> Result<Vec<VolumeConfig>> {
        let records = self
            .records
            .load_all()
            .context("Failed to load snapshot records")?;
        Ok(self.settings.volume_configs(&records))
    }

    /// Stage every volume and publish the snapshots to rsyncd
    pub async fn run(&self, backup_type: BackupType) -> Result<RunReport> {
        let _lock = RunLock::acquire(&self.settings.state_dir())?;
        let volumes = self.volumes()?;
        info!(volumes = volumes.len(), ?backup_type, "Starting staging run");

        self.hooks.run(Hook::PreSnapshot).await;

        let manager = self.manager.clone();
        let retention = self.settings.settings.queue_retention;
        let staged = fan_out(
            volumes.clone(),
            self.settings.settings.max_parallel_volumes,
            move |volume| stage_volume(volume, manager.clone(), retention),
        )
        .await;

        let mut report = RunReport::default();
        for (id, outcome) in staged {
            match outcome {
                Ok((run, failures)) => {
                    if let Some(created) = run.selection.as_ref().and_then(Selection::newly_created) {
                        if let Err(e) = self.records.record_created(&id, created) {
                            error!(volume = %id, snapshot = %created, error = %e, "Failed to record created snapshot");
                            report
                                .failures
                                .push(VolumeFailure::new(id.clone(), Stage::Snapshot, e));
                        }
                    }
                    report.failures.extend(failures);
                    report.volumes.push(run);
                }
                Err(e) => {
                    report.failures.push(VolumeFailure::new(id.clone(), Stage::Pipeline, e));
                    report.volumes.push(VolumeRun::new(id));
                }
            }
        }

        self.hooks.run(Hook::PostSnapshot).await;

        for volume in &volumes {
            let Some(base) = &volume.log_to_file else {
                continue;
            };
            if let Err(e) = logs::cycle_volume_logs(base).await {
                warn!(volume = %volume.id, error = %e, "Failed to cycle logs");
                report
                    .failures
                    .push(VolumeFailure::new(volume.id.clone(), Stage::Logs, e));
            }
        }

        let conf = self.rsyncd_conf(&volumes, &report, backup_type);
        report.modules = conf.modules().len();
        conf.save(&self.settings.rsync.conf_path)?;
        rsyncd::restart(&self.settings.rsync.restart_command).await?;

        info!(
            volumes = report.volumes.len(),
            failures = report.failures.len(),
            modules = report.modules,
            "Staging run complete"
        );
        Ok(report)
    }

    fn rsyncd_conf(
        &self,
        volumes: &[VolumeConfig],
        report: &RunReport,
        backup_type: BackupType,
    ) -> RsyncdConf {
        let mut conf = RsyncdConf::new(&self.settings.rsync);

        for run in &report.volumes {
            let Some(selection) = &run.selection else {
                warn!(volume = %run.volume, "No snapshot selected, volume left out of rsyncd.conf");
                continue;
            };

            let mut module = RsyncModule::new(
                &self.settings.rsync.module_prefix,
                &run.volume,
                &selection.snapshot.device_path,
            );

            if backup_type == BackupType::Incr {
                if !run.pipeline_ok() {
                    warn!(volume = %run.volume, "Filter list incomplete, volume left out of incremental backup");
                    continue;
                }
                if let Some(volume) = volumes.iter().find(|v| v.id == run.volume) {
                    module = module.with_include_from(volume.output_filter.clone());
                }
            }

            conf.add_module(module);
        }

        conf
    }

    /// Delete created snapshots after the rsync pass
    pub async fn post_backup(&self, result: BackupResult) -> Result<CleanupSummary> {
        let _lock = RunLock::acquire(&self.settings.state_dir())?;
        let volumes = self.volumes()?;
        info!(volumes = volumes.len(), ?result, "Starting post-backup cleanup");

        self.hooks.run(Hook::PostBackup).await;

        let manager = self.manager.clone();
        let cleaned = fan_out(
            volumes.clone(),
            self.settings.settings.max_parallel_volumes,
            move |volume| {
                let manager = manager.clone();
                async move { manager.cleanup(&volume).await }
            },
        )
        .await;

        let mut summary = CleanupSummary::default();
        for (id, outcome) in cleaned {
            match outcome.and_then(|r| r) {
                Ok(report) => {
                    let volume = self.apply_cleanup(&id, report, &mut summary.failures);
                    summary.volumes.push(volume);
                }
                Err(e) => {
                    summary.failures.push(VolumeFailure::new(id, Stage::Cleanup, e));
                }
            }
        }

        let clear_queues = result == BackupResult::Success
            && self.settings.settings.queue_retention == QueueRetention::KeepUntilBackupSucceeds;
        if clear_queues {
            for volume in &volumes {
                match journal::queue::clear(&volume.intermediate_queue).await {
                    Ok(_) => {
                        if let Some(entry) = summary.volumes.iter_mut().find(|v| v.volume == volume.id) {
                            entry.queue_cleared = true;
                        }
                    }
                    Err(e) => {
                        error!(volume = %volume.id, error = %e, "Failed to clear intermediate queue");
                        summary
                            .failures
                            .push(VolumeFailure::new(volume.id.clone(), Stage::Pipeline, e));
                    }
                }
            }
        }

        self.hooks.run(result.hook()).await;

        info!(
            volumes = summary.volumes.len(),
            failures = summary.failures.len(),
            "Post-backup cleanup complete"
        );
        Ok(summary)
    }

    /// Persist what is left of the volume's record after cleanup
    fn apply_cleanup(
        &self,
        id: &VolumeId,
        report: CleanupReport,
        failures: &mut Vec<VolumeFailure>,
    ) -> VolumeCleanup {
        let volume = VolumeCleanup {
            volume: id.clone(),
            deleted: report.deleted.len(),
            gone: report.gone.len(),
            kept: report.remaining.len(),
            queue_cleared: false,
        };

        let changed = !report.deleted.is_empty() || !report.gone.is_empty();
        if changed {
            if let Err(e) = self.records.set(id, report.remaining) {
                error!(volume = %id, error = %e, "Failed to update snapshot record");
                failures.push(VolumeFailure::new(id.clone(), Stage::Cleanup, e));
            }
        }

        for (_, e) in report.failed {
            failures.push(VolumeFailure::new(id.clone(), Stage::Cleanup, e));
        }

        volume
    }
}
