use crate::{
    archive,
    classify::{self, Classification},
    config::AppConfig,
    error::{IoContext, SyncError, SyncResult},
    fetch,
    manifest::Manifest,
    reconcile,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

const STAGE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Client,
    Server,
}

impl SyncMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "client" => Some(SyncMode::Client),
            "server" => Some(SyncMode::Server),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncMode::Client => "client",
            SyncMode::Server => "server",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BundleSource {
    Remote(String),
    LocalArchive(PathBuf),
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub instance_dir: PathBuf,
    pub source: BundleSource,
    pub mode: SyncMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Downloading,
    Extracting,
    Reconciling,
    Filtering,
    Finalizing,
}

impl SyncStage {
    fn index(self) -> usize {
        match self {
            SyncStage::Downloading => 0,
            SyncStage::Extracting => 1,
            SyncStage::Reconciling => 2,
            SyncStage::Filtering => 3,
            SyncStage::Finalizing => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncStage::Downloading => "Downloading",
            SyncStage::Extracting => "Extracting",
            SyncStage::Reconciling => "Updating mods",
            SyncStage::Filtering => "Removing client-only mods",
            SyncStage::Finalizing => "Finalizing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub stage: SyncStage,
    pub current: u64,
    pub total: Option<u64>,
    pub overall_progress: f32,
    pub detail: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Outcome of one update, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub target_dir: PathBuf,
    pub mode: SyncMode,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub included: Vec<String>,
    pub excluded: Vec<String>,
    pub synthesized_manifest: bool,
    pub manifest_entries: usize,
}

struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last_report: Instant,
    transfer_total: Option<u64>,
}

impl ProgressReporter {
    fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last_report: Instant::now(),
            transfer_total: None,
        }
    }

    fn report(&self, stage: SyncStage, current: u64, total: Option<u64>, detail: Option<String>) {
        let Some(callback) = &self.callback else {
            return;
        };
        let stage_fraction = match total {
            Some(total) if total > 0 => (current.min(total) as f32) / (total as f32),
            _ => 0.0,
        };
        let overall_progress = (stage.index() as f32 + stage_fraction) / STAGE_COUNT as f32;
        callback(SyncProgress {
            stage,
            current,
            total,
            overall_progress: overall_progress.clamp(0.0, 1.0),
            detail,
        });
    }

    fn stage(&self, stage: SyncStage, detail: Option<String>) {
        tracing::info!("{}", stage.label());
        self.report(stage, 0, None, detail);
    }

    fn transfer(&mut self, done: u64, total: Option<u64>) {
        self.transfer_total = total;
        let finished = total.is_some_and(|total| done >= total);
        if finished || self.last_report.elapsed().as_millis() >= 100 {
            self.report(SyncStage::Downloading, done, total, None);
            self.last_report = Instant::now();
        }
    }

    /// Throttled chunks may skip the last one, so the final count is always sent.
    fn finish_transfer(&mut self, done: u64) {
        self.report(SyncStage::Downloading, done, self.transfer_total, None);
        self.last_report = Instant::now();
    }
}

struct StagingGuard {
    path: PathBuf,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Downloads (or opens) the bundle, reconciles the instance's mods folder
/// against it and, in server mode, prunes client-only mods.
pub fn run_update(
    request: &UpdateRequest,
    config: &AppConfig,
    progress: Option<ProgressCallback>,
) -> SyncResult<UpdateReport> {
    let target_dir = resolve_target(&request.instance_dir, &config.mods_folder)?;
    // A damaged manifest fails before the download starts.
    Manifest::read_optional(&target_dir.join(&config.manifest_name))?;

    let staging = make_temp_dir(&std::env::temp_dir(), "update")?;
    let _guard = StagingGuard {
        path: staging.clone(),
    };
    let mut reporter = ProgressReporter::new(progress);

    let archive_path = match &request.source {
        BundleSource::Remote(url) => {
            reporter.stage(SyncStage::Downloading, Some(url.clone()));
            let path = staging.join("bundle.zip");
            let mut on_chunk = |done: u64, total: Option<u64>| reporter.transfer(done, total);
            let done = fetch::fetch(url, &path, &mut on_chunk)?;
            reporter.finish_transfer(done);
            path
        }
        BundleSource::LocalArchive(path) => {
            reporter.stage(SyncStage::Downloading, Some(path.display().to_string()));
            path.clone()
        }
    };

    reporter.stage(SyncStage::Extracting, None);
    let extract_root = staging.join("extract");
    archive::expand(&archive_path, &extract_root)?;
    let source_dir = archive::locate_mods_dir(&extract_root, &config.mods_folder).ok_or_else(
        || SyncError::MissingSourceBundle {
            path: extract_root.join(&config.mods_folder),
        },
    )?;

    reporter.stage(SyncStage::Reconciling, None);
    let report = apply_bundle_dir(&target_dir, &source_dir, request.mode, config, &reporter)?;
    reporter.report(SyncStage::Finalizing, 1, Some(1), None);
    Ok(report)
}

/// Reconciles `target_dir` against an already expanded bundle folder and,
/// in server mode, prunes client-only mods afterwards.
pub fn apply_bundle(
    target_dir: &Path,
    source_dir: &Path,
    mode: SyncMode,
    config: &AppConfig,
) -> SyncResult<UpdateReport> {
    apply_bundle_dir(
        target_dir,
        source_dir,
        mode,
        config,
        &ProgressReporter::new(None),
    )
}

fn apply_bundle_dir(
    target_dir: &Path,
    source_dir: &Path,
    mode: SyncMode,
    config: &AppConfig,
    reporter: &ProgressReporter,
) -> SyncResult<UpdateReport> {
    let options = config.reconcile_options();
    let reconciled = reconcile::reconcile_dirs(target_dir, source_dir, &options)?;

    let mut added = reconciled.added;
    let (classification, manifest) = match mode {
        SyncMode::Client => (
            Classification {
                included: reconciled.manifest.names(),
                excluded: Vec::new(),
            },
            reconciled.manifest,
        ),
        SyncMode::Server => {
            reporter.stage(SyncStage::Filtering, None);
            let pruned = classify::prune_server(
                target_dir,
                &reconciled.manifest,
                &config.client_fragments,
                &options.manifest_name,
            )?;
            added.retain(|name| !pruned.classification.excluded.contains(name));
            (pruned.classification, pruned.manifest)
        }
    };

    reporter.stage(SyncStage::Finalizing, None);
    let report = UpdateReport {
        target_dir: target_dir.to_path_buf(),
        mode,
        added,
        removed: reconciled.removed,
        included: classification.included,
        excluded: classification.excluded,
        synthesized_manifest: reconciled.synthesized_manifest,
        manifest_entries: manifest.len(),
    };
    tracing::info!(
        "update complete: {} installed, {} removed, {} excluded",
        report.added.len(),
        report.removed.len(),
        report.excluded.len()
    );
    Ok(report)
}

fn resolve_target(instance_dir: &Path, mods_folder: &str) -> SyncResult<PathBuf> {
    if !instance_dir.is_dir() {
        return Err(SyncError::invalid_target(
            instance_dir,
            "select a valid instance folder",
        ));
    }
    let target_dir = instance_dir.join(mods_folder);
    if !target_dir.is_dir() {
        return Err(SyncError::invalid_target(
            instance_dir,
            format!("no {mods_folder} folder found"),
        ));
    }
    Ok(target_dir)
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn make_temp_dir(root: &Path, suffix: &str) -> SyncResult<PathBuf> {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_dir = root.join(format!("packsync-{nanos}-{counter}-{suffix}"));
    fs::create_dir_all(&temp_dir).io_context("create temp dir", &temp_dir)?;
    Ok(temp_dir)
}
