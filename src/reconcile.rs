use crate::{
    error::{IoContext, SyncError, SyncResult},
    manifest::{self, Manifest, ManifestOrigin},
};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub manifest_name: String,
    pub mod_extension: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            manifest_name: manifest::DEFAULT_MANIFEST_NAME.to_string(),
            mod_extension: manifest::DEFAULT_MOD_EXTENSION.to_string(),
        }
    }
}

/// What one reconciliation pass changed in the target folder.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub manifest: Manifest,
    pub synthesized_manifest: bool,
}

/// Loads both manifests and applies the difference to `target_dir`.
pub fn reconcile_dirs(
    target_dir: &Path,
    new_source_dir: &Path,
    options: &ReconcileOptions,
) -> SyncResult<ReconcileReport> {
    ensure_target(target_dir)?;
    ensure_source(new_source_dir)?;

    let old_manifest =
        Manifest::read_optional(&target_dir.join(&options.manifest_name))?.unwrap_or_default();
    let (new_manifest, origin) = Manifest::load_or_synthesize(
        new_source_dir,
        &options.manifest_name,
        &options.mod_extension,
    )?;

    let mut report = reconcile(
        target_dir,
        &old_manifest,
        new_source_dir,
        new_manifest,
        &options.manifest_name,
    )?;
    report.synthesized_manifest = origin == ManifestOrigin::Synthesized;
    Ok(report)
}

/// Removes `old − new` from `target_dir`, copies every available `new`
/// entry from `new_source_dir`, then persists `new` as the manifest.
///
/// Not cancellable: a failure after the first deletion leaves `target_dir`
/// partially updated.
pub fn reconcile(
    target_dir: &Path,
    old_manifest: &Manifest,
    new_source_dir: &Path,
    new_manifest: Manifest,
    manifest_name: &str,
) -> SyncResult<ReconcileReport> {
    ensure_target(target_dir)?;
    ensure_source(new_source_dir)?;

    let mut removed = Vec::new();
    for name in old_manifest.difference(&new_manifest) {
        if !manifest::is_plain_file_name(name) {
            tracing::warn!("ignoring manifest entry that is not a file name: {name:?}");
            continue;
        }
        if remove_if_file(&target_dir.join(name))? {
            tracing::info!("removed {name}");
            removed.push(name.to_string());
        }
    }

    let mut added = Vec::new();
    for name in new_manifest.iter() {
        if !manifest::is_plain_file_name(name) {
            tracing::warn!("ignoring manifest entry that is not a file name: {name:?}");
            continue;
        }
        let source = new_source_dir.join(name);
        if !source.is_file() {
            tracing::debug!("{name} listed in manifest but missing from bundle");
            continue;
        }
        let dest = target_dir.join(name);
        fs::copy(&source, &dest).io_context("copy mod", &dest)?;
        preserve_mtime(&source, &dest);
        tracing::info!("installed {name}");
        added.push(name.to_string());
    }

    new_manifest.write(&target_dir.join(manifest_name))?;

    Ok(ReconcileReport {
        added,
        removed,
        manifest: new_manifest,
        synthesized_manifest: false,
    })
}

pub(crate) fn remove_if_file(path: &Path) -> SyncResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {}
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(SyncError::io("inspect mod", path, err)),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SyncError::io("remove mod", path, err)),
    }
}

pub(crate) fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = set_file_mtime(dest, mtime);
}

fn ensure_target(target_dir: &Path) -> SyncResult<()> {
    if target_dir.is_dir() {
        Ok(())
    } else {
        Err(SyncError::invalid_target(target_dir, "not a directory"))
    }
}

fn ensure_source(new_source_dir: &Path) -> SyncResult<()> {
    let missing = || SyncError::MissingSourceBundle {
        path: PathBuf::from(new_source_dir),
    };
    if !new_source_dir.is_dir() {
        return Err(missing());
    }
    let mut entries = fs::read_dir(new_source_dir).io_context("list bundle", new_source_dir)?;
    if entries.next().is_none() {
        return Err(missing());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = manifest::DEFAULT_MANIFEST_NAME;

    struct Fixture {
        _root: TempDir,
        target: PathBuf,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let target = root.path().join("mods");
        let source = root.path().join("bundle");
        fs::create_dir(&target).unwrap();
        fs::create_dir(&source).unwrap();
        Fixture {
            _root: root,
            target,
            source,
        }
    }

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn manifest_on_disk(dir: &Path) -> Manifest {
        Manifest::read_optional(&dir.join(MANIFEST))
            .unwrap()
            .expect("manifest written")
    }

    #[test]
    fn replaces_removed_mods_and_installs_new_ones() {
        let fx = fixture();
        write(&fx.target, "A.jar", "old a");
        write(&fx.target, "B.jar", "old b");
        write(&fx.target, MANIFEST, "A.jar\nB.jar\n");
        write(&fx.source, "B.jar", "new b");
        write(&fx.source, "C.jar", "new c");
        write(&fx.source, MANIFEST, "B.jar\nC.jar\n");

        let report = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap();

        assert_eq!(report.removed, vec!["A.jar"]);
        assert_eq!(report.added, vec!["B.jar", "C.jar"]);
        assert!(!fx.target.join("A.jar").exists());
        assert_eq!(fs::read_to_string(fx.target.join("B.jar")).unwrap(), "new b");
        assert_eq!(fs::read_to_string(fx.target.join("C.jar")).unwrap(), "new c");
        assert_eq!(manifest_on_disk(&fx.target).names(), vec!["B.jar", "C.jar"]);
        assert!(!report.synthesized_manifest);
    }

    #[test]
    fn second_pass_with_same_bundle_changes_nothing() {
        let fx = fixture();
        write(&fx.source, "B.jar", "b");
        write(&fx.source, MANIFEST, "B.jar\n");
        let options = ReconcileOptions::default();

        reconcile_dirs(&fx.target, &fx.source, &options).unwrap();
        let second = reconcile_dirs(&fx.target, &fx.source, &options).unwrap();

        assert!(second.removed.is_empty());
        assert_eq!(fs::read_to_string(fx.target.join("B.jar")).unwrap(), "b");
        assert_eq!(manifest_on_disk(&fx.target).names(), vec!["B.jar"]);
    }

    #[test]
    fn tolerates_stale_entries_without_files() {
        let fx = fixture();
        write(&fx.target, MANIFEST, "Ghost.jar\nKept.jar\n");
        write(&fx.source, "Kept.jar", "k");
        write(&fx.source, MANIFEST, "Kept.jar\nMissing.jar\n");

        let report = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(report.added, vec!["Kept.jar"]);
        assert_eq!(
            manifest_on_disk(&fx.target).names(),
            vec!["Kept.jar", "Missing.jar"]
        );
    }

    #[test]
    fn leaves_unmanaged_files_alone() {
        let fx = fixture();
        write(&fx.target, "personal.jar", "mine");
        write(&fx.source, "X.jar", "x");

        reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap();
        assert!(fx.target.join("personal.jar").exists());
    }

    #[test]
    fn synthesizes_manifest_when_bundle_has_none() {
        let fx = fixture();
        write(&fx.source, "X.jar", "x");
        write(&fx.source, "Y.jar", "y");
        write(&fx.source, "readme.md", "docs");

        let report = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap();

        assert!(report.synthesized_manifest);
        assert_eq!(report.manifest.names(), vec!["X.jar", "Y.jar"]);
        assert_eq!(manifest_on_disk(&fx.target).names(), vec!["X.jar", "Y.jar"]);
        assert!(!fx.target.join("readme.md").exists());
    }

    #[test]
    fn skips_entries_that_escape_the_folder() {
        let fx = fixture();
        write(&fx.target, MANIFEST, "../outside.jar\n");
        let outside = fx.target.parent().unwrap().join("outside.jar");
        fs::write(&outside, "keep").unwrap();
        write(&fx.source, "X.jar", "x");

        let report = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap();
        assert!(report.removed.is_empty());
        assert!(outside.exists());
    }

    #[test]
    fn missing_target_is_invalid() {
        let fx = fixture();
        write(&fx.source, "X.jar", "x");
        let err = reconcile_dirs(
            &fx.target.join("nope"),
            &fx.source,
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTarget { .. }));
    }

    #[test]
    fn empty_or_missing_bundle_is_rejected() {
        let fx = fixture();
        let err = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::MissingSourceBundle { .. }));

        let err = reconcile_dirs(
            &fx.target,
            &fx.source.join("absent"),
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MissingSourceBundle { .. }));
    }

    #[test]
    fn unreadable_old_manifest_aborts_before_changes() {
        let fx = fixture();
        write(&fx.target, "A.jar", "a");
        fs::write(fx.target.join(MANIFEST), [0xc3, 0x28]).unwrap();
        write(&fx.source, "B.jar", "b");

        let err = reconcile_dirs(&fx.target, &fx.source, &ReconcileOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::ManifestUnreadable { .. }));
        assert!(fx.target.join("A.jar").exists());
        assert!(!fx.target.join("B.jar").exists());
    }
}
