use crate::error::{IoContext, SyncError, SyncResult};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use walkdir::WalkDir;

const MODS_DIR_SCAN_DEPTH: usize = 3;

/// Extracts a zip bundle into `dest`, returning the number of files written.
pub fn expand(archive_path: &Path, dest: &Path) -> SyncResult<usize> {
    let corrupt = |reason: String| SyncError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(archive_path).io_context("open bundle", archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;
    fs::create_dir_all(dest).io_context("create extract dir", dest)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| corrupt(format!("entry {i}: {err}")))?;
        let Some(out_path) = entry.enclosed_name() else {
            tracing::warn!("skipping unsafe archive entry {:?}", entry.name());
            continue;
        };

        let out_path = dest.join(out_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).io_context("create bundle dir", &out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).io_context("create bundle dir", parent)?;
        }

        let mut out_file = fs::File::create(&out_path).io_context("write bundle entry", &out_path)?;
        io::copy(&mut entry, &mut out_file).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidData {
                corrupt(format!("{}: {err}", entry.name()))
            } else {
                SyncError::io("extract bundle entry", &out_path, err)
            }
        })?;
        drop(out_file);
        if let Some(mtime) = entry.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
        written += 1;
    }

    tracing::info!("extracted {written} files from {}", archive_path.display());
    Ok(written)
}

/// Finds the bundle's mods folder, allowing for a wrapping top-level folder.
pub fn locate_mods_dir(root: &Path, folder_name: &str) -> Option<PathBuf> {
    let direct = root.join(folder_name);
    if direct.is_dir() {
        return Some(direct);
    }

    let mut candidates: Vec<(PathBuf, usize)> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(MODS_DIR_SCAN_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy() == folder_name)
        .map(|entry| (entry.path().to_path_buf(), entry.depth()))
        .collect();
    candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    candidates.into_iter().next().map(|(path, _)| path)
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let datetime = PrimitiveDateTime::new(date, time).assume_utc();
    Some(datetime.unix_timestamp())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_bundle(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                    .unwrap();
                continue;
            }
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn expands_nested_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("mods.zip");
        write_bundle(
            &archive,
            &[("mods/", ""), ("mods/a.jar", "a"), ("mods/official_mods.txt", "a.jar\n")],
        );
        let out = dir.path().join("out");

        let written = expand(&archive, &out).unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(out.join("mods/a.jar")).unwrap(), "a");
    }

    #[test]
    fn garbage_is_a_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("mods.zip");
        fs::write(&archive, b"<html>quota exceeded</html>").unwrap();

        let err = expand(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, SyncError::CorruptArchive { .. }));
    }

    #[test]
    fn locates_mods_folder_under_wrapper() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Pack v2/mods")).unwrap();
        fs::create_dir_all(dir.path().join("Pack v2/config/deep/mods")).unwrap();

        let found = locate_mods_dir(dir.path(), "mods").unwrap();
        assert_eq!(found, dir.path().join("Pack v2/mods"));
        assert!(locate_mods_dir(&dir.path().join("Pack v2/config"), "missing").is_none());
    }
}
