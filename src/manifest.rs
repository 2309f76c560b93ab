use crate::error::{IoContext, SyncError, SyncResult};
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_MANIFEST_NAME: &str = "official_mods.txt";
pub const DEFAULT_MOD_EXTENSION: &str = "jar";

/// Set of filenames a mods folder is expected to contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Returns `None` when the manifest file does not exist. A file that
    /// exists but cannot be read as UTF-8 text is an error.
    pub fn read_optional(path: &Path) -> SyncResult<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(Self::parse(&raw))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SyncError::ManifestUnreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Lists candidate mods directly inside `dir`.
    pub fn synthesize(dir: &Path, extension: &str) -> SyncResult<Self> {
        let mut manifest = Self::new();
        for entry in fs::read_dir(dir).io_context("list mods folder", dir)? {
            let entry = entry.io_context("read mods folder entry", dir)?;
            let file_type = entry
                .file_type()
                .io_context("inspect mods folder entry", &entry.path())?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            if is_candidate_mod(&name, extension) {
                manifest.insert(name);
            }
        }
        Ok(manifest)
    }

    /// Reads `dir/manifest_name`, falling back to a listing of `dir`.
    pub fn load_or_synthesize(
        dir: &Path,
        manifest_name: &str,
        extension: &str,
    ) -> SyncResult<(Self, ManifestOrigin)> {
        let path = dir.join(manifest_name);
        if let Some(manifest) = Self::read_optional(&path)? {
            return Ok((manifest, ManifestOrigin::File));
        }
        tracing::info!(
            "no {manifest_name} in {}; building manifest from folder listing",
            dir.display()
        );
        Ok((Self::synthesize(dir, extension)?, ManifestOrigin::Synthesized))
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for name in &self.entries {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Writes the sorted manifest next to `path` and renames it into place.
    pub fn write(&self, path: &Path) -> SyncResult<()> {
        let temp_path = staging_path(path);
        fs::write(&temp_path, self.to_text()).io_context("write manifest", &temp_path)?;
        if let Err(err) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(SyncError::io("replace manifest", path, err));
        }
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.entries.insert(name.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Names in `self` that are not in `other`, sorted.
    pub fn difference<'a>(&'a self, other: &'a Manifest) -> impl Iterator<Item = &'a str> {
        self.entries.difference(&other.entries).map(String::as_str)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Manifest {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOrigin {
    File,
    Synthesized,
}

pub fn is_candidate_mod(name: &str, extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty() && ext.eq_ignore_ascii_case(extension)
}

/// True when `name` refers to a file directly inside its folder.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_MANIFEST_NAME.to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}
