use crate::{
    error::{IoContext, SyncError, SyncResult},
    manifest::{self, Manifest},
    reconcile::{preserve_mtime, remove_if_file, ReconcileOptions},
};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Known client-side-only mods, matched as case-insensitive name fragments.
pub const DEFAULT_CLIENT_FRAGMENTS: &[&str] = &[
    "Xaeros_Minimap",
    "MouseTweaks",
    "appleskin",
    "smoothchunk",
    "VisualWorkbench",
    "EasyAnvils",
    "NaturesCompass",
    "rightclickharvest",
    "LeavesBeGone",
    "oculus",
    "emi",
    "jei",
    "craftingtweaks",
    "guideme",
    "fast-ip-ping",
    "toofast",
    "Patchouli",
];

pub fn default_client_fragments() -> Vec<String> {
    DEFAULT_CLIENT_FRAGMENTS
        .iter()
        .map(|fragment| fragment.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub included: Vec<String>,
    pub excluded: Vec<String>,
}

pub fn is_client_only(name: &str, fragments: &[String]) -> bool {
    let lower = name.to_lowercase();
    fragments
        .iter()
        .map(|fragment| fragment.trim())
        .filter(|fragment| !fragment.is_empty())
        .any(|fragment| lower.contains(&fragment.to_lowercase()))
}

/// Splits `files` into server-eligible and client-only names, keeping the
/// input order in both lists.
pub fn classify<I, S>(files: I, fragments: &[String]) -> Classification
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut classification = Classification::default();
    for file in files {
        let file = file.as_ref();
        if is_client_only(file, fragments) {
            classification.excluded.push(file.to_string());
        } else {
            classification.included.push(file.to_string());
        }
    }
    classification
}

#[derive(Debug, Clone)]
pub struct ServerPrune {
    pub classification: Classification,
    pub manifest: Manifest,
}

/// Deletes client-only mods from an already reconciled folder and rewrites
/// its manifest to the remaining names.
pub fn prune_server(
    target_dir: &Path,
    manifest: &Manifest,
    fragments: &[String],
    manifest_name: &str,
) -> SyncResult<ServerPrune> {
    let classification = classify(manifest.iter(), fragments);
    for name in &classification.excluded {
        if !manifest::is_plain_file_name(name) {
            continue;
        }
        if remove_if_file(&target_dir.join(name))? {
            tracing::info!("removed client-only {name}");
        }
    }

    let server_manifest: Manifest = classification.included.iter().cloned().collect();
    server_manifest.write(&target_dir.join(manifest_name))?;
    Ok(ServerPrune {
        classification,
        manifest: server_manifest,
    })
}

/// Rebuilds `server_dir` from the server-eligible mods in `source_dir`.
pub fn build_server_pack(
    source_dir: &Path,
    server_dir: &Path,
    fragments: &[String],
    options: &ReconcileOptions,
) -> SyncResult<Classification> {
    let candidates = Manifest::synthesize(source_dir, &options.mod_extension)?;
    ensure_disjoint(source_dir, server_dir)?;
    if server_dir.exists() {
        fs::remove_dir_all(server_dir).io_context("clear server folder", server_dir)?;
    }
    fs::create_dir_all(server_dir).io_context("create server folder", server_dir)?;

    let classification = classify(candidates.iter(), fragments);
    for name in &classification.included {
        let source = source_dir.join(name);
        let dest = server_dir.join(name);
        fs::copy(&source, &dest).io_context("copy mod", &dest)?;
        preserve_mtime(&source, &dest);
    }

    let manifest: Manifest = classification.included.iter().cloned().collect();
    manifest.write(&server_dir.join(&options.manifest_name))?;
    tracing::info!(
        "server pack at {} with {} mods ({} client-only skipped)",
        server_dir.display(),
        classification.included.len(),
        classification.excluded.len()
    );
    Ok(classification)
}

/// Errors when either folder contains the other.
fn ensure_disjoint(source_dir: &Path, server_dir: &Path) -> SyncResult<()> {
    let source = fs::canonicalize(source_dir).io_context("resolve mods folder", source_dir)?;
    let server = resolve_lexically(server_dir)?;
    if source.starts_with(&server) || server.starts_with(&source) {
        return Err(SyncError::invalid_target(
            server_dir,
            format!(
                "server folder overlaps the mods folder {}",
                source_dir.display()
            ),
        ));
    }
    Ok(())
}

/// Canonicalizes the longest existing ancestor and re-attaches the rest.
fn resolve_lexically(path: &Path) -> SyncResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .io_context("resolve working dir", path)?
            .join(path)
    };
    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(existing).io_context("resolve server folder", existing)?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
