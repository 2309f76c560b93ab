use crate::{
    classify,
    fetch,
    manifest::{DEFAULT_MANIFEST_NAME, DEFAULT_MOD_EXTENSION},
    reconcile::ReconcileOptions,
    update::SyncMode,
};
use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bundle_url: Option<String>,
    #[serde(default)]
    pub drive_file_id: Option<String>,
    #[serde(default = "default_mods_folder")]
    pub mods_folder: String,
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
    #[serde(default = "default_mod_extension")]
    pub mod_extension: String,
    #[serde(default = "classify::default_client_fragments")]
    pub client_fragments: Vec<String>,
    #[serde(default)]
    pub default_mode: SyncMode,
    #[serde(default = "default_server_folder")]
    pub server_folder: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bundle_url: None,
            drive_file_id: None,
            mods_folder: default_mods_folder(),
            manifest_name: default_manifest_name(),
            mod_extension: default_mod_extension(),
            client_fragments: classify::default_client_fragments(),
            default_mode: SyncMode::default(),
            server_folder: default_server_folder(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let path = config_path()?;
        Self::load_or_create_at(&path)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create app data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Resolves the download URL, preferring an explicit `bundle_url`.
    pub fn bundle_source(&self) -> Result<String> {
        if let Some(url) = non_empty(self.bundle_url.as_deref()) {
            return Ok(url.to_string());
        }
        if let Some(id) = non_empty(self.drive_file_id.as_deref()) {
            return Ok(fetch::drive_download_url(id));
        }
        bail!("no bundle configured: set bundle_url or drive_file_id in the config, or pass --url");
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            manifest_name: self.manifest_name.clone(),
            mod_extension: self.mod_extension.clone(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(base_data_dir()?.join("config.json"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn default_mods_folder() -> String {
    "mods".to_string()
}

fn default_manifest_name() -> String {
    DEFAULT_MANIFEST_NAME.to_string()
}

fn default_mod_extension() -> String {
    DEFAULT_MOD_EXTENSION.to_string()
}

fn default_server_folder() -> String {
    "server_mods".to_string()
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("packsync"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_load_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");

        let config = AppConfig::load_or_create_at(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.mods_folder, "mods");
        assert_eq!(config.manifest_name, "official_mods.txt");
        assert!(config.client_fragments.iter().any(|f| f == "jei"));
        assert_eq!(config.default_mode, SyncMode::Client);
    }

    #[test]
    fn partial_config_fills_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"drive_file_id": "abc", "default_mode": "server"}"#).unwrap();

        let config = AppConfig::load_or_create_at(&path).unwrap();

        assert_eq!(config.default_mode, SyncMode::Server);
        assert_eq!(config.mod_extension, "jar");
        assert_eq!(
            config.bundle_source().unwrap(),
            "https://drive.google.com/uc?export=download&id=abc"
        );
    }

    #[test]
    fn explicit_url_wins_and_blank_values_are_ignored() {
        let mut config = AppConfig {
            bundle_url: Some("  ".to_string()),
            ..AppConfig::default()
        };
        assert!(config.bundle_source().is_err());

        config.bundle_url = Some("https://example.com/pack.zip".to_string());
        config.drive_file_id = Some("abc".to_string());
        assert_eq!(config.bundle_source().unwrap(), "https://example.com/pack.zip");
    }
}
