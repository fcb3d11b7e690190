use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tempfile::NamedTempFile;

pub const SETTINGS_DIRECTORY_NAME: &str = "chirp";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "chirp.sqlite3";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local; everything is gone on exit.
    Memory,
    #[default]
    Sqlite,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub backend: BackendKind,
    /// Overrides the default database location under the data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub theme_mode: ThemePreference,
    #[serde(default = "default_remember_email")]
    pub remember_email: bool,
    #[serde(default)]
    pub last_email: Option<String>,
    /// Accounts registered on connect when missing.
    #[serde(default)]
    pub seed_accounts: Vec<SeedAccount>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_path: None,
            theme_mode: ThemePreference::default(),
            remember_email: default_remember_email(),
            last_email: None,
            seed_accounts: Vec::new(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        let remember_email = self.remember_email;
        self.last_email = self
            .last_email
            .map(|email| email.trim().to_string())
            .filter(|email| remember_email && !email.is_empty());

        self.seed_accounts = self
            .seed_accounts
            .into_iter()
            .filter_map(|mut account| {
                account.email = account.email.trim().to_string();
                if account.email.is_empty() || account.password.is_empty() {
                    None
                } else {
                    Some(account)
                }
            })
            .collect();

        self.database_path = self
            .database_path
            .filter(|path| !path.as_os_str().is_empty());

        self
    }

    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Login-form prefill, if the user opted into remembering it.
    pub fn prefill_email(&self) -> Option<&str> {
        if self.remember_email {
            self.last_email.as_deref()
        } else {
            None
        }
    }
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".chirp"))
        .join(DATABASE_FILE_NAME)
}

/// Settings shared across the app; readers see a consistent snapshot while a
/// save replaces the file underneath them.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chirp"))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = read_settings(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Saves first; the in-memory copy only changes once the file did.
    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let settings = settings.normalized();
        write_settings(&self.config_path, &settings)?;
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    /// Stores `email` as the login prefill. No-op when remembering is off or
    /// the value is unchanged.
    pub fn remember_email(&self, email: &str) -> Result<(), SettingsError> {
        let current = self.settings();
        let email = email.trim();
        if !current.remember_email || current.last_email.as_deref() == Some(email) {
            return Ok(());
        }

        let mut next = (*current).clone();
        next.last_email = Some(email.to_string());
        self.update(next)
    }
}

/// Missing or unreadable files fall back to defaults; missing keys take
/// their default values.
fn read_settings(path: &Path) -> ClientSettings {
    if !path.exists() {
        tracing::info!(path = %path.display(), "settings file not found, using defaults");
        return ClientSettings::default();
    }

    Figment::from(Serialized::defaults(ClientSettings::default()))
        .merge(Json::file(path))
        .extract::<ClientSettings>()
        .map(ClientSettings::normalized)
        .unwrap_or_else(|error| {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse settings, using defaults"
            );
            ClientSettings::default()
        })
}

/// Stages the JSON next to `path`, then swaps it in.
fn write_settings(path: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory).context(CreateDirSnafu {
        stage: "settings-create-directory",
        path: directory,
    })?;

    let mut staged = NamedTempFile::new_in(directory).context(StageFileSnafu {
        stage: "settings-stage-file",
        path: directory,
    })?;
    serde_json::to_writer_pretty(&mut staged, settings).context(SerializeConfigSnafu {
        stage: "settings-serialize-json",
    })?;
    staged
        .persist(path)
        .map_err(|error| error.error)
        .context(ReplaceFileSnafu {
            stage: "settings-replace-file",
            path,
        })?;

    tracing::info!(path = %path.display(), "saved settings");
    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to stage settings in {path:?} on `{stage}`: {source}"))]
    StageFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace settings file at {path:?} on `{stage}`: {source}"))]
    ReplaceFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_remember_email() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let directory = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(directory.path().join(SETTINGS_FILE_NAME));
        assert_eq!(*store.settings(), ClientSettings::default());
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "backend": "memory", "seed_accounts": [{ "email": " ada@example.com ", "password": "secret1" }] }"#,
        )
        .expect("write settings");

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.backend, BackendKind::Memory);
        assert_eq!(settings.theme_mode, ThemePreference::Light);
        assert!(settings.remember_email);
        assert_eq!(settings.seed_accounts[0].email, "ada@example.com");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write settings");
        assert_eq!(*SettingsStore::new(path).settings(), ClientSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        let settings = ClientSettings {
            theme_mode: ThemePreference::Dark,
            ..ClientSettings::default()
        };
        store.update(settings).expect("update");
        store.remember_email(" lin@example.com ").expect("remember");

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.theme_mode, ThemePreference::Dark);
        assert_eq!(reloaded.prefill_email(), Some("lin@example.com"));
    }

    #[test]
    fn save_leaves_no_staging_files_behind() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());
        store.update(ClientSettings::default()).expect("first save");
        store
            .update(ClientSettings {
                backend: BackendKind::Memory,
                ..ClientSettings::default()
            })
            .expect("second save");

        let entries = std::fs::read_dir(directory.path())
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
        assert_eq!(SettingsStore::new(path).settings().backend, BackendKind::Memory);
    }

    #[test]
    fn remembered_email_is_dropped_when_opted_out() {
        let settings = ClientSettings {
            remember_email: false,
            last_email: Some("lin@example.com".to_string()),
            ..ClientSettings::default()
        }
        .normalized();
        assert_eq!(settings.last_email, None);
        assert_eq!(settings.prefill_email(), None);
    }
}
