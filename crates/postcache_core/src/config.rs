//! Store configuration and on-disk locations.
//!
//! # Responsibility
//! - Name the model store and pick its kind at construction time.
//! - Resolve the per-user application-support directory.
//!
//! # Invariants
//! - Model names are validated before any path is derived from them.
//! - File-based store kinds always carry a directory.

use crate::store::StoreKind;
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

static MODEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").expect("valid model name regex"));

const APPLICATION: &str = "postcache";
const PREFERENCES_DIR: &str = "preferences";

/// Default model name for the post list store.
pub const DEFAULT_MODEL: &str = "Model";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidModelName(String),
    /// The platform exposes no per-user data directory.
    NoDataDirectory,
    /// A file-based store kind was configured without a directory.
    MissingDirectory(StoreKind),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidModelName(name) => write!(
                f,
                "invalid model name `{name}`; expected a letter followed by up to 63 of [A-Za-z0-9_-]"
            ),
            Self::NoDataDirectory => write!(f, "no per-user application-support directory"),
            Self::MissingDirectory(kind) => write!(f, "{kind} store requires a directory"),
        }
    }
}

impl Error for ConfigError {}

/// Store coordinator construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    model: String,
    kind: StoreKind,
    directory: Option<PathBuf>,
    auto_merge: bool,
}

impl StoreConfig {
    /// Store of `kind` under an explicit directory.
    pub fn new(
        model: impl Into<String>,
        kind: StoreKind,
        directory: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            model: validate_model(model.into())?,
            kind,
            directory: Some(directory.into()),
            auto_merge: true,
        })
    }

    /// Volatile store without any file.
    pub fn in_memory(model: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            model: validate_model(model.into())?,
            kind: StoreKind::InMemory,
            directory: None,
            auto_merge: true,
        })
    }

    /// Store of `kind` in the platform's per-user application-support directory.
    pub fn application_support(
        model: impl Into<String>,
        kind: StoreKind,
    ) -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("", "", APPLICATION).ok_or(ConfigError::NoDataDirectory)?;
        Self::new(model, kind, dirs.data_dir())
    }

    /// Whether the view scope and view children merge sibling saves.
    pub fn with_auto_merge(mut self, auto_merge: bool) -> Self {
        self.auto_merge = auto_merge;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn auto_merge(&self) -> bool {
        self.auto_merge
    }

    /// `<directory>/<model>.<ext>` for file-based kinds, `None` otherwise.
    pub fn store_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        let Some(extension) = self.kind.file_extension() else {
            return Ok(None);
        };
        let directory = self
            .directory
            .as_ref()
            .ok_or(ConfigError::MissingDirectory(self.kind))?;
        Ok(Some(directory.join(format!("{}.{extension}", self.model))))
    }

    /// Key-value namespace directory used by the flat store.
    pub fn preferences_dir(&self) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|directory| directory.join(PREFERENCES_DIR))
    }
}

fn validate_model(model: String) -> Result<String, ConfigError> {
    if MODEL_NAME_RE.is_match(&model) {
        Ok(model)
    } else {
        Err(ConfigError::InvalidModelName(model))
    }
}
