// Standard library imports
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// External crate imports
use mws_core::error::{MwsError, Result};
use mws_core::file_system::{FileSystem, OsFileSystem};
use mws_core::secrets::{self, Redactor};
use mws_executor::ExtraOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Span};

/// Construction-time settings of a [`crate::Coordinator`].
#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Directory holding `instances/` and `.multiworkspace/`
    pub root: PathBuf,
    pub file_system: Arc<dyn FileSystem>,
    /// Parent span for every log line; defaults to a `multiworkspace` span
    pub span: Option<Span>,
    pub redactor: Redactor,
    /// Passed through to every child the factory builds
    pub executor_options: ExtraOptions,
}

impl CoordinatorConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_system: Arc::new(OsFileSystem),
            span: None,
            redactor: secrets::passthrough(),
            executor_options: ExtraOptions::new(),
        }
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_executor_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.executor_options.insert(key.into(), value.into());
        self
    }

    pub fn with_executor_options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.executor_options
            .extend(options.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(MwsError::Config("root directory must not be empty".into()));
        }
        Ok(())
    }

    /// The configured span, or a fresh one naming the root.
    pub(crate) fn resolve_span(&self) -> Span {
        self.span
            .clone()
            .unwrap_or_else(|| info_span!("multiworkspace", root = %self.root.display()))
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("root", &self.root)
            .field("file_system", &self.file_system)
            .field("span", &self.span)
            .field("executor_options", &self.executor_options)
            .finish_non_exhaustive()
    }
}

/// File form of [`CoordinatorConfig`].
///
/// ```yaml
/// root: ./state
/// redact_patterns:
///   - "password=\\S+"
/// executor_options:
///   plugin_cache: /var/cache/plugins
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorSettings {
    pub root: PathBuf,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redact_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executor_options: BTreeMap<String, String>,
}

impl CoordinatorSettings {
    /// Load settings from a YAML file. A relative `root` is resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MwsError::filesystem(e, path, "read"))?;
        let mut settings = Self::from_yaml_str(&content).map_err(|e| {
            MwsError::Config(format!("Failed to load {}: {}", path.display(), e))
        })?;

        if settings.root.is_relative() {
            if let Some(parent) = path.parent() {
                settings.root = parent.join(&settings.root);
            }
        }
        Ok(settings)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn into_config(self) -> Result<CoordinatorConfig> {
        let patterns = self
            .redact_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    MwsError::Config(format!("invalid redact pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut config = CoordinatorConfig::new(self.root).with_executor_options(self.executor_options);
        if !patterns.is_empty() {
            config = config.with_redactor(secrets::redact_patterns(patterns));
        }
        config.validate()?;
        Ok(config)
    }
}
