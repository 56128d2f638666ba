//! Action hooks notified about relayed files.
//!
//! A destination may name a hook in its `action` setting. The name is looked
//! up in a [`HookRegistry`] once per run, before any file is touched, and an
//! unknown name is a configuration error. The engine calls
//! [`ActionHook::file_relayed`] after every successful copy; the caller
//! invokes [`ActionHook::finished`] once the traversal is over.
//!
//! Built-in hooks:
//!
//! | name            | behaviour                                              |
//! |-----------------|--------------------------------------------------------|
//! | `email-summary` | emails an HTML table of relayed files via sendmail     |
//! | `log-summary`   | writes one line per relayed file to the run log        |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::model::FileComparison;
use crate::run_log::RunLog;

pub mod email;

pub use email::{EmailMessage, EmailSettings, EmailSummaryHook, Notifier, SendmailNotifier};

/// Facts about a completed run handed to [`ActionHook::finished`].
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Config file the run was started with.
    pub config_path: PathBuf,
    /// Number of files relayed.
    pub relayed: usize,
    pub log: RunLog,
}

impl RunContext {
    pub fn new(config_path: impl Into<PathBuf>, relayed: usize, log: RunLog) -> Self {
        Self {
            config_path: config_path.into(),
            relayed,
            log,
        }
    }

    /// Directory holding the config file.
    pub fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Plugin notified once per relayed file and once at the end of a run.
#[async_trait]
pub trait ActionHook: Send {
    /// Called synchronously right after `file` has been relayed.
    fn file_relayed(&mut self, file: &FileComparison);

    /// Called once after the whole tree has been relayed.
    async fn finished(&mut self, context: &RunContext) -> anyhow::Result<()>;
}

type HookFactory = Arc<dyn Fn() -> Box<dyn ActionHook> + Send + Sync>;

/// Maps action names from the configuration to hook constructors.
#[derive(Clone, Default)]
pub struct HookRegistry {
    factories: BTreeMap<String, HookFactory>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the hooks shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(EmailSummaryHook::NAME, || {
            Box::new(EmailSummaryHook::new(Arc::new(SendmailNotifier::default())))
        });
        registry.register(LogSummaryHook::NAME, || Box::new(LogSummaryHook::default()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn ActionHook> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct the hook registered under `name` (case-insensitive).
    pub fn create(&self, name: &str) -> Result<Box<dyn ActionHook>, RelayError> {
        let key = name.trim().to_ascii_lowercase();
        let factory = self.factories.get(&key).ok_or_else(|| {
            RelayError::Configuration(format!(
                "cannot find action `{name}` (known actions: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        Ok(factory())
    }

    /// Construct the hook a destination asks for, if it names one.
    pub fn resolve(&self, action: Option<&str>) -> Result<Option<Box<dyn ActionHook>>, RelayError> {
        action.map(|name| self.create(name)).transpose()
    }
}

/// Writes a line per relayed file, then a total, to the run log.
#[derive(Debug, Default)]
pub struct LogSummaryHook {
    relayed: Vec<FileComparison>,
}

impl LogSummaryHook {
    pub const NAME: &'static str = "log-summary";
}

#[async_trait]
impl ActionHook for LogSummaryHook {
    fn file_relayed(&mut self, file: &FileComparison) {
        self.relayed.push(file.clone());
    }

    async fn finished(&mut self, context: &RunContext) -> anyhow::Result<()> {
        if self.relayed.is_empty() {
            return Ok(());
        }
        for file in &self.relayed {
            let change = match file.kb_increase() {
                s if s.is_empty() => "new".to_string(),
                s => s,
            };
            context.log.info(format!(
                "Relayed {} ({}, modified {})",
                file.source.logical_path(),
                change,
                file.last_modified().format("%Y-%m-%d %H:%M:%S")
            ));
        }
        context
            .log
            .info(format!("{} file/s relayed in total", self.relayed.len()));
        Ok(())
    }
}
