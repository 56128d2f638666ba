pub mod config;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod model;
pub mod relay;
pub mod run_log;

use std::path::Path;

use anyhow::Result;

pub use config::{DestinationDescriptor, RelayConfig, ServiceDescriptor, SourceDescriptor};
pub use error::{ConfigError, RelayError};
pub use hooks::{ActionHook, HookRegistry, RunContext};
pub use model::{DirectoryRecord, FileComparison, FileRecord};
pub use relay::RelayEngine;
pub use run_log::RunLog;

/// Relay one configured job with the built-in hooks.
pub async fn run(config: &RelayConfig, config_path: &Path, log: &RunLog) -> Result<usize> {
    run_with_hooks(config, config_path, log, &HookRegistry::builtin()).await
}

/// Relay one configured job, resolving the destination action in `hooks`.
///
/// The action is resolved before any endpoint is opened, so an unknown name
/// fails the run without touching either side. The hook's `finished` runs
/// only after a successful traversal.
pub async fn run_with_hooks(
    config: &RelayConfig,
    config_path: &Path,
    log: &RunLog,
    hooks: &HookRegistry,
) -> Result<usize> {
    let mut hook = hooks.resolve(config.destination.action.as_deref())?;

    let relayed = {
        let mut engine = RelayEngine::new(&config.source, &config.destination, log.clone())?;
        if let Some(hook) = hook.as_deref_mut() {
            engine = engine.with_hook(hook);
        }
        engine.relay().await?
    };

    if let Some(hook) = hook.as_mut() {
        hook.finished(&RunContext::new(config_path, relayed, log.clone()))
            .await?;
    }

    log.info(format!("Relay finished: {relayed} file/s relayed"));
    Ok(relayed)
}
