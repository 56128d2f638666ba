use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::FileNameFilter;
use crate::config::{DestinationDescriptor, SourceDescriptor};
use crate::endpoint::{self, EndpointOptions, StorageEndpoint};
use crate::error::RelayError;
use crate::hooks::ActionHook;
use crate::model::{DirectoryRecord, FileComparison, FileKey, FileRecord, join_relative};
use crate::run_log::RunLog;

type RelayFuture<'a> = Pin<Box<dyn Future<Output = Result<usize, RelayError>> + Send + 'a>>;

/// Whether `source` must replace `destination`.
///
/// With attribute preservation the destination carries the source's
/// timestamp, so any difference in size or time counts. Without it the
/// destination time is the write time, and only a strictly newer source (or
/// a different size) triggers a copy.
pub fn file_has_changed(source: &FileRecord, destination: &FileRecord, preserve_attributes: bool) -> bool {
    if destination.size != source.size {
        return true;
    }
    if preserve_attributes {
        source.last_modified != destination.last_modified
    } else {
        source.last_modified > destination.last_modified
    }
}

/// Relays files from a source descriptor to a destination descriptor.
///
/// Descriptors are borrowed for the duration of the run and never modified.
/// The optional hook is told about every file as soon as it has been relayed;
/// calling [`ActionHook::finished`] is left to the caller.
pub struct RelayEngine<'a> {
    source: &'a SourceDescriptor,
    destination: &'a DestinationDescriptor,
    filter: FileNameFilter,
    hook: Option<&'a mut dyn ActionHook>,
    log: RunLog,
}

impl<'a> RelayEngine<'a> {
    /// Create an engine, rejecting a malformed file-name filter up front.
    pub fn new(
        source: &'a SourceDescriptor,
        destination: &'a DestinationDescriptor,
        log: RunLog,
    ) -> Result<Self, RelayError> {
        let filter = FileNameFilter::parse(&source.file_name_filter)?;
        Ok(Self {
            source,
            destination,
            filter,
            hook: None,
            log,
        })
    }

    pub fn with_hook(mut self, hook: &'a mut dyn ActionHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Open both endpoints, relay the whole tree, and close them again.
    ///
    /// Endpoints are closed on every exit path. Returns the number of files
    /// relayed.
    pub async fn relay(&mut self) -> Result<usize, RelayError> {
        let mut source = endpoint::connect(
            &self.source.service,
            EndpointOptions::for_source(self.source),
            self.log.clone(),
        )
        .await?;

        let mut destination = match endpoint::connect(
            &self.destination.service,
            EndpointOptions::for_destination(self.destination),
            self.log.clone(),
        )
        .await
        {
            Ok(destination) => destination,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };

        let result = self
            .relay_between(source.as_mut(), destination.as_mut())
            .await;

        destination.close().await;
        source.close().await;
        result
    }

    /// Relay the tree between two endpoints that are already open and
    /// positioned at their roots.
    pub async fn relay_between(
        &mut self,
        source: &mut dyn StorageEndpoint,
        destination: &mut dyn StorageEndpoint,
    ) -> Result<usize, RelayError> {
        let relayed = self.relay_directory(source, destination, String::new()).await?;
        tracing::info!(
            source = %source.describe(),
            destination = %destination.describe(),
            relayed,
            "relay completed"
        );
        Ok(relayed)
    }

    /// Children first, then the files of `relative_path` itself.
    fn relay_directory<'s>(
        &'s mut self,
        source: &'s mut dyn StorageEndpoint,
        destination: &'s mut dyn StorageEndpoint,
        relative_path: String,
    ) -> RelayFuture<'s> {
        Box::pin(async move {
            let mut relayed = 0;

            if self.source.recurse_subdirectories {
                let directories: Vec<DirectoryRecord> = source
                    .list_directories(&relative_path)
                    .await?
                    .into_iter()
                    .filter(|d| !self.is_excluded(d))
                    .collect();

                for directory in directories {
                    let sub_path = join_relative(&relative_path, &directory.name);
                    relayed += self
                        .relay_directory(&mut *source, &mut *destination, sub_path)
                        .await?;
                }

                // also materialises source directories with nothing to copy
                if !destination.directory_exists(&relative_path).await? {
                    destination.create_directory(&relative_path).await?;
                }
            }

            relayed += self.relay_files(source, destination, &relative_path).await?;
            Ok(relayed)
        })
    }

    fn is_excluded(&self, directory: &DirectoryRecord) -> bool {
        directory.name == "."
            || directory.name == ".."
            || self.source.is_directory_excluded(&directory.name)
    }

    async fn relay_files(
        &mut self,
        source: &mut dyn StorageEndpoint,
        destination: &mut dyn StorageEndpoint,
        relative_path: &str,
    ) -> Result<usize, RelayError> {
        let source_files = source.list_files(relative_path).await?;
        let destination_files = destination.list_files(relative_path).await?;

        let source_file_count = source_files.len();
        let matching: Vec<FileRecord> = source_files
            .into_iter()
            .filter(|f| self.filter.matches(&f.name))
            .collect();
        let matching_count = matching.len();

        let to_relay = self.plan_transfers(matching, destination_files);

        let mut relayed = 0;
        for comparison in &to_relay {
            self.relay_file(comparison, source, destination).await?;
            relayed += 1;
        }

        self.log.info(format!(
            "Relayed {relayed} of {source_file_count} file/s of which {matching_count} matched the given filter `{}` in `{relative_path}`",
            self.filter
        ));
        Ok(relayed)
    }

    /// Pair each source file with its destination counterpart and keep the
    /// ones that need copying, in source listing order.
    fn plan_transfers(
        &self,
        source_files: Vec<FileRecord>,
        destination_files: Vec<FileRecord>,
    ) -> Vec<FileComparison> {
        let mut by_identity: HashMap<FileKey, FileRecord> =
            HashMap::with_capacity(destination_files.len());
        for file in destination_files {
            by_identity.entry(file.key()).or_insert(file);
        }

        let preserve = self.destination.set_attributes;
        source_files
            .into_iter()
            .filter_map(|source| match by_identity.get(&source.key()) {
                None => Some(FileComparison::new(source, None)),
                Some(existing) if file_has_changed(&source, existing, preserve) => {
                    Some(FileComparison::new(source, Some(existing.clone())))
                }
                Some(_) => None,
            })
            .collect()
    }

    async fn relay_file(
        &mut self,
        comparison: &FileComparison,
        source: &mut dyn StorageEndpoint,
        destination: &mut dyn StorageEndpoint,
    ) -> Result<(), RelayError> {
        let content = source.get_content(&comparison.source).await?;
        destination.create_file(&comparison.source, content).await?;

        if self.source.move_files {
            source.delete_file(&comparison.source).await?;
        }

        if let Some(hook) = self.hook.as_deref_mut() {
            hook.file_relayed(comparison);
        }
        Ok(())
    }
}
