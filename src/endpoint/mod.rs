//! Storage endpoints: a rooted directory tree on local disk or an SFTP host.
//!
//! # Architecture
//!
//! - **StorageEndpoint**: the capability set the relay engine works against
//! - **local**: [`LocalEndpoint`], backed by the local filesystem
//! - **sftp**: [`SftpEndpoint`], backed by an SSH session (libssh2)
//!
//! [`connect`] picks the implementation from the descriptor: a configured
//! host means SFTP, anything else is local disk. The returned endpoint is
//! already open and positioned at the descriptor's root.
//!
//! An endpoint owns a single live session and is used by one relay run at a
//! time. Content streams are plain blocking readers; implementations copy
//! them on a blocking worker so that a file is never held in memory whole.

use std::io::Read;

use async_trait::async_trait;

use crate::config::{DestinationDescriptor, ServiceDescriptor, SourceDescriptor};
use crate::error::RelayError;
use crate::model::{DirectoryRecord, FileRecord, names_match};
use crate::run_log::RunLog;

pub mod local;
pub mod sftp;

pub use local::LocalEndpoint;
pub use sftp::SftpEndpoint;

/// Readable file content handed from one endpoint to another.
pub type ContentStream = Box<dyn Read + Send>;

/// Uniform operations over a rooted directory tree.
///
/// Every operation other than `open`/`close` fails with
/// [`RelayError::NotConnected`] until `open` has succeeded. Nothing is
/// retried inside an endpoint.
#[async_trait]
pub trait StorageEndpoint: Send {
    /// Human-readable name used in log lines and errors.
    fn describe(&self) -> String;

    /// Establish the session. Calling it on an open endpoint does nothing.
    async fn open(&mut self) -> Result<(), RelayError>;

    /// Release the session. Safe to call repeatedly; never fails.
    async fn close(&mut self);

    /// Rebase the cursor onto `path`, resolved against the configured root.
    async fn change_directory(&mut self, path: &str) -> Result<(), RelayError>;

    /// Files directly under `relative_path`, minus excluded names.
    async fn list_files(&mut self, relative_path: &str) -> Result<Vec<FileRecord>, RelayError>;

    /// Subdirectories directly under `relative_path`.
    async fn list_directories(
        &mut self,
        relative_path: &str,
    ) -> Result<Vec<DirectoryRecord>, RelayError>;

    /// Open a reader positioned at the start of `file`.
    async fn get_content(&mut self, file: &FileRecord) -> Result<ContentStream, RelayError>;

    /// Write `content` to the logical path of `file`, replacing any existing
    /// file, then stamp its modification time when attribute preservation is on.
    async fn create_file(
        &mut self,
        file: &FileRecord,
        content: ContentStream,
    ) -> Result<(), RelayError>;

    async fn directory_exists(&mut self, relative_path: &str) -> Result<bool, RelayError>;

    /// Create `relative_path`; does nothing if it already exists.
    async fn create_directory(&mut self, relative_path: &str) -> Result<(), RelayError>;

    async fn delete_file(&mut self, file: &FileRecord) -> Result<(), RelayError>;
}

/// Per-role behaviour applied by an endpoint on top of its descriptor.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    /// File names dropped from every listing (case-insensitive).
    pub exclude_files: Vec<String>,
    /// Stamp written files with the source modification time.
    pub set_attributes: bool,
}

impl EndpointOptions {
    pub fn for_source(source: &SourceDescriptor) -> Self {
        Self {
            exclude_files: source.exclude_files.clone(),
            set_attributes: false,
        }
    }

    pub fn for_destination(destination: &DestinationDescriptor) -> Self {
        Self {
            exclude_files: Vec::new(),
            set_attributes: destination.set_attributes,
        }
    }

    pub fn is_file_excluded(&self, name: &str) -> bool {
        self.exclude_files.iter().any(|f| names_match(f, name))
    }
}

/// Build the endpoint a descriptor points at, without opening it.
pub fn create_endpoint(
    service: &ServiceDescriptor,
    options: EndpointOptions,
    log: RunLog,
) -> Box<dyn StorageEndpoint> {
    if service.is_remote() {
        Box::new(SftpEndpoint::new(service, options, log))
    } else {
        Box::new(LocalEndpoint::new(service, options, log))
    }
}

/// Build, open and position an endpoint at its configured root.
pub async fn connect(
    service: &ServiceDescriptor,
    options: EndpointOptions,
    log: RunLog,
) -> Result<Box<dyn StorageEndpoint>, RelayError> {
    let mut endpoint = create_endpoint(service, options, log);
    endpoint.open().await?;

    if !service.root_path.is_empty()
        && let Err(e) = endpoint.change_directory(&service.root_path).await
    {
        endpoint.close().await;
        return Err(e);
    }
    Ok(endpoint)
}

/// Split a `/`-separated relative path into its non-empty segments.
pub(crate) fn path_segments(relative_path: &str) -> impl Iterator<Item = &str> {
    relative_path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
}

/// Canonical `a/b/c` form of a relative path; empty for the root.
pub(crate) fn normalize_relative(relative_path: &str) -> String {
    path_segments(relative_path).collect::<Vec<_>>().join("/")
}

/// Run blocking I/O on the blocking pool and wait for it.
pub(crate) async fn run_blocking<T, F>(f: F) -> std::io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(std::io::Error::other(join_err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_by_host() {
        let local = create_endpoint(
            &ServiceDescriptor::local("/data"),
            EndpointOptions::default(),
            RunLog::new(),
        );
        assert!(local.describe().contains("/data"));

        let remote = create_endpoint(
            &ServiceDescriptor::remote("sftp.example.com", 2222, "in", "relay", "pw"),
            EndpointOptions::default(),
            RunLog::new(),
        );
        assert_eq!(remote.describe(), "sftp.example.com:2222");
    }

    #[test]
    fn test_options_by_role() {
        let mut source = SourceDescriptor::new(ServiceDescriptor::local("/src"));
        source.exclude_files = vec!["Thumbs.db".into()];
        let options = EndpointOptions::for_source(&source);
        assert!(options.is_file_excluded("thumbs.DB"));
        assert!(!options.set_attributes);

        let mut destination = DestinationDescriptor::new(ServiceDescriptor::local("/dst"));
        destination.set_attributes = true;
        let options = EndpointOptions::for_destination(&destination);
        assert!(options.set_attributes);
        assert!(!options.is_file_excluded("Thumbs.db"));
    }

    #[test]
    fn test_path_segments() {
        let segments: Vec<_> = path_segments("a//b/./c/").collect();
        assert_eq!(segments, vec!["a", "b", "c"]);
        assert_eq!(path_segments("").count(), 0);
        assert_eq!(normalize_relative("/sub//deeper/"), "sub/deeper");
        assert_eq!(normalize_relative(""), "");
    }

    #[tokio::test]
    async fn test_connect_local_positions_at_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();

        let service = ServiceDescriptor::local(tmp.path().to_string_lossy());
        let mut endpoint = connect(&service, EndpointOptions::default(), RunLog::new())
            .await
            .unwrap();
        let files = endpoint.list_files("").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        endpoint.close().await;
    }
}
