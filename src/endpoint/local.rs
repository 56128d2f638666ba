//! Local filesystem endpoint using tokio::fs.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::fs;

use super::{
    ContentStream, EndpointOptions, StorageEndpoint, normalize_relative, path_segments,
    run_blocking,
};
use crate::config::ServiceDescriptor;
use crate::error::RelayError;
use crate::model::{DirectoryRecord, FileRecord};
use crate::run_log::RunLog;

/// A directory tree on local disk.
///
/// Listed modification times are truncated to whole seconds, the precision
/// SFTP servers report.
///
/// The cursor starts at the process working directory; `change_directory`
/// moves it to the configured root (absolute, or relative to the working
/// directory).
pub struct LocalEndpoint {
    root: PathBuf,
    cursor: PathBuf,
    options: EndpointOptions,
    verbose: bool,
    log: RunLog,
    opened: bool,
}

impl LocalEndpoint {
    pub fn new(service: &ServiceDescriptor, options: EndpointOptions, log: RunLog) -> Self {
        Self {
            root: PathBuf::from(&service.root_path),
            cursor: PathBuf::from("."),
            options,
            verbose: service.verbose_logging,
            log,
            opened: false,
        }
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.opened {
            Ok(())
        } else {
            Err(RelayError::NotConnected {
                endpoint: self.describe(),
            })
        }
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        path_segments(relative_path).fold(self.cursor.clone(), |acc, s| acc.join(s))
    }

    fn resolve_file(&self, file: &FileRecord) -> PathBuf {
        self.resolve(&file.relative_directory).join(&file.name)
    }

    fn endpoint_error(&self, path: &Path, source: io::Error) -> RelayError {
        RelayError::endpoint(self.describe(), path.display().to_string(), source)
    }
}

#[async_trait]
impl StorageEndpoint for LocalEndpoint {
    fn describe(&self) -> String {
        format!("local disk {}", self.root.display())
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        if !self.opened {
            self.opened = true;
            if self.verbose {
                self.log.info(format!("Opened {}", self.describe()));
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.opened && self.verbose {
            self.log.info(format!("Closed {}", self.describe()));
        }
        self.opened = false;
    }

    async fn change_directory(&mut self, path: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        if self.verbose {
            self.log.info(format!("Changing directory on {} to {path}", self.describe()));
        }
        self.cursor = PathBuf::from(path);
        Ok(())
    }

    async fn list_files(&mut self, relative_path: &str) -> Result<Vec<FileRecord>, RelayError> {
        self.ensure_open()?;
        let dir = self.resolve(relative_path);
        let relative_directory = normalize_relative(relative_path);

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| self.endpoint_error(&dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.endpoint_error(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.options.is_file_excluded(&name) {
                continue;
            }

            let path = entry.path();
            // follows symlinks, so a link to a file lists as that file
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.log
                        .warn(format!("Skipping dangling entry {}", path.display()));
                    continue;
                }
                Err(e) => return Err(self.endpoint_error(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata
                .modified()
                .map_err(|e| self.endpoint_error(&path, e))?;
            files.push(FileRecord::new(
                relative_directory.clone(),
                name,
                metadata.len(),
                DateTime::<Utc>::from(modified).trunc_subsecs(0),
            ));
        }
        Ok(files)
    }

    async fn list_directories(
        &mut self,
        relative_path: &str,
    ) -> Result<Vec<DirectoryRecord>, RelayError> {
        self.ensure_open()?;
        let dir = self.resolve(relative_path);

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| self.endpoint_error(&dir, e))?;

        let mut directories = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.endpoint_error(&dir, e))?
        {
            // symlinked directories are not followed
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| self.endpoint_error(&entry.path(), e))?;
            if file_type.is_dir() {
                directories.push(DirectoryRecord::new(
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        Ok(directories)
    }

    async fn get_content(&mut self, file: &FileRecord) -> Result<ContentStream, RelayError> {
        self.ensure_open()?;
        let path = self.resolve_file(file);
        self.log.info(format!(
            "Getting content of {} ({}kb) from {}",
            path.display(),
            crate::model::format_grouped(file.size as f64 / 1024.0),
            self.describe()
        ));

        let handle = fs::File::open(&path)
            .await
            .map_err(|e| RelayError::transfer(file.logical_path(), e))?;
        Ok(Box::new(handle.into_std().await))
    }

    async fn create_file(
        &mut self,
        file: &FileRecord,
        content: ContentStream,
    ) -> Result<(), RelayError> {
        self.ensure_open()?;
        let path = self.resolve_file(file);
        self.log.info(format!("Creating file {}", path.display()));

        let stamp = self
            .options
            .set_attributes
            .then(|| SystemTime::from(file.last_modified));
        let target_path = path.clone();
        run_blocking(move || {
            let mut content = content;
            let mut target = std::fs::File::create(&target_path)?;
            io::copy(&mut content, &mut target)?;
            if let Some(modified) = stamp {
                target.set_modified(modified)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| RelayError::transfer(file.logical_path(), e))?;

        if self.verbose {
            self.log.info(format!("Created file {}", path.display()));
        }
        Ok(())
    }

    async fn directory_exists(&mut self, relative_path: &str) -> Result<bool, RelayError> {
        self.ensure_open()?;
        let dir = self.resolve(relative_path);
        match fs::metadata(&dir).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.endpoint_error(&dir, e)),
        }
    }

    async fn create_directory(&mut self, relative_path: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        let dir = self.resolve(relative_path);
        if fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }

        self.log.info(format!("Creating directory {}", dir.display()));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| self.endpoint_error(&dir, e))
    }

    async fn delete_file(&mut self, file: &FileRecord) -> Result<(), RelayError> {
        self.ensure_open()?;
        let path = self.resolve_file(file);
        self.log.info(format!("Deleting file {}", path.display()));
        fs::remove_file(&path)
            .await
            .map_err(|e| RelayError::transfer(file.logical_path(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Read;
    use tempfile::TempDir;

    async fn open_at(root: &Path, options: EndpointOptions) -> LocalEndpoint {
        let service = ServiceDescriptor::local(root.to_string_lossy());
        let mut endpoint = LocalEndpoint::new(&service, options, RunLog::new());
        endpoint.open().await.unwrap();
        endpoint
            .change_directory(&service.root_path)
            .await
            .unwrap();
        endpoint
    }

    fn content(bytes: &'static [u8]) -> ContentStream {
        Box::new(io::Cursor::new(bytes))
    }

    #[tokio::test]
    async fn test_operations_fail_before_open() {
        let tmp = TempDir::new().unwrap();
        let service = ServiceDescriptor::local(tmp.path().to_string_lossy());
        let mut endpoint = LocalEndpoint::new(&service, EndpointOptions::default(), RunLog::new());

        let err = endpoint.list_files("").await.unwrap_err();
        assert!(matches!(err, RelayError::NotConnected { .. }));
        let err = endpoint.create_directory("sub").await.unwrap_err();
        assert!(matches!(err, RelayError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_close_is_repeatable() {
        let tmp = TempDir::new().unwrap();
        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        endpoint.close().await;
        endpoint.close().await;
        assert!(endpoint.list_files("").await.is_err());
    }

    #[tokio::test]
    async fn test_list_files_skips_directories_and_excluded_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::write(tmp.path().join("Thumbs.db"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();

        let options = EndpointOptions {
            exclude_files: vec!["thumbs.db".into()],
            set_attributes: false,
        };
        let mut endpoint = open_at(tmp.path(), options).await;

        let files = endpoint.list_files("").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 10);
        assert_eq!(files[0].relative_directory, "");

        let dirs = endpoint.list_directories("").await.unwrap();
        assert_eq!(dirs, vec![DirectoryRecord::new("sub")]);
    }

    #[tokio::test]
    async fn test_list_files_truncates_to_whole_seconds() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"x").unwrap();
        let precise = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        std::fs::File::options()
            .write(true)
            .open(tmp.path().join("a.txt"))
            .unwrap()
            .set_modified(SystemTime::from(precise))
            .unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let files = endpoint.list_files("").await.unwrap();
        assert_eq!(
            files[0].last_modified,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directories_are_not_listed() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("sub/loop")).unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        assert_eq!(
            endpoint.list_directories("").await.unwrap(),
            vec![DirectoryRecord::new("sub")]
        );
        assert!(endpoint.list_directories("sub").await.unwrap().is_empty());
        assert!(endpoint.list_files("sub").await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("broken")).unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let files = endpoint.list_files("").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
    }

    #[tokio::test]
    async fn test_list_files_records_relative_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub/deeper")).unwrap();
        std::fs::write(tmp.path().join("sub/deeper/c.txt"), b"12345").unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let files = endpoint.list_files("sub/deeper").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].logical_path(), "sub/deeper/c.txt");
    }

    #[tokio::test]
    async fn test_create_file_stamps_only_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let stamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = FileRecord::new("", "stamped.txt", 5, stamp);

        let options = EndpointOptions {
            exclude_files: Vec::new(),
            set_attributes: true,
        };
        let mut endpoint = open_at(tmp.path(), options).await;
        endpoint.create_file(&record, content(b"hello")).await.unwrap();
        let listed = endpoint.list_files("").await.unwrap();
        assert_eq!(listed[0].last_modified, stamp);

        let record = FileRecord::new("", "fresh.txt", 5, stamp);
        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        endpoint.create_file(&record, content(b"hello")).await.unwrap();
        let fresh = endpoint
            .list_files("")
            .await
            .unwrap()
            .into_iter()
            .find(|f| f.name == "fresh.txt")
            .unwrap();
        assert!(fresh.last_modified > stamp);
    }

    #[tokio::test]
    async fn test_create_file_truncates_existing_content() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a much longer old body").unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let record = FileRecord::new("", "a.txt", 3, Utc::now());
        endpoint.create_file(&record, content(b"new")).await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_get_content_streams_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"payload").unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let record = endpoint.list_files("").await.unwrap().remove(0);
        let mut stream = endpoint.get_content(&record).await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;

        assert!(!endpoint.directory_exists("sub").await.unwrap());
        endpoint.create_directory("sub").await.unwrap();
        endpoint.create_directory("sub").await.unwrap();
        assert!(endpoint.directory_exists("sub").await.unwrap());
        assert!(endpoint.directory_exists("").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("gone.txt"), b"x").unwrap();

        let mut endpoint = open_at(tmp.path(), EndpointOptions::default()).await;
        let record = endpoint.list_files("").await.unwrap().remove(0);
        endpoint.delete_file(&record).await.unwrap();
        assert!(!tmp.path().join("gone.txt").exists());

        let err = endpoint.delete_file(&record).await.unwrap_err();
        assert!(matches!(err, RelayError::Transfer { .. }));
    }
}
