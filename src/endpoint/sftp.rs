//! SFTP endpoint backed by libssh2.
//!
//! libssh2 calls block, so every operation runs on tokio's blocking pool and
//! the relay task only awaits its completion. Paths are absolute on the
//! server: the configured root gets a leading `/` if it lacks one.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ssh2::{ErrorCode, FileStat, Session, Sftp};

use super::{
    ContentStream, EndpointOptions, StorageEndpoint, normalize_relative, path_segments,
    run_blocking,
};
use crate::config::ServiceDescriptor;
use crate::error::RelayError;
use crate::model::{DirectoryRecord, FileRecord, format_grouped};
use crate::run_log::RunLog;

/// TCP connect timeout for the SSH session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// libssh2 status codes for a missing file or path.
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

type SharedSession = Arc<Mutex<SftpSession>>;

/// A directory tree on a remote host, reached over SFTP with password auth.
pub struct SftpEndpoint {
    host: String,
    port: u16,
    username: String,
    password: String,
    options: EndpointOptions,
    verbose: bool,
    log: RunLog,
    directory: String,
    session: Option<SharedSession>,
}

impl SftpEndpoint {
    pub fn new(service: &ServiceDescriptor, options: EndpointOptions, log: RunLog) -> Self {
        Self {
            host: service.remote_host().unwrap_or_default().to_string(),
            port: service.port,
            username: service.username.clone(),
            password: service.password.clone(),
            options,
            verbose: service.verbose_logging,
            log,
            directory: "/".to_string(),
            session: None,
        }
    }

    fn session(&self) -> Result<SharedSession, RelayError> {
        self.session.clone().ok_or_else(|| RelayError::NotConnected {
            endpoint: self.describe(),
        })
    }

    /// Absolute server path for a path relative to the current directory.
    fn remote_path(&self, relative_path: &str) -> String {
        let mut path = self.directory.trim_end_matches('/').to_string();
        for segment in path_segments(relative_path) {
            path.push('/');
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    fn file_path(&self, file: &FileRecord) -> String {
        self.remote_path(&file.logical_path())
    }

    fn endpoint_error(&self, path: &str, source: io::Error) -> RelayError {
        RelayError::endpoint(self.describe(), path, source)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileStat)>, RelayError> {
        let session = self.session()?;
        let target = path.to_string();
        let entries = run_blocking(move || {
            let entries = session.lock().sftp.readdir(Path::new(&target))?;
            Ok(entries)
        })
        .await
        .map_err(|e| self.endpoint_error(path, e))?;

        Ok(entries
            .into_iter()
            .filter_map(|(entry, stat)| {
                let name = entry.file_name()?.to_string_lossy().into_owned();
                (name != "." && name != "..").then_some((name, stat))
            })
            .collect())
    }
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH)
    )
}

fn open_session(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> io::Result<SftpSession> {
    let mut last_err = None;
    let mut tcp = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        })
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(username, password)?;
    if !session.authenticated() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "password authentication was rejected",
        ));
    }

    let sftp = session.sftp()?;
    Ok(SftpSession { session, sftp })
}

/// Every directory from the top of an absolute path down to the path itself,
/// e.g. `/in/a/b` yields `/in`, `/in/a`, `/in/a/b`.
fn directory_chain(absolute_path: &str) -> Vec<String> {
    let mut current = String::new();
    path_segments(absolute_path)
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

fn timestamp(stat: &FileStat) -> DateTime<Utc> {
    stat.mtime
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .unwrap_or_default()
}

#[async_trait]
impl StorageEndpoint for SftpEndpoint {
    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        if self.session.is_some() {
            return Ok(());
        }
        if self.verbose {
            self.log
                .info(format!("Opening connection to: {}", self.describe()));
        }

        let (host, port) = (self.host.clone(), self.port);
        let (username, password) = (self.username.clone(), self.password.clone());
        let session = run_blocking(move || open_session(&host, port, &username, &password))
            .await
            .map_err(|e| RelayError::Connection {
                endpoint: self.describe(),
                message: e.to_string(),
            })?;

        self.session = Some(Arc::new(Mutex::new(session)));
        self.log.info(format!("Connected to: {}", self.describe()));
        Ok(())
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.verbose {
            self.log
                .info(format!("Disconnecting from {}", self.describe()));
        }

        let disconnected = run_blocking(move || {
            session
                .lock()
                .session
                .disconnect(None, "relay finished", None)?;
            Ok(())
        })
        .await;
        if let Err(e) = disconnected {
            tracing::debug!(endpoint = %self.describe(), error = %e, "disconnect failed");
        }
        self.log
            .info(format!("Disconnected from {}", self.describe()));
    }

    async fn change_directory(&mut self, path: &str) -> Result<(), RelayError> {
        self.session()?;
        if self.verbose {
            self.log.info(format!(
                "Changing directory on {} to {path}",
                self.describe()
            ));
        }
        let normalized = normalize_relative(path);
        self.directory = format!("/{normalized}");
        Ok(())
    }

    async fn list_files(&mut self, relative_path: &str) -> Result<Vec<FileRecord>, RelayError> {
        let path = self.remote_path(relative_path);
        self.log.info(format!(
            "Getting files from {path} on {}...",
            self.describe()
        ));

        let relative_directory = normalize_relative(relative_path);
        let files = self
            .read_dir(&path)
            .await?
            .into_iter()
            .filter(|(name, stat)| !stat.is_dir() && !self.options.is_file_excluded(name))
            .map(|(name, stat)| {
                FileRecord::new(
                    relative_directory.clone(),
                    name,
                    stat.size.unwrap_or(0),
                    timestamp(&stat),
                )
            })
            .collect();
        Ok(files)
    }

    async fn list_directories(
        &mut self,
        relative_path: &str,
    ) -> Result<Vec<DirectoryRecord>, RelayError> {
        let path = self.remote_path(relative_path);
        self.log.info(format!(
            "Getting directories from {path} on {}...",
            self.describe()
        ));

        Ok(self
            .read_dir(&path)
            .await?
            .into_iter()
            .filter(|(_, stat)| stat.is_dir())
            .map(|(name, _)| DirectoryRecord::new(name))
            .collect())
    }

    async fn get_content(&mut self, file: &FileRecord) -> Result<ContentStream, RelayError> {
        let session = self.session()?;
        let path = self.file_path(file);
        self.log.info(format!(
            "Getting content of {path} ({}kb) from {}",
            format_grouped(file.size as f64 / 1024.0),
            self.describe()
        ));

        let target = path.clone();
        let remote = run_blocking(move || {
            let remote = session.lock().sftp.open(Path::new(&target))?;
            Ok(remote)
        })
        .await
        .map_err(|e| RelayError::transfer(file.logical_path(), e))?;
        Ok(Box::new(remote))
    }

    async fn create_file(
        &mut self,
        file: &FileRecord,
        content: ContentStream,
    ) -> Result<(), RelayError> {
        let session = self.session()?;
        let path = self.file_path(file);
        self.log
            .info(format!("Creating file {path} on {}", self.describe()));

        let stamp = self
            .options
            .set_attributes
            .then(|| file.last_modified.timestamp().max(0) as u64);
        let target = path.clone();
        run_blocking(move || {
            let mut content = content;
            let target = Path::new(&target);

            let mut remote = session.lock().sftp.create(target)?;
            io::copy(&mut content, &mut remote)?;
            drop(remote);

            if let Some(mtime) = stamp {
                let guard = session.lock();
                let current = guard.sftp.stat(target)?;
                guard.sftp.setstat(
                    target,
                    FileStat {
                        size: None,
                        uid: None,
                        gid: None,
                        perm: None,
                        atime: current.atime.or(Some(mtime)),
                        mtime: Some(mtime),
                    },
                )?;
            }
            Ok(())
        })
        .await
        .map_err(|e| RelayError::transfer(file.logical_path(), e))?;

        if self.verbose {
            self.log
                .info(format!("Created file {path} on {}", self.describe()));
        }
        Ok(())
    }

    async fn directory_exists(&mut self, relative_path: &str) -> Result<bool, RelayError> {
        let session = self.session()?;
        let path = self.remote_path(relative_path);

        let target = path.clone();
        run_blocking(move || match session.lock().sftp.stat(Path::new(&target)) {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
        .map_err(|e| self.endpoint_error(&path, e))
    }

    async fn create_directory(&mut self, relative_path: &str) -> Result<(), RelayError> {
        if self.directory_exists(relative_path).await? {
            return Ok(());
        }

        let session = self.session()?;
        let path = self.remote_path(relative_path);
        self.log.info(format!(
            "Creating directory at path {path} on {}...",
            self.describe()
        ));

        let chain = directory_chain(&path);
        run_blocking(move || {
            let guard = session.lock();
            for dir in &chain {
                let dir = Path::new(dir);
                match guard.sftp.stat(dir) {
                    Ok(stat) if stat.is_dir() => {}
                    Ok(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("{} exists and is not a directory", dir.display()),
                        ));
                    }
                    Err(e) if is_missing(&e) => guard.sftp.mkdir(dir, 0o755)?,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| self.endpoint_error(&path, e))
    }

    async fn delete_file(&mut self, file: &FileRecord) -> Result<(), RelayError> {
        let session = self.session()?;
        let path = self.file_path(file);
        self.log.info(format!(
            "Deleting file {path} from {}",
            self.describe()
        ));

        let target = path.clone();
        run_blocking(move || {
            session.lock().sftp.unlink(Path::new(&target))?;
            Ok(())
        })
        .await
        .map_err(|e| RelayError::transfer(file.logical_path(), e))
    }
}

impl Drop for SftpEndpoint {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session
                .lock()
                .session
                .disconnect(None, "relay aborted", None);
        }
    }
}
