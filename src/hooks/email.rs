//! Email notifications: the `email-summary` hook and run error reports.
//!
//! Settings live next to the relay config, in a sidecar named after it:
//! `jobs/daily.toml` (or `jobs/daily.dev.toml`) reads `jobs/daily.email.toml`.
//!
//! ```toml
//! from = "relay@example.com"
//! to = "ops@example.com; audit@example.com"
//! subject = "Daily files relayed"
//! ```
//!
//! Delivery is delegated to a [`Notifier`]. The stock [`SendmailNotifier`]
//! hands the message to a sendmail-compatible binary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{ActionHook, RunContext};
use crate::model::FileComparison;
use crate::run_log::RunLog;

/// Binary used when `SENDMAIL` is not set.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

fn default_subject() -> String {
    "SFTP files relayed".to_string()
}

fn default_error_subject() -> String {
    "SFTP relay failed".to_string()
}

/// Email settings read from the `.email.toml` sidecar of a relay config.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    pub from: String,
    /// Recipients separated by `;` or `,`.
    pub to: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_error_subject")]
    pub error_subject: String,
}

impl EmailSettings {
    /// Sidecar path for a config file, ignoring a `.dev` marker in its name.
    pub fn path_for(config_path: &Path) -> PathBuf {
        let file_name = config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sidecar = Path::new(&remove_dev_marker(&file_name)).with_extension("email.toml");
        config_path.with_file_name(sidecar)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading email settings {}", path.display()))?;
        let settings: EmailSettings = toml::from_str(&content)
            .with_context(|| format!("parsing email settings {}", path.display()))?;
        if settings.recipients().is_empty() {
            bail!("email settings {} name no recipients", path.display());
        }
        Ok(settings)
    }

    /// Settings for `config_path`, or `None` when no sidecar exists.
    pub fn load_optional(config_path: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(config_path);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    pub fn recipients(&self) -> Vec<String> {
        self.to
            .split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

fn remove_dev_marker(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    let mut result = String::with_capacity(file_name.len());
    let mut rest = 0;
    while let Some(found) = lower[rest..].find(".dev") {
        result.push_str(&file_name[rest..rest + found]);
        rest += found + ".dev".len();
    }
    result.push_str(&file_name[rest..]);
    result
}

/// A composed HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

impl EmailMessage {
    /// Render as an RFC 5322 message suitable for `sendmail -t`.
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "From: {}", self.from);
        let _ = writeln!(out, "To: {}", self.to.join(", "));
        let _ = writeln!(out, "Subject: {}", self.subject);
        let _ = writeln!(out, "Date: {}", Local::now().to_rfc2822());
        let _ = writeln!(out, "MIME-Version: 1.0");
        let _ = writeln!(out, "Content-Type: text/html; charset=utf-8");
        out.push('\n');
        out.push_str(&self.html_body);
        out
    }
}

/// Delivers composed messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Pipes messages into a sendmail-compatible binary (`sendmail -t -i`).
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: PathBuf,
}

impl SendmailNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SendmailNotifier {
    /// Uses `$SENDMAIL`, falling back to [`DEFAULT_SENDMAIL`].
    fn default() -> Self {
        Self::new(std::env::var_os("SENDMAIL").map_or_else(|| PathBuf::from(DEFAULT_SENDMAIL), PathBuf::from))
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.to_rfc5322().as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        tracing::info!(to = %message.to.join(", "), subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Collects relayed files and emails a summary table when the run finishes.
pub struct EmailSummaryHook {
    notifier: Arc<dyn Notifier>,
    relayed: Vec<FileComparison>,
}

impl EmailSummaryHook {
    pub const NAME: &'static str = "email-summary";

    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            relayed: Vec::new(),
        }
    }

    pub fn relayed(&self) -> &[FileComparison] {
        &self.relayed
    }
}

#[async_trait]
impl ActionHook for EmailSummaryHook {
    fn file_relayed(&mut self, file: &FileComparison) {
        self.relayed.push(file.clone());
    }

    async fn finished(&mut self, context: &RunContext) -> Result<()> {
        if self.relayed.is_empty() {
            return Ok(());
        }

        let settings = EmailSettings::load(&EmailSettings::path_for(&context.config_path))?;
        let message = EmailMessage {
            from: settings.from.clone(),
            to: settings.recipients(),
            subject: settings.subject.clone(),
            html_body: summary_body(&self.relayed),
        };
        self.notifier
            .send(&message)
            .await
            .context("sending relay summary email")
    }
}

fn summary_body(relayed: &[FileComparison]) -> String {
    let mut html = String::from("<body>\n");
    let _ = writeln!(html, "<h3>{} file/s relayed</h3>", relayed.len());
    html.push_str("<table>\n<tr><th>File</th><th>Directory</th><th>Modified (UTC)</th><th>Size change</th></tr>\n");
    for file in relayed {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(file.file_name()),
            escape_html(file.relative_directory()),
            file.last_modified().format("%Y-%m-%d %H:%M:%S"),
            escape_html(&file.kb_increase()),
        );
    }
    html.push_str("</table>\n</body>");
    html
}

/// Compose the report sent when a run fails: each error as a heading, then
/// the full run transcript.
pub fn error_report(settings: &EmailSettings, log: &RunLog) -> EmailMessage {
    let mut html = String::from("<body>\n");
    for error in log.errors() {
        let _ = writeln!(html, "<h3>{}</h3>", escape_html(&error));
    }
    html.push_str("<hr />\n<pre>\n");
    html.push_str(&escape_html(&log.transcript()));
    html.push_str("</pre>\n<hr />\n");

    let host = machine_name();
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let _ = writeln!(
        html,
        "{} on {} @ {}",
        Local::now().format("%d/%m/%Y %H:%M:%S"),
        escape_html(&host),
        escape_html(&cwd)
    );
    html.push_str("</body>");

    EmailMessage {
        from: settings.from.clone(),
        to: settings.recipients(),
        subject: settings.error_subject.clone(),
        html_body: html,
    }
}

/// Send an error report for a failed run if the config has email settings
/// and the log holds errors. Returns whether a report went out.
pub async fn send_error_report(
    config_path: &Path,
    log: &RunLog,
    notifier: &dyn Notifier,
) -> Result<bool> {
    if !log.has_errors() {
        return Ok(false);
    }
    let Some(settings) = EmailSettings::load_optional(config_path)? else {
        return Ok(false);
    };
    notifier.send(&error_report(&settings, log)).await?;
    Ok(true)
}

fn machine_name() -> String {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    if name.is_empty() {
        "unknown host".to_string()
    } else {
        name
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
