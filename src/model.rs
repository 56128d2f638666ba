//! File and directory records produced by endpoint listings.

use chrono::{DateTime, Utc};

/// A single file as seen by one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Directory relative to the endpoint root, `/`-separated; empty at the root.
    pub relative_directory: String,
    /// Bare file name, never containing a path separator.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        relative_directory: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            relative_directory: relative_directory.into(),
            name: name.into(),
            size,
            last_modified,
        }
    }

    /// Path of the file relative to the endpoint root.
    pub fn logical_path(&self) -> String {
        join_relative(&self.relative_directory, &self.name)
    }

    /// Identity used to pair a source file with its destination counterpart.
    pub fn key(&self) -> FileKey {
        FileKey {
            relative_directory: self.relative_directory.to_lowercase(),
            name: self.name.to_lowercase(),
        }
    }

    /// Whether both records name the same file, ignoring letter case.
    pub fn same_file(&self, other: &FileRecord) -> bool {
        self.key() == other.key()
    }
}

/// Case-folded `(relative_directory, name)` identity of a [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    relative_directory: String,
    name: String,
}

/// A subdirectory entry returned by an endpoint listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name: String,
}

impl DirectoryRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A source file selected for transfer, paired with the destination copy it
/// replaces (if any).
#[derive(Debug, Clone)]
pub struct FileComparison {
    pub source: FileRecord,
    pub destination: Option<FileRecord>,
}

impl FileComparison {
    pub fn new(source: FileRecord, destination: Option<FileRecord>) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.source.name
    }

    pub fn relative_directory(&self) -> &str {
        &self.source.relative_directory
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.source.last_modified
    }

    /// Signed size delta in kilobytes, e.g. `+1.5kb` or `-0.3kb`.
    ///
    /// Computed as destination minus source. Empty when the file is new at
    /// the destination.
    pub fn kb_increase(&self) -> String {
        let Some(destination) = &self.destination else {
            return String::new();
        };

        let increase = (destination.size as f64 - self.source.size as f64) / 1024.0;
        if increase < 0.0 {
            format!("-{}kb", format_grouped(-increase))
        } else {
            format!("+{}kb", format_grouped(increase))
        }
    }
}

/// Join a relative directory and a child name with `/`.
pub fn join_relative(relative_directory: &str, name: &str) -> String {
    if relative_directory.is_empty() {
        name.to_string()
    } else {
        format!("{relative_directory}/{name}")
    }
}

/// Case-insensitive comparison of two entry names.
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Format a non-negative value with one decimal and thousands separators.
pub(crate) fn format_grouped(value: f64) -> String {
    let formatted = format!("{value:.1}");
    let (whole, fraction) = formatted.split_once('.').unwrap_or((&formatted, "0"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{grouped}.{fraction}")
}
