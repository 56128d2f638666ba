//! File-name filter applied to source listings.

use std::fmt;

use glob::Pattern;

use crate::error::RelayError;

/// Pattern that selects which source files take part in a relay.
///
/// `*` matches any run of characters, `?` a single character and `.` is
/// literal. The whole name must match. An empty pattern or `*.*` selects
/// every file, including names without an extension.
#[derive(Debug, Clone)]
pub struct FileNameFilter {
    raw: String,
    pattern: Option<Pattern>,
}

impl FileNameFilter {
    pub const MATCH_ALL: &'static str = "*.*";

    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == Self::MATCH_ALL {
            return Ok(Self {
                raw: raw.to_string(),
                pattern: None,
            });
        }

        let pattern = Pattern::new(trimmed).map_err(|e| {
            RelayError::Configuration(format!("invalid file name filter `{raw}`: {e}"))
        })?;
        Ok(Self {
            raw: raw.to_string(),
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.matches(file_name))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for FileNameFilter {
    fn default() -> Self {
        Self {
            raw: Self::MATCH_ALL.to_string(),
            pattern: None,
        }
    }
}

impl fmt::Display for FileNameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
