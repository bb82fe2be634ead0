/// Connection configuration
///
/// `OpenOptions` collects everything `open` needs. Locations given with a
/// `file://` scheme are normalised here, before any engine is built.
use crate::constants::{DEFAULT_LOCATION, FILE_SCHEME, MEMORY_LOCATION};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Database file name, joined onto `location`.
    pub name: String,
    /// Directory holding the database, or `:memory:`.
    pub location: Option<String>,
    /// Encryption key for encryption at rest.
    pub encryption_key: Option<String>,
    /// How long the engine waits on a locked database before giving up.
    pub busy_timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Strip a leading `file://` from `location`, warning when it was present.
    pub(crate) fn normalized(mut self) -> Self {
        if let Some(location) = self.location.take() {
            self.location = Some(strip_file_scheme(&location));
        }
        self
    }

    /// Effective location, falling back to the default directory.
    pub fn effective_location(&self) -> &str {
        self.location.as_deref().unwrap_or(DEFAULT_LOCATION)
    }

    /// Absolute-or-relative path the engine opens for this configuration.
    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(&self.name, self.effective_location())
    }
}

/// Remove the `file://` scheme from a location string.
///
/// Logs a warning when the prefix is found; other strings are returned as-is.
pub fn strip_file_scheme(location: &str) -> String {
    match location.strip_prefix(FILE_SCHEME) {
        Some(stripped) => {
            tracing::warn!(
                location,
                "location has a 'file://' prefix, it is removed automatically"
            );
            stripped.to_string()
        }
        None => location.to_string(),
    }
}

/// Join a database name onto its location. `:memory:` is passed through.
pub fn resolve_db_path(name: &str, location: &str) -> PathBuf {
    if location == MEMORY_LOCATION {
        return PathBuf::from(MEMORY_LOCATION);
    }
    PathBuf::from(location).join(name)
}
