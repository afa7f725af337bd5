//! Key=value credential file
//!
//! The file is a dotenv-style list of `KEY=value` lines shared with whatever
//! else the application keeps there. Only the four token keys are rewritten;
//! every other line (client credentials, unrelated settings, comments) is
//! preserved in place.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::token::{ClientCredentials, CredentialRecord};

/// Client id key
pub const CLIENT_ID_KEY: &str = "DK_CLIENT_ID";
/// Client secret key
pub const CLIENT_SECRET_KEY: &str = "DK_CLIENT_SECRET";
/// Refresh token key
pub const REFRESH_TOKEN_KEY: &str = "DK_REFRESH_TOKEN";
/// Access token key
pub const ACCESS_TOKEN_KEY: &str = "DK_ACCESS_TOKEN";
/// Refresh token expiry key
pub const REFRESH_TOKEN_EXPIRY_KEY: &str = "DK_REFRESH_TOKEN_EXPIRY";
/// Access token expiry key
pub const ACCESS_TOKEN_EXPIRY_KEY: &str = "DK_ACCESS_TOKEN_EXPIRY";

const TOKEN_KEYS: [&str; 4] = [
    REFRESH_TOKEN_KEY,
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_EXPIRY_KEY,
    ACCESS_TOKEN_EXPIRY_KEY,
];

/// Errors that can occur during credential file operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error while reading or writing the credential file
    #[error("Storage I/O error on {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The cross-process lock could not be acquired
    #[error("Could not lock {path}: {source}")]
    Lock {
        /// Lock file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable storage for the [`CredentialRecord`]
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sibling lock file
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| "credentials".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Load the token record
    ///
    /// A missing file, missing keys, empty values and unparsable expiries all
    /// load as absent. Expiries written as floats are rounded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file exists but cannot be read.
    pub fn load(&self) -> Result<CredentialRecord, StoreError> {
        let Some(content) = self.read()? else {
            return Ok(CredentialRecord::empty());
        };

        let mut record = CredentialRecord::empty();
        for (key, value) in entries(&content) {
            match key {
                ACCESS_TOKEN_KEY => record.access_token = non_empty(&value),
                REFRESH_TOKEN_KEY => record.refresh_token = non_empty(&value),
                ACCESS_TOKEN_EXPIRY_KEY => record.access_token_expiry = parse_expiry(&value),
                REFRESH_TOKEN_EXPIRY_KEY => record.refresh_token_expiry = parse_expiry(&value),
                _ => {}
            }
        }

        if record.access_token.is_none() {
            record.access_token_expiry = None;
        }
        if record.refresh_token.is_none() {
            record.refresh_token_expiry = None;
        }

        Ok(record)
    }

    /// Load `DK_CLIENT_ID` / `DK_CLIENT_SECRET` from the file, if both are set
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file exists but cannot be read.
    pub fn load_client_credentials(&self) -> Result<Option<ClientCredentials>, StoreError> {
        let Some(content) = self.read()? else {
            return Ok(None);
        };

        let mut id = None;
        let mut secret = None;
        for (key, value) in entries(&content) {
            match key {
                CLIENT_ID_KEY => id = non_empty(&value),
                CLIENT_SECRET_KEY => secret = non_empty(&value),
                _ => {}
            }
        }

        Ok(id.zip(secret).map(|(id, secret)| ClientCredentials::new(id, secret)))
    }

    /// Replace the stored token record
    ///
    /// The file is rewritten through a temporary file and a rename, so a
    /// concurrent or subsequent `load` sees either the old record or the new
    /// one, never a mix.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read or replaced.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let existing = self.read()?.unwrap_or_default();
        let content = render(&existing, record);
        write_atomic(&self.path, content.as_bytes(), true).map_err(|e| StoreError::io(&self.path, e))
    }

    /// Remove stored tokens, keeping client credentials and other settings
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be rewritten.
    pub fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            self.save(&CredentialRecord::empty())?;
        }
        Ok(())
    }

    /// Take the exclusive cross-process lock, blocking until it is free
    ///
    /// The lock is released when the returned guard drops.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Lock` if the lock file cannot be opened or locked.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        let path = self.lock_path();
        let lock_err = |source| StoreError::Lock {
            path: path.clone(),
            source,
        };

        ensure_parent(&path).map_err(lock_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        file.lock().map_err(lock_err)?;

        Ok(StoreLock { file })
    }

    fn read(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

/// Exclusive lock on the credential file, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Write `contents` to `path` via a same-directory temp file and rename.
///
/// `private` restricts permissions to the owner on Unix.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], private: bool) -> std::io::Result<()> {
    let dir = ensure_parent(path)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if private {
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> std::io::Result<&Path> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    Ok(dir)
}

fn render(existing: &str, record: &CredentialRecord) -> String {
    let values: [Option<String>; 4] = [
        record.refresh_token.clone(),
        record.access_token.clone(),
        record
            .refresh_token
            .as_ref()
            .and(record.refresh_token_expiry)
            .map(|v| v.to_string()),
        record
            .access_token
            .as_ref()
            .and(record.access_token_expiry)
            .map(|v| v.to_string()),
    ];
    let mut written = [false; 4];
    let mut out = String::with_capacity(existing.len() + 256);

    for line in existing.lines() {
        let slot = parse_line(line).and_then(|(key, _)| TOKEN_KEYS.iter().position(|k| *k == key));
        match slot {
            Some(idx) => {
                // first occurrence is replaced in place, duplicates are dropped
                if !written[idx] {
                    written[idx] = true;
                    push_entry(&mut out, TOKEN_KEYS[idx], values[idx].as_deref());
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (idx, key) in TOKEN_KEYS.iter().enumerate() {
        if !written[idx] {
            push_entry(&mut out, key, values[idx].as_deref());
        }
    }

    out
}

fn push_entry(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(key);
        out.push('=');
        if needs_quoting(value) {
            quote_into(out, value);
        } else {
            out.push_str(value);
        }
        out.push('\n');
    }
}

/// Values that would not survive a bare `KEY=value` line unchanged
fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '\\' | '#'))
}

fn quote_into(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn entries(content: &str) -> impl Iterator<Item = (&str, Cow<'_, str>)> {
    content.lines().filter_map(parse_line)
}

fn parse_line(line: &str) -> Option<(&str, Cow<'_, str>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), unquote(value.trim())))
}

/// Strip surrounding quotes; double-quoted values also have escapes resolved
fn unquote(value: &str) -> Cow<'_, str> {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return Cow::Borrowed(&value[1..value.len() - 1]);
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return unescape(&value[1..value.len() - 1]);
    }
    Cow::Borrowed(value)
}

fn unescape(inner: &str) -> Cow<'_, str> {
    if !inner.contains('\\') {
        return Cow::Borrowed(inner);
    }
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(escaped @ ('"' | '\\')) => out.push(escaped),
            // unknown escapes are kept literally, e.g. Windows paths
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_expiry(value: &str) -> Option<u64> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let secs: f64 = value.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| secs.round() as u64)
}
