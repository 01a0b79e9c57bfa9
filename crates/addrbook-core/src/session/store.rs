use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::{Identity, Session};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Persisted layout: three independent string-or-null fields.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Serialized `Identity` JSON
    pub user: Option<String>,
}

impl StoredSession {
    pub fn from_session(session: &Session) -> Result<Self> {
        let user = session
            .identity()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize identity")?;
        Ok(Self {
            access_token: Some(session.access_token().to_string()),
            refresh_token: Some(session.refresh_token().to_string()),
            user,
        })
    }

    /// Returns `None` for any record missing a token. An unreadable identity
    /// is dropped but does not invalidate the tokens.
    pub fn into_session(self) -> Option<Session> {
        let identity = self
            .user
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Identity>(raw).ok());
        Session::new(self.access_token?, self.refresh_token?, identity)
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_user", &self.user.is_some())
            .finish()
    }
}

/// Durable holder for the current session.
///
/// Calls are synchronous and must never expose a partially written record.
/// Only `SessionController` writes to a store.
pub trait SessionStore: Send + Sync {
    /// Load whatever is persisted; an empty record when nothing is.
    fn load(&self) -> Result<StoredSession>;

    fn save(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session. Clearing an empty store is a no-op.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File backend
// ============================================================================

/// Stores the session as JSON in the cache directory.
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn write_private(path: &Path, contents: &str) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<StoredSession> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(StoredSession::default());
        }

        let contents = fs::read_to_string(&path).context("Failed to read session file")?;
        if contents.trim().is_empty() {
            return Ok(StoredSession::default());
        }

        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn save(&self, session: &Session) -> Result<()> {
        let record = StoredSession::from_session(session)?;
        let contents = serde_json::to_string_pretty(&record)?;

        fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;

        // Write a sibling file and rename over the old one so readers never
        // see a half-written record.
        let path = self.session_path();
        let tmp_path = path.with_extension("json.tmp");
        Self::write_private(&tmp_path, &contents)?;
        fs::rename(&tmp_path, &path).context("Failed to replace session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring backend
// ============================================================================

/// Stores the whole session record as a single OS keychain secret.
pub struct KeyringSessionStore {
    service: String,
    account: String,
}

impl KeyringSessionStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account).context("Failed to create keyring entry")
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<StoredSession> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                serde_json::from_str(&secret).context("Failed to parse session from keychain")
            }
            Err(keyring::Error::NoEntry) => Ok(StoredSession::default()),
            Err(e) => Err(e).context("Failed to read session from keychain"),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let record = StoredSession::from_session(session)?;
        let secret = serde_json::to_string(&record)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local store. Clones share the same record, which lets tests
/// simulate a restart by building a new controller over a clone.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    record: Arc<Mutex<StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an arbitrary (possibly incomplete) record
    pub fn with_record(record: StoredSession) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
        }
    }

    pub fn snapshot(&self) -> Result<StoredSession> {
        self.load()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoredSession>> {
        self.record
            .lock()
            .map_err(|_| anyhow!("Session store lock poisoned"))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<StoredSession> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        let record = StoredSession::from_session(session)?;
        *self.lock()? = record;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = StoredSession::default();
        Ok(())
    }
}
