use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An authenticated `SoftPLC` cookie for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub cookie: String,
}

/// Per-host state shared by every client talking to that host.
#[derive(Debug, Default)]
pub(crate) struct HostSession {
    /// Held for the whole login so only one renewal is in flight.
    pub auth_lock: tokio::sync::Mutex<()>,
    current: RwLock<Option<Session>>,
}

impl HostSession {
    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Serialize, Deserialize)]
struct CachedCookie {
    #[serde(rename = "SoftPLC")]
    soft_plc: String,
}

/// Cookie files kept across process restarts, one per host.
#[derive(Debug, Clone)]
pub(crate) struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, host: &str) -> PathBuf {
        let safe: String = host
            .chars()
            .map(|c| if c == '.' || c == ':' { '_' } else { c })
            .collect();
        self.dir.join(format!(".xcc_session_{safe}.json"))
    }

    pub fn load(&self, host: &str) -> Option<String> {
        let path = self.path_for(host);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CachedCookie>(&raw) {
            Ok(cached) if !cached.soft_plc.is_empty() => Some(cached.soft_plc),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable session cache: {e}");
                None
            }
        }
    }

    pub fn store(&self, host: &str, cookie: &str) -> crate::Result<()> {
        let path = self.path_for(host);
        let body = serde_json::to_string(&CachedCookie {
            soft_plc: cookie.to_string(),
        })?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), "saved session cookie");
        Ok(())
    }

    pub fn remove(&self, host: &str) {
        let _ = std::fs::remove_file(self.path_for(host));
    }
}

/// Owns the per-host session table. Share one instance (behind an `Arc`)
/// between all clients that talk to the same controller so re-authentication
/// is serialized.
#[derive(Debug, Default)]
pub struct SessionManager {
    hosts: Mutex<HashMap<String, Arc<HostSession>>>,
    cache: Option<SessionCache>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist cookies as `.xcc_session_<host>.json` files under `dir`.
    pub fn with_cache_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            cache: Some(SessionCache::new(dir.as_ref())),
        }
    }

    pub(crate) fn host(&self, host: &str) -> Arc<HostSession> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts.entry(host.to_string()).or_default().clone()
    }

    pub(crate) fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    /// Current cookie for `host`, if one has been established.
    pub fn session(&self, host: &str) -> Option<Session> {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts.get(host).and_then(|h| h.current())
    }

    /// Forget the in-memory and cached session for `host`.
    pub fn invalidate(&self, host: &str) {
        self.host(host).clear();
        if let Some(cache) = &self.cache {
            cache.remove(host);
        }
    }

    /// Drops every in-memory session. Host entries (and their auth locks)
    /// stay so clients built before and after keep sharing one lock.
    /// Cached cookie files are kept.
    pub fn shutdown(&self) {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        for host in hosts.values() {
            host.clear();
        }
    }
}
