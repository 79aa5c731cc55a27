use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{
    ClientConfig, DEFAULT_ENTITY_PREFIX, DEFAULT_PASSWORD, DEFAULT_REQUEST_DELAY_MS,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USERNAME,
};
use crate::descriptor::{self, DescriptorMap};
use crate::diff::diff_entities;
use crate::discovery::PageSet;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::reconcile::{snapshot_of, Reconciler};
use crate::session::{HostSession, SessionManager};
use crate::types::*;
use crate::{data, Error, Result};

const DEFAULT_LOGIN_BACKOFF: Duration = Duration::from_secs(2);

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&EntityMap) + Send + Sync>;

/// Where a prop was last seen, so writes can target the right page.
#[derive(Debug, Clone)]
pub(crate) struct PropLocation {
    pub page: String,
    pub internal_name: Option<String>,
}

pub struct XccClientBuilder {
    host: String,
    protocol: String,
    username: String,
    password: String,
    language: Language,
    timeout: Duration,
    request_delay: Duration,
    login_backoff: Duration,
    entity_prefix: String,
    ignore_visibility: bool,
    pages: Option<PageSet>,
    session_manager: Option<Arc<SessionManager>>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl XccClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol: "http".to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            language: Language::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            login_backoff: DEFAULT_LOGIN_BACKOFF,
            entity_prefix: DEFAULT_ENTITY_PREFIX.to_string(),
            ignore_visibility: false,
            pages: None,
            session_manager: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut builder = Self::new(config.host.clone())
            .credentials(config.username.clone(), config.password.clone())
            .language(config.language)
            .timeout(Duration::from_secs(config.timeout_secs))
            .request_delay(Duration::from_millis(config.request_delay_ms))
            .entity_prefix(config.entity_prefix.clone())
            .ignore_visibility(config.ignore_visibility);
        if !config.descriptor_pages.is_empty() && !config.data_pages.is_empty() {
            builder = builder.pages(PageSet {
                descriptor_pages: config.descriptor_pages.clone(),
                data_pages: config.data_pages.clone(),
            });
        }
        if let Some(dir) = &config.session_cache_dir {
            builder = builder.session_manager(Arc::new(SessionManager::with_cache_dir(dir)));
        }
        builder
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause between consecutive page requests.
    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// First wait after a connection-limit refusal; doubles on each retry.
    pub fn login_backoff(mut self, delay: Duration) -> Self {
        self.login_backoff = delay;
        self
    }

    pub fn entity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entity_prefix = prefix.into();
        self
    }

    pub fn ignore_visibility(mut self, ignore: bool) -> Self {
        self.ignore_visibility = ignore;
        self
    }

    /// Use a fixed page set instead of discovering one.
    pub fn pages(mut self, pages: PageSet) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn session_manager(mut self, manager: Arc<SessionManager>) -> Self {
        self.session_manager = Some(manager);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&EntityMap) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<XccClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        let sessions = self
            .session_manager
            .unwrap_or_else(|| Arc::new(SessionManager::new()));
        let host_session = sessions.host(&self.host);

        Ok(XccClient {
            http,
            base_url: format!("{}://{}", self.protocol, self.host),
            host: self.host,
            username: self.username,
            password: self.password,
            sessions,
            host_session,
            request_delay: self.request_delay,
            login_backoff: self.login_backoff,
            reconciler: Reconciler {
                language: self.language,
                prefix: self.entity_prefix,
                ignore_visibility: self.ignore_visibility,
            },
            fixed_pages: self.pages,
            pages: None,
            descriptors: None,
            locations: HashMap::new(),
            entities: EntityMap::new(),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        })
    }
}

pub struct XccClient {
    pub(crate) http: reqwest::Client,
    base_url: String,
    pub(crate) host: String,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) host_session: Arc<HostSession>,
    pub(crate) request_delay: Duration,
    pub(crate) login_backoff: Duration,
    reconciler: Reconciler,
    fixed_pages: Option<PageSet>,
    pages: Option<PageSet>,
    descriptors: Option<DescriptorMap>,
    pub(crate) locations: HashMap<String, PropLocation>,
    entities: EntityMap,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<Mutex<MessageLogger>>,
}

impl XccClient {
    pub fn builder(host: impl Into<String>) -> XccClientBuilder {
        XccClientBuilder::new(host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Entities from the last successful refresh, keyed by entity id.
    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_by_prop(&self, prop: &str) -> Option<&Entity> {
        self.entities.values().find(|e| e.prop.eq_ignore_ascii_case(prop))
    }

    pub fn descriptors(&self) -> Option<&DescriptorMap> {
        self.descriptors.as_ref()
    }

    pub fn pages(&self) -> Option<&PageSet> {
        self.pages.as_ref()
    }

    /// Forget the discovered pages and parsed descriptors; the next refresh
    /// loads both again.
    pub fn reset_discovery(&mut self) {
        self.pages = None;
        self.descriptors = None;
        self.locations.clear();
    }

    /// One update cycle: discover pages once, load descriptors once, then
    /// fetch every data page and rebuild the entity map.
    ///
    /// On failure the previous entity map is left untouched.
    pub async fn refresh(&mut self) -> Result<&EntityMap> {
        let pages = self.ensure_pages().await?;

        if self.descriptors.is_none() {
            self.load_descriptors(&pages.descriptor_pages).await?;
        }

        let fetched = self.fetch_pages(&pages.data_pages).await?;
        if fetched.pages.is_empty() {
            warn!(
                failed = fetched.failed.len(),
                "no data page could be fetched, keeping previous entities"
            );
            return Err(Error::NoData);
        }

        let mut raw = Vec::new();
        for (page, body) in &fetched.pages {
            match data::decode(body, page, &self.reconciler.prefix) {
                Ok(values) => {
                    trace!(page = %page, count = values.len(), "decoded data page");
                    raw.extend(values);
                }
                Err(e) => warn!(page = %page, "skipping data page: {e}"),
            }
        }

        let snapshot = snapshot_of(&raw);
        let empty = DescriptorMap::new();
        let descriptors = self.descriptors.as_ref().unwrap_or(&empty);
        let entities = self.reconciler.reconcile(&raw, descriptors, Some(&snapshot));
        debug!(
            raw = raw.len(),
            entities = entities.len(),
            pages = fetched.pages.len(),
            "refresh complete"
        );

        self.remember_locations(&raw);
        let events = diff_entities(&self.entities, &entities);
        self.entities = entities;

        if let Some(logger) = &self.logger {
            match serde_json::to_value(&self.entities) {
                Ok(value) => logger
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .log_snapshot(&value),
                Err(e) => warn!("failed to serialize entity snapshot: {e}"),
            }
        }

        for event in &events {
            trace!(?event, "entity event");
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(&self.entities);
        }

        Ok(&self.entities)
    }

    async fn ensure_pages(&mut self) -> Result<PageSet> {
        if let Some(pages) = &self.pages {
            return Ok(pages.clone());
        }
        let pages = match &self.fixed_pages {
            Some(fixed) => fixed.clone(),
            None => self.discover().await?,
        };
        info!(
            descriptors = pages.descriptor_pages.len(),
            data = pages.data_pages.len(),
            "using page set"
        );
        self.pages = Some(pages.clone());
        Ok(pages)
    }

    async fn load_descriptors(&mut self, pages: &[String]) -> Result<()> {
        let fetched = self.fetch_pages(pages).await?;
        let parsed: Vec<Vec<DescriptorEntry>> = fetched
            .pages
            .iter()
            .filter_map(|(page, body)| match descriptor::parse(body, page) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    warn!(page = %page, "skipping descriptor page: {e}");
                    None
                }
            })
            .collect();

        if parsed.is_empty() {
            // Try again next refresh.
            warn!("no descriptor page could be loaded");
            return Ok(());
        }
        let merged = descriptor::merge(parsed);
        info!(entries = merged.len(), "loaded descriptors");
        self.descriptors = Some(merged);
        Ok(())
    }

    fn remember_locations(&mut self, raw: &[RawValue]) {
        for value in raw {
            self.locations.insert(
                value.prop.to_uppercase(),
                PropLocation {
                    page: value.page.clone(),
                    internal_name: value.internal_name.clone(),
                },
            );
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    pub(crate) fn log_request(&self, method: &str, path: &str) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_request(method, path);
        }
    }

    pub(crate) fn log_page(&self, page: &str, status: u16, bytes: usize) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_page(page, status, bytes);
        }
    }

    pub(crate) fn log_write(&self, prop: &str, value: &str, strategy: &str, accepted: bool) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_write(prop, value, strategy, accepted);
        }
    }

    /// Drops this host's in-memory session. The cookie file, if any, is kept
    /// so the next process can reuse it.
    pub fn shutdown(&self) {
        self.host_session.clear();
        debug!(host = %self.host, "client shut down");
    }
}
