use reqwest::header::{COOKIE, SET_COOKIE};
use tracing::{debug, info, warn};

use crate::client::XccClient;
use crate::error::AuthError;
use crate::protocol::{
    cookie_header, is_connection_limit, is_error_page, is_login_page, password_hash,
    session_cookie_from_header, LOGIN_PATH, LOGIN_SEED_PATH, PROBE_PATH,
};
use crate::session::Session;
use crate::Result;

/// Retries after the first refused login; waits double each time.
const MAX_LOGIN_RETRIES: u32 = 3;

impl XccClient {
    /// Returns a usable session, reusing the in-memory one, then a cached
    /// cookie that still validates, then logging in.
    pub async fn ensure_session(&self) -> Result<Session> {
        if let Some(session) = self.host_session.current() {
            return Ok(session);
        }

        if let Some(cookie) = self.sessions.cache().and_then(|c| c.load(&self.host)) {
            let _guard = self.host_session.auth_lock.lock().await;
            if let Some(session) = self.host_session.current() {
                return Ok(session);
            }
            if self.probe(&cookie).await {
                debug!(host = %self.host, "reusing cached session cookie");
                let session = Session {
                    host: self.host.clone(),
                    cookie,
                };
                self.host_session.set(session.clone());
                return Ok(session);
            }
            debug!(host = %self.host, "cached session cookie rejected");
        }

        self.renew_session(None).await
    }

    /// Logs in again unless another caller already replaced `stale` with a
    /// session that still works. Serialized per host.
    pub(crate) async fn renew_session(&self, stale: Option<&str>) -> Result<Session> {
        let _guard = self.host_session.auth_lock.lock().await;

        if let Some(current) = self.host_session.current()
            && stale != Some(current.cookie.as_str())
            && self.probe(&current.cookie).await
        {
            debug!(host = %self.host, "session already renewed by another caller");
            return Ok(current);
        }

        self.host_session.clear();
        let session = self.login().await?;
        self.host_session.set(session.clone());
        if let Some(cache) = self.sessions.cache()
            && let Err(e) = cache.store(&self.host, &session.cookie)
        {
            warn!(host = %self.host, "failed to persist session cookie: {e}");
        }
        Ok(session)
    }

    /// True when `cookie` still opens a real page.
    async fn probe(&self, cookie: &str) -> bool {
        self.log_request("GET", PROBE_PATH);
        let resp = match self
            .http
            .get(self.url(PROBE_PATH))
            .header(COOKIE, cookie_header(cookie))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(host = %self.host, "session probe failed: {e}");
                return false;
            }
        };
        if resp.status().as_u16() != 200 {
            return false;
        }
        match resp.text().await {
            Ok(body) => !is_login_page(&body) && !is_error_page(&body),
            Err(_) => false,
        }
    }

    async fn login(&self) -> std::result::Result<Session, AuthError> {
        let mut delay = self.login_backoff;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_login().await {
                Ok(session) => {
                    info!(host = %self.host, "logged in");
                    return Ok(session);
                }
                Err(AuthError::ConnectionLimit { .. }) if attempt <= MAX_LOGIN_RETRIES => {
                    warn!(
                        host = %self.host,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "controller connection limit reached, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(AuthError::ConnectionLimit { .. }) => {
                    return Err(AuthError::ConnectionLimit { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_login(&self) -> std::result::Result<Session, AuthError> {
        debug!(host = %self.host, "requesting login seed");
        self.log_request("GET", LOGIN_SEED_PATH);
        let resp = self
            .http
            .get(self.url(LOGIN_SEED_PATH))
            .send()
            .await
            .map_err(AuthError::Network)?;
        let status = resp.status().as_u16();
        let session_id = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_cookie_from_header);
        let body = resp.text().await.map_err(AuthError::Network)?;

        if is_connection_limit(status, &body) {
            return Err(AuthError::ConnectionLimit { attempts: 1 });
        }
        if status != 200 {
            return Err(AuthError::Rejected {
                reason: format!("login seed returned HTTP {status}"),
            });
        }
        let session_id = session_id.ok_or_else(|| AuthError::Rejected {
            reason: "no session cookie in login seed response".to_string(),
        })?;

        let hash = password_hash(&session_id, &self.password);
        let form = [("USER", self.username.as_str()), ("PASS", hash.as_str())];
        self.log_request("POST", LOGIN_PATH);
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .header(COOKIE, cookie_header(&session_id))
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Network)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(AuthError::Network)?;

        if is_connection_limit(status, &body) {
            return Err(AuthError::ConnectionLimit { attempts: 1 });
        }
        if status != 200 {
            return Err(AuthError::Rejected {
                reason: format!("login returned HTTP {status}"),
            });
        }
        if is_login_page(&body) {
            return Err(AuthError::Rejected {
                reason: "credentials not accepted".to_string(),
            });
        }

        Ok(Session {
            host: self.host.clone(),
            cookie: session_id,
        })
    }
}
