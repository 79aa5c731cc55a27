use reqwest::header::COOKIE;
use tracing::{debug, info, warn};

use crate::client::XccClient;
use crate::encoding::decode_page;
use crate::error::FetchError;
use crate::protocol::{cookie_header, is_login_page};
use crate::{Error, Result};

/// Outcome of fetching a list of pages: bodies that arrived, and the pages
/// that failed with why.
#[derive(Debug, Default)]
pub struct FetchedPages {
    pub pages: Vec<(String, String)>,
    pub failed: Vec<(String, Error)>,
}

impl XccClient {
    /// Fetches one page as decoded text. A login page in place of the
    /// content triggers one session renewal and one retry.
    pub async fn fetch_page(&self, page: &str) -> Result<String> {
        let session = self.ensure_session().await?;
        let body = self.get_page(page, &session.cookie).await?;
        if !is_login_page(&body) {
            return Ok(body);
        }

        info!(page, "session expired, logging in again");
        let renewed = self.renew_session(Some(&session.cookie)).await?;
        let body = self.get_page(page, &renewed.cookie).await?;
        if is_login_page(&body) {
            self.host_session.clear();
            return Err(FetchError::ReauthFailed {
                page: page.to_string(),
            }
            .into());
        }
        Ok(body)
    }

    /// Fetches pages one after another with the configured pause between
    /// them. Authentication failures abort the batch; anything else is
    /// recorded against the page and the batch continues.
    pub async fn fetch_pages(&self, pages: &[String]) -> Result<FetchedPages> {
        let mut out = FetchedPages::default();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }
            match self.fetch_page(page).await {
                Ok(body) => out.pages.push((page.clone(), body)),
                Err(Error::Auth(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(page = %page, retryable = e.is_retryable(), "page fetch failed: {e}");
                    out.failed.push((page.clone(), e));
                }
            }
        }
        Ok(out)
    }

    async fn get_page(&self, page: &str, cookie: &str) -> std::result::Result<String, FetchError> {
        let url = self.url(page);
        debug!(url = %url, "fetching page");
        self.log_request("GET", page);

        let resp = self
            .http
            .get(&url)
            .header(COOKIE, cookie_header(cookie))
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(page, e))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(page, e))?;
        self.log_page(page, status, bytes.len());

        if status != 200 {
            return Err(FetchError::Http {
                page: page.to_string(),
                status,
            });
        }
        Ok(decode_page(&bytes))
    }
}
