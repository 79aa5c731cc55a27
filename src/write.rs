use reqwest::header::COOKIE;
use tracing::{debug, info};

use crate::client::XccClient;
use crate::encoding::decode_page;
use crate::error::WriteError;
use crate::protocol::{classify_write_response, cookie_header, WriteOutcome, GENERIC_WRITE_PATH};
use crate::Result;

/// Write requests the controller may accept, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteAttempt {
    /// Form POST of the internal register name to the data page.
    InternalPost { page: String, key: String },
    /// `GET <page>?<internal>=<value>`
    InternalGet { page: String, key: String },
    PropGet { page: String, key: String },
    PropPost { page: String, key: String },
    /// `POST /set_value` with `param` and `value` fields.
    Generic,
}

impl WriteAttempt {
    fn label(&self) -> &'static str {
        match self {
            WriteAttempt::InternalPost { .. } => "internal_post",
            WriteAttempt::InternalGet { .. } => "internal_get",
            WriteAttempt::PropGet { .. } => "prop_get",
            WriteAttempt::PropPost { .. } => "prop_post",
            WriteAttempt::Generic => "generic",
        }
    }
}

impl XccClient {
    /// Sets `prop` to `value`, trying each known write form in turn until the
    /// controller accepts one. An expired session is renewed once.
    pub async fn set_value(&self, prop: &str, value: &str) -> Result<()> {
        let attempts = self.write_attempts(prop);
        let mut cookie = self.ensure_session().await?.cookie;
        let mut renewed = false;

        for attempt in &attempts {
            loop {
                let outcome = match self.send_write(attempt, prop, value, &cookie).await {
                    Ok((status, body)) => classify_write_response(status, &body),
                    Err(e) => WriteOutcome::Rejected(e.to_string()),
                };
                match outcome {
                    WriteOutcome::Accepted => {
                        info!(prop, value, strategy = attempt.label(), "value written");
                        self.log_write(prop, value, attempt.label(), true);
                        return Ok(());
                    }
                    WriteOutcome::SessionExpired if !renewed => {
                        renewed = true;
                        debug!(prop, "session expired during write, logging in again");
                        cookie = self.renew_session(Some(&cookie)).await?.cookie;
                    }
                    WriteOutcome::SessionExpired => {
                        self.log_write(prop, value, attempt.label(), false);
                        break;
                    }
                    WriteOutcome::Rejected(reason) => {
                        debug!(prop, strategy = attempt.label(), %reason, "write rejected");
                        self.log_write(prop, value, attempt.label(), false);
                        break;
                    }
                }
            }
        }

        Err(WriteError::AllEndpointsFailed {
            prop: prop.to_string(),
            attempts: attempts.len(),
        }
        .into())
    }

    fn write_attempts(&self, prop: &str) -> Vec<WriteAttempt> {
        let mut attempts = Vec::new();
        if let Some(location) = self.locations.get(&prop.to_uppercase()) {
            let page = location.page.clone();
            if let Some(internal) = &location.internal_name {
                attempts.push(WriteAttempt::InternalPost {
                    page: page.clone(),
                    key: internal.clone(),
                });
                attempts.push(WriteAttempt::InternalGet {
                    page: page.clone(),
                    key: internal.clone(),
                });
            }
            attempts.push(WriteAttempt::PropGet {
                page: page.clone(),
                key: prop.to_string(),
            });
            attempts.push(WriteAttempt::PropPost {
                page,
                key: prop.to_string(),
            });
        }
        attempts.push(WriteAttempt::Generic);
        attempts
    }

    async fn send_write(
        &self,
        attempt: &WriteAttempt,
        prop: &str,
        value: &str,
        cookie: &str,
    ) -> std::result::Result<(u16, String), reqwest::Error> {
        let request = match attempt {
            WriteAttempt::InternalPost { page, key } | WriteAttempt::PropPost { page, key } => {
                self.log_request("POST", page);
                self.http.post(self.url(page)).form(&[(key.as_str(), value)])
            }
            WriteAttempt::InternalGet { page, key } | WriteAttempt::PropGet { page, key } => {
                self.log_request("GET", page);
                self.http.get(self.url(page)).query(&[(key.as_str(), value)])
            }
            WriteAttempt::Generic => {
                self.log_request("POST", GENERIC_WRITE_PATH);
                self.http
                    .post(self.url(GENERIC_WRITE_PATH))
                    .form(&[("param", prop), ("value", value)])
            }
        };
        let resp = request.header(COOKIE, cookie_header(cookie)).send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        Ok((status, decode_page(&bytes)))
    }
}
