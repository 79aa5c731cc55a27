use sha1::{Digest, Sha1};

pub const LOGIN_SEED_PATH: &str = "LOGIN.XML";
pub const LOGIN_PATH: &str = "RPC/WEBSES/create.asp";
pub const PROBE_PATH: &str = "INDEX.XML";
pub const PAGE_TREE_PATH: &str = "main.xml";
pub const GENERIC_WRITE_PATH: &str = "set_value";

pub const SESSION_COOKIE: &str = "SoftPLC";

pub const DEFAULT_DESCRIPTOR_PAGES: &[&str] = &[
    "stavjed.xml",
    "okruh.xml",
    "tuv1.xml",
    "biv.xml",
    "fve.xml",
    "spot.xml",
];

pub const DEFAULT_DATA_PAGES: &[&str] = &[
    "STAVJED1.XML",
    "OKRUH10.XML",
    "TUV11.XML",
    "BIV1.XML",
    "FVE4.XML",
    "SPOT1.XML",
];

/// Descriptors fetched whether or not the page tree marks them active.
pub const REQUIRED_DESCRIPTOR_PAGES: &[&str] = &["stavjed.xml", "nast.xml"];

/// Pages some firmware marks active with an integer flag instead of a
/// boolean one. Heuristic, observed on real units.
pub const INTEGER_FLAG_PAGES: &[&str] = &["fve.xml", "tuv1.xml", "spot.xml", "pocasi.xml"];

pub const DATA_PAGE_SUFFIXES: &[&str] = &["1", "4", "10", "11"];

pub const MIN_DATA_PAGE_LEN: usize = 100;

const CONNECTION_LIMIT_MARKER: &str = "maximum number of connection";

const WRITE_ERROR_KEYWORDS: &[&str] = &["error", "failed", "invalid", "denied", "forbidden"];

pub fn password_hash(session_id: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(session_id.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// The device answers with its login form when the session is gone.
pub fn is_login_page(body: &str) -> bool {
    body.contains("<LOGIN>") && body.contains("USER VALUE")
}

/// Textual error markers the device embeds in otherwise-200 pages.
pub fn is_error_page(body: &str) -> bool {
    body.contains("500 Internal Server Error") || body.contains("<H1>500") || body.contains(">500<")
}

pub fn is_connection_limit(status: u16, body: &str) -> bool {
    status == 500 && body.to_lowercase().contains(CONNECTION_LIMIT_MARKER)
}

/// Pulls the `SoftPLC` value out of a `Set-Cookie` header.
pub fn session_cookie_from_header(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        let value = value.trim();
        (name.trim() == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

pub fn cookie_header(cookie: &str) -> String {
    format!("{SESSION_COOKIE}={cookie}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    Rejected(String),
    /// The device answered with its login form.
    SessionExpired,
}

pub fn classify_write_response(status: u16, body: &str) -> WriteOutcome {
    if is_login_page(body) {
        return WriteOutcome::SessionExpired;
    }
    if status != 200 {
        return WriteOutcome::Rejected(format!("HTTP {status}"));
    }
    let lower = body.to_lowercase();
    match WRITE_ERROR_KEYWORDS.iter().find(|kw| lower.contains(*kw)) {
        Some(kw) => WriteOutcome::Rejected(format!("response contains '{kw}'")),
        None => WriteOutcome::Accepted,
    }
}

/// Uppercased base name without query, extension or trailing digits:
/// `TUV11.XML` and `tuv1.xml` both give `TUV`.
pub fn page_family(page: &str) -> String {
    let without_query = page.split('?').next().unwrap_or(page);
    let file = without_query.rsplit('/').next().unwrap_or(without_query);
    let upper = file.to_uppercase();
    let base = upper.strip_suffix(".XML").unwrap_or(&upper);
    base.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// `okruh.xml?page=0` -> `okruh.xml`
pub fn descriptor_base_name(url: &str) -> String {
    url.split('?').next().unwrap_or(url).trim().to_lowercase()
}

pub fn data_page_candidates(descriptor: &str) -> Vec<String> {
    let upper = descriptor.to_uppercase();
    let base = upper.strip_suffix(".XML").unwrap_or(&upper);
    DATA_PAGE_SUFFIXES
        .iter()
        .map(|suffix| format!("{base}{suffix}.XML"))
        .collect()
}
