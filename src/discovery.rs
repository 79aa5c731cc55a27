use tracing::{debug, info, trace, warn};

use crate::client::XccClient;
use crate::error::{FetchError, ParseError};
use crate::protocol::{
    data_page_candidates, descriptor_base_name, is_error_page, is_login_page, DEFAULT_DATA_PAGES,
    DEFAULT_DESCRIPTOR_PAGES, INTEGER_FLAG_PAGES, MIN_DATA_PAGE_LEN, PAGE_TREE_PATH,
    REQUIRED_DESCRIPTOR_PAGES,
};
use crate::xml::{NodeRef, XmlDocument};
use crate::{Error, Result};

const INTEGER_MARKERS: &[&str] = &["_INT_", "_UINT_", "_USINT_", "_DINT_", "_UDINT_"];

/// Which pages a refresh reads: descriptors once, data pages every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageSet {
    pub descriptor_pages: Vec<String>,
    pub data_pages: Vec<String>,
}

impl PageSet {
    /// Pages present on practically every unit.
    pub fn defaults() -> Self {
        Self {
            descriptor_pages: DEFAULT_DESCRIPTOR_PAGES.iter().map(|s| s.to_string()).collect(),
            data_pages: DEFAULT_DATA_PAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One `F` entry of the controller's page tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: String,
    pub url: String,
    pub name: Option<String>,
    pub active: bool,
}

pub fn parse_page_tree(xml: &str) -> std::result::Result<Vec<PageInfo>, ParseError> {
    let doc = XmlDocument::parse(xml, PAGE_TREE_PATH)?;
    let pages = doc
        .elements_named("F")
        .filter_map(|f| {
            let url = f.non_empty_attr("U")?.to_string();
            let name = f
                .descendants()
                .find(|n| n.name() == "INPUTN")
                .and_then(|n| n.non_empty_attr("VALUE"))
                .map(str::to_string);
            Some(PageInfo {
                id: f.attr("N").unwrap_or_default().to_string(),
                active: is_active(f, &url),
                url,
                name,
            })
        })
        .collect();
    Ok(pages)
}

fn is_active(entry: NodeRef<'_>, url: &str) -> bool {
    let integer_flags = INTEGER_FLAG_PAGES.contains(&descriptor_base_name(url).as_str());
    entry.descendants().any(|n| {
        let Some(name) = n.attr("NAME") else {
            return false;
        };
        let value = n.attr("VALUE").unwrap_or_default().trim();
        if name.contains("_BOOL_") {
            value == "1"
        } else if integer_flags && INTEGER_MARKERS.iter().any(|m| name.contains(m)) {
            value.parse::<f64>().is_ok_and(|v| v != 0.0)
        } else {
            false
        }
    })
}

/// Base names of active pages in tree order, plus the pages that are always
/// loaded.
pub fn active_descriptors(pages: &[PageInfo]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let names = pages
        .iter()
        .filter(|p| p.active)
        .map(|p| descriptor_base_name(&p.url))
        .chain(REQUIRED_DESCRIPTOR_PAGES.iter().map(|s| s.to_string()));
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

impl XccClient {
    /// Works out which pages this unit serves. Falls back to
    /// [`PageSet::defaults`] on anything but an authentication failure.
    pub async fn discover(&self) -> Result<PageSet> {
        match self.discover_pages().await {
            Ok(set) if !set.data_pages.is_empty() => {
                info!(
                    descriptors = set.descriptor_pages.len(),
                    data = set.data_pages.len(),
                    "discovered pages"
                );
                Ok(set)
            }
            Ok(_) => {
                warn!("discovery found no data pages, using defaults");
                Ok(PageSet::defaults())
            }
            Err(Error::Auth(e)) => Err(e.into()),
            Err(e) => {
                warn!("page discovery failed, using defaults: {e}");
                Ok(PageSet::defaults())
            }
        }
    }

    async fn discover_pages(&self) -> Result<PageSet> {
        let tree = self.fetch_page(PAGE_TREE_PATH).await?;
        let pages = parse_page_tree(&tree)?;
        if pages.is_empty() {
            return Err(ParseError::MalformedXml {
                page: PAGE_TREE_PATH.to_string(),
                message: "no page entries".to_string(),
            }
            .into());
        }
        let descriptor_pages = active_descriptors(&pages);
        debug!(?descriptor_pages, "active descriptor pages");

        let mut data_pages = Vec::new();
        for descriptor in &descriptor_pages {
            for candidate in data_page_candidates(descriptor) {
                self.pace().await;
                if self.probe_data_page(&candidate).await? {
                    data_pages.push(candidate);
                }
            }
        }
        Ok(PageSet {
            descriptor_pages,
            data_pages,
        })
    }

    async fn probe_data_page(&self, page: &str) -> Result<bool> {
        match self.fetch_page(page).await {
            Ok(body) => Ok(!is_login_page(&body)
                && !is_error_page(&body)
                && body.len() >= MIN_DATA_PAGE_LEN),
            Err(e @ (Error::Auth(_) | Error::Fetch(FetchError::ReauthFailed { .. }))) => Err(e),
            Err(e) => {
                trace!(page, "candidate data page rejected: {e}");
                Ok(false)
            }
        }
    }
}
