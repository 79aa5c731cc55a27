mod auth;
mod client;
mod config;
pub mod data;
pub mod descriptor;
mod diff;
pub mod discovery;
mod encoding;
mod error;
mod fetch;
mod logger;
pub mod protocol;
mod reconcile;
mod session;
mod types;
pub mod visibility;
mod write;
mod xml;

pub use client::{XccClient, XccClientBuilder};
pub use config::ClientConfig;
pub use descriptor::DescriptorMap;
pub use discovery::{PageInfo, PageSet};
pub use encoding::{decode_page, sanitize};
pub use error::{AuthError, Error, FetchError, ParseError, Result, WriteError};
pub use fetch::FetchedPages;
pub use logger::MessageLogMode;
pub use protocol::{classify_write_response, password_hash, WriteOutcome};
pub use reconcile::{snapshot_of, Reconciler};
pub use session::{Session, SessionManager};
pub use types::*;
