//! Addresses and typed origins.
//!
//! An [`Address`] is the opaque string naming the resource loaded into a
//! context. It is used as both routing key and ownership key. Routing
//! decisions that need to know *which execution context* an address belongs
//! to go through [`Origin`], which is parsed once and compared structurally.

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EXTENSION_HOST_ID, SCHEME, SYSTEM_ADDRESS};

/// Opaque resource address of an execution context.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap a raw address string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The system/background context address.
    pub fn system() -> Self {
        Self(SYSTEM_ADDRESS.to_string())
    }

    /// Content address of an extension resource: `peek://ext/<id>/<path>`.
    pub fn extension(id: &str, path: &str) -> Self {
        Self(format!("{}ext/{}/{}", SCHEME, id, path.trim_start_matches("./")))
    }

    /// Resolve a URL requested by content.
    ///
    /// Absolute `peek://`, `http://` and `https://` URLs are kept as-is;
    /// anything else is treated as a path under `peek://app/`.
    pub fn resolve(url: &str) -> Self {
        if url.starts_with(SCHEME) || url.starts_with("http://") || url.starts_with("https://") {
            Self(url.to_string())
        } else {
            Self(format!("{}app/{}", SCHEME, url.trim_start_matches('/')))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ADDRESS
    }

    /// Parse the origin of this address.
    pub fn origin(&self) -> Origin {
        Origin::from_address(self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Error parsing an address into a strict [`Origin`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseAddressError {
    #[error("address is empty")]
    Empty,
    #[error("extension address has no id: {0}")]
    MissingExtensionId(String),
}

/// Typed origin of a message.
///
/// Sub-frames of the consolidated host window carry their own variant so
/// that a frame can be told apart from the host window that contains it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Origin {
    /// The system/background context.
    Root,
    /// A core application page (`peek://app/<page>`).
    App { page: String },
    /// An extension in its own window (`peek://ext/<id>/...`).
    Extension { id: String },
    /// An extension loaded as an isolated sub-frame of a shared host window.
    Subframe { id: String, parent: String },
    /// Anything not served by the host.
    External { url: String },
}

/// Execution-context identity used for echo suppression.
///
/// Every address belonging to one extension id maps to the same key,
/// whether it was loaded in a dedicated window or as a sub-frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKey<'a> {
    Root,
    App(&'a str),
    Extension(&'a str),
    External(&'a str),
}

impl Origin {
    /// Parse an origin, never failing. Unparseable extension addresses are
    /// treated as external.
    pub fn from_address(address: &Address) -> Self {
        Self::parse(address.as_str()).unwrap_or_else(|_| Origin::External {
            url: address.as_str().to_string(),
        })
    }

    /// Strict parse.
    pub fn parse(raw: &str) -> Result<Self, ParseAddressError> {
        if raw.is_empty() {
            return Err(ParseAddressError::Empty);
        }
        let Some(rest) = raw.strip_prefix(SCHEME) else {
            return Ok(Origin::External { url: raw.to_string() });
        };

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        match host {
            "system" => Ok(Origin::Root),
            "app" => Ok(Origin::App { page: strip_query(path).to_string() }),
            "ext" => {
                let id = path.split('/').next().unwrap_or_default();
                if id.is_empty() {
                    Err(ParseAddressError::MissingExtensionId(raw.to_string()))
                } else {
                    Ok(Origin::Extension { id: id.to_string() })
                }
            }
            _ => Ok(Origin::External { url: raw.to_string() }),
        }
    }

    /// Origin of an extension frame inside the consolidated host window.
    pub fn subframe(id: impl Into<String>) -> Self {
        Origin::Subframe {
            id: id.into(),
            parent: EXTENSION_HOST_ID.to_string(),
        }
    }

    /// Extension id, for both dedicated and consolidated extensions.
    pub fn extension_id(&self) -> Option<&str> {
        match self {
            Origin::Extension { id } | Origin::Subframe { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Origin::Root)
    }

    /// Execution-context identity of this origin.
    pub fn context(&self) -> ContextKey<'_> {
        match self {
            Origin::Root => ContextKey::Root,
            Origin::App { page } => ContextKey::App(page),
            Origin::Extension { id } | Origin::Subframe { id, .. } => ContextKey::Extension(id),
            Origin::External { url } => ContextKey::External(url),
        }
    }

    /// Whether two origins belong to the same execution context.
    pub fn same_context(&self, other: &Origin) -> bool {
        self.context() == other.context()
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert_eq!(Origin::parse("peek://system/").unwrap(), Origin::Root);
        assert_eq!(
            Origin::parse("peek://app/settings/settings.html?x=1").unwrap(),
            Origin::App { page: "settings/settings.html".into() }
        );
        assert_eq!(
            Origin::parse("peek://ext/groups/background.html").unwrap(),
            Origin::Extension { id: "groups".into() }
        );
        assert_eq!(
            Origin::parse("https://example.com").unwrap(),
            Origin::External { url: "https://example.com".into() }
        );
        assert_eq!(Origin::parse(""), Err(ParseAddressError::Empty));
        assert!(matches!(
            Origin::parse("peek://ext/"),
            Err(ParseAddressError::MissingExtensionId(_))
        ));
    }

    #[test]
    fn test_subframe_shares_context_with_extension() {
        let frame = Origin::subframe("cmd");
        let window = Address::extension("cmd", "popup.html").origin();
        assert!(frame.same_context(&window));
        assert_ne!(frame, window);
        assert_eq!(frame.extension_id(), Some("cmd"));
    }

    #[test]
    fn test_context_is_not_prefix_based() {
        // "cmd" and "cmd2" must never be confused.
        let a = Address::extension("cmd", "background.html").origin();
        let b = Address::extension("cmd2", "background.html").origin();
        assert!(!a.same_context(&b));

        let app = Address::new("peek://app/ext/cmd/background.html").origin();
        assert!(!app.same_context(&a));
    }

    #[test]
    fn test_resolve_relative_url() {
        assert_eq!(Address::resolve("settings.html").as_str(), "peek://app/settings.html");
        assert_eq!(Address::resolve("/a/b.html").as_str(), "peek://app/a/b.html");
        assert_eq!(Address::resolve("https://x.y/").as_str(), "https://x.y/");
        assert_eq!(Address::resolve("peek://ext/a/b.html").as_str(), "peek://ext/a/b.html");
    }
}
