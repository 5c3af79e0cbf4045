//! Identity locators.
//!
//! An identity is the opaque string persisted next to a file that lets Restore
//! and Remove find its remote copy. Two spellings exist:
//!
//! - a *bare key* such as `projects/run1/out.dat`, interpreted relative to the
//!   configured container and prefix, and
//! - a *qualified locator* such as `az://archive/projects/run1/out.dat`, which
//!   names its own container.
//!
//! Strings are parsed once into [`Identity`] and resolved into an
//! [`ObjectLocation`] with [`Identity::locate`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Scheme used for qualified locators.
pub const SCHEME: &str = "az";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,
    #[error("identity '{0}' uses unsupported scheme '{1}'")]
    ForeignScheme(String, String),
    #[error("identity '{0}' is missing its container")]
    MissingContainer(String),
    #[error("identity '{0}' is missing its object key")]
    MissingKey(String),
}

/// A parsed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    BareKey(String),
    Qualified { container: String, key: String },
}

impl Identity {
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }

        let Some((scheme, rest)) = s.split_once("://") else {
            return Ok(Identity::BareKey(s.to_string()));
        };
        if !is_scheme(scheme) {
            // Something like `a:b://c` is not a URL; keep it as an opaque key.
            return Ok(Identity::BareKey(s.to_string()));
        }
        if scheme != SCHEME {
            return Err(IdentityError::ForeignScheme(s.to_string(), scheme.to_string()));
        }

        let (container, key) = rest.split_once('/').unwrap_or((rest, ""));
        if container.is_empty() {
            return Err(IdentityError::MissingContainer(s.to_string()));
        }
        if key.is_empty() {
            return Err(IdentityError::MissingKey(s.to_string()));
        }
        Ok(Identity::Qualified { container: container.to_string(), key: key.to_string() })
    }

    /// Resolve to a concrete container and key.
    ///
    /// Bare keys land in `default_container` under `prefix`; qualified locators
    /// ignore both.
    pub fn locate(&self, default_container: &str, prefix: &str) -> ObjectLocation {
        match self {
            Identity::BareKey(key) => ObjectLocation::new(default_container, join_key(prefix, key)),
            Identity::Qualified { container, key } => ObjectLocation::new(container.clone(), key.clone()),
        }
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::BareKey(key) => f.write_str(key),
            Identity::Qualified { container, key } => write!(f, "{SCHEME}://{container}/{key}"),
        }
    }
}

/// A (container, key) pair in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectLocation {
    pub container: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self { container: container.into(), key: key.into() }
    }

    /// The fully qualified locator for this location.
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}://{}/{}", self.container, self.key)
    }
}

/// Join a key prefix and a relative key with exactly one `/` between them.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
