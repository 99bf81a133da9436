use std::{
    fmt::Display,
    sync::LazyLock,
};

use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI: {uri}")]
pub struct InvalidUri {
    uri: String,
}

impl InvalidUri {
    fn new<S>(uri: S) -> Self
    where
        S: Into<String>,
    {
        Self { uri: uri.into() }
    }
}

/// Validates a URI under the loose WAMP rules.
///
/// Components must be non-empty and may contain anything except whitespace, `.`, and `#`.
pub fn validate_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([^\s\.#]+\.)*([^\s\.#]+)$").expect("URI pattern is a valid regex")
    });
    if !RE.is_match(uri.as_ref()) {
        return Err(InvalidUri::new(uri.as_ref()));
    }
    Ok(())
}

/// Validates a URI that may contain empty components, which act as wildcards.
pub fn validate_wildcard_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([^\s\.#]*\.)*([^\s\.#]*)$").expect("wildcard URI pattern is a valid regex")
    });
    if !RE.is_match(uri.as_ref()) {
        return Err(InvalidUri::new(uri.as_ref()));
    }
    Ok(())
}

/// A uniform resource identifier, naming realms, topics, procedures, and errors.
///
/// Registrations and subscriptions using [`MatchStyle::Wildcard`][`crate::core::match_style::MatchStyle::Wildcard`]
/// may contain empty components, so the URI of a resource is validated with wildcard rules; every
/// other URI follows the loose rules of [`validate_uri`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Constructs a URI directly from a value known to be valid, skipping validation.
    pub(crate) fn from_known<S>(value: S) -> Self
    where
        S: Into<String>,
    {
        Self(value.into())
    }

    /// Constructs a URI that may contain wildcard components.
    pub fn wildcard<S>(value: S) -> Result<Self, InvalidUri>
    where
        S: Into<String>,
    {
        let value = value.into();
        validate_wildcard_uri(&value)?;
        Ok(Self(value))
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Uri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_uri(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl From<Uri> for String {
    fn from(value: Uri) -> Self {
        value.0
    }
}

struct UriVisitor;

impl<'de> Visitor<'de> for UriVisitor {
    type Value = Uri;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a URI")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        // Routers echo back wildcard URIs in some messages, so incoming URIs use the lenient rules.
        Uri::wildcard(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UriVisitor)
    }
}
