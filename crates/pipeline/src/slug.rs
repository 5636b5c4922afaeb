use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Namespaced identifier for routes and middleware lists: `v<integer>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slug {
    raw: String,
    version: u32,
}

impl Slug {
    /// Parse and validate a slug.
    ///
    /// The version is a decimal integer; the name is non-empty and made of
    /// ASCII alphanumerics, `_`, `-` or `.`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidSlug {
            slug: raw.to_string(),
        };
        let rest = raw.strip_prefix('v').ok_or_else(invalid)?;
        let (version, name) = rest.split_once('.').ok_or_else(invalid)?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let version = version.parse::<u32>().map_err(|_| invalid())?;
        let name_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !name_ok {
            return Err(invalid());
        }
        Ok(Self {
            raw: raw.to_string(),
            version,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        self.raw
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or_default()
    }
}

// Hash the raw text only so `HashMap<Slug, _>` can be queried with `&str`.
impl Hash for Slug {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Slug {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Slug {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl std::borrow::Borrow<str> for Slug {
    fn borrow(&self) -> &str {
        &self.raw
    }
}

impl Serialize for Slug {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("v1.auth", 1, "auth")]
    #[case("v12.download_stream_video", 12, "download_stream_video")]
    #[case("v0.a.b-c", 0, "a.b-c")]
    fn valid_slugs(#[case] raw: &str, #[case] version: u32, #[case] name: &str) {
        let slug = Slug::parse(raw).unwrap();
        assert_eq!(slug.version(), version);
        assert_eq!(slug.name(), name);
        assert_eq!(slug.to_string(), raw);
    }

    #[rstest]
    #[case("")]
    #[case("auth")]
    #[case("v.auth")]
    #[case("vx.auth")]
    #[case("v1")]
    #[case("v1.")]
    #[case("v1.has space")]
    #[case("V1.auth")]
    #[case("v-1.auth")]
    fn invalid_slugs(#[case] raw: &str) {
        assert!(matches!(
            Slug::parse(raw),
            Err(Error::InvalidSlug { slug }) if slug == raw
        ));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Slug = serde_json::from_str("\"v2.response\"").unwrap();
        assert_eq!(ok.version(), 2);
        assert!(serde_json::from_str::<Slug>("\"response\"").is_err());
    }
}
