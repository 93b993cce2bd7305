//! Entity identifiers.
//!
//! An identifier is a small string-to-string map such as
//! `{document_id, company_number}` or `{jurisdiction_code, company_number}`.
//! Identifier overlap is the primary key of identity resolution: two live
//! entities may never share an identifier.
//!
//! Identifiers stay opaque data, but the common shapes are recognised as
//! [`IdentifierScheme`]s and validated when they enter the system.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Key holding the source document / dataset id.
pub const DOCUMENT_ID: &str = "document_id";
/// Key holding a registry company number.
pub const COMPANY_NUMBER: &str = "company_number";
/// Key holding a jurisdiction code (`gb`, `us_de`, ...).
pub const JURISDICTION_CODE: &str = "jurisdiction_code";
/// Key holding a source-local beneficial owner id.
pub const BENEFICIAL_OWNER_ID: &str = "beneficial_owner_id";
/// Key holding a PSC self link.
pub const LINK: &str = "link";

/// Document id used by GB PSC snapshot self-link identifiers.
pub const PSC_SNAPSHOT_DOCUMENT_ID: &str = "GB PSC Snapshot";

/// The fixed key pair of an externally sourced canonical identifier.
pub const OC_IDENTIFIER_KEYS: [&str; 2] = [JURISDICTION_CODE, COMPANY_NUMBER];

fn jurisdiction_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2}(_[a-z0-9]+)?$").expect("jurisdiction code pattern is valid")
    })
}

/// Known identifier shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierScheme {
    /// `{jurisdiction_code, company_number}`: the canonical, externally
    /// sourced company identifier.
    OpenCorporates,
    /// `{document_id, company_number}`: a company as seen by one source.
    SourceCompany,
    /// `{document_id, company_number, beneficial_owner_id}`: an owner as seen
    /// by one source.
    SourceBeneficialOwner,
    /// `{document_id: "GB PSC Snapshot", link, ...}`.
    PscSelfLink,
    /// Anything else.
    Opaque,
}

impl fmt::Display for IdentifierScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenCorporates => write!(f, "open_corporates"),
            Self::SourceCompany => write!(f, "source_company"),
            Self::SourceBeneficialOwner => write!(f, "source_beneficial_owner"),
            Self::PscSelfLink => write!(f, "psc_self_link"),
            Self::Opaque => write!(f, "opaque"),
        }
    }
}

/// An opaque key/value identifier with order-independent equality.
///
/// # Examples
///
/// ```
/// use ownergraph::identifier::{Identifier, IdentifierScheme};
///
/// let id = Identifier::open_corporates("gb", "01234567");
/// assert_eq!(id.scheme(), IdentifierScheme::OpenCorporates);
/// assert_eq!(id.get("company_number"), Some("01234567"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "BTreeMap<String, String>")]
pub struct Identifier(BTreeMap<String, String>);

impl Identifier {
    /// Creates an empty identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an identifier from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Adds a key/value pair, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Canonical `{jurisdiction_code, company_number}` identifier.
    #[must_use]
    pub fn open_corporates(jurisdiction_code: impl Into<String>, company_number: impl Into<String>) -> Self {
        Self::new()
            .with(JURISDICTION_CODE, jurisdiction_code)
            .with(COMPANY_NUMBER, company_number)
    }

    /// `{document_id, company_number}` identifier.
    #[must_use]
    pub fn source_company(document_id: impl Into<String>, company_number: impl Into<String>) -> Self {
        Self::new()
            .with(DOCUMENT_ID, document_id)
            .with(COMPANY_NUMBER, company_number)
    }

    /// `{document_id, company_number, beneficial_owner_id}` identifier.
    #[must_use]
    pub fn source_beneficial_owner(
        document_id: impl Into<String>,
        company_number: impl Into<String>,
        beneficial_owner_id: impl Into<String>,
    ) -> Self {
        Self::source_company(document_id, company_number).with(BENEFICIAL_OWNER_ID, beneficial_owner_id)
    }

    /// Builds a canonical identifier from a JSON object, failing when either
    /// required key is absent.
    pub fn build_open_corporates(data: &Value) -> Result<Self, ValidationError> {
        let mut out = Self::new();
        for key in OC_IDENTIFIER_KEYS {
            let value = data.get(key).ok_or_else(|| ValidationError::missing(key))?;
            out.0.insert(key.to_string(), scalar_to_string(key, value)?);
        }
        Ok(out)
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Classifies the identifier against the known shapes.
    #[must_use]
    pub fn scheme(&self) -> IdentifierScheme {
        let has_exactly = |keys: &[&str]| self.0.len() == keys.len() && keys.iter().all(|k| self.0.contains_key(*k));

        if has_exactly(&OC_IDENTIFIER_KEYS) {
            IdentifierScheme::OpenCorporates
        } else if self.get(DOCUMENT_ID) == Some(PSC_SNAPSHOT_DOCUMENT_ID) && self.contains_key(LINK) {
            IdentifierScheme::PscSelfLink
        } else if has_exactly(&[DOCUMENT_ID, COMPANY_NUMBER]) {
            IdentifierScheme::SourceCompany
        } else if has_exactly(&[DOCUMENT_ID, COMPANY_NUMBER, BENEFICIAL_OWNER_ID]) {
            IdentifierScheme::SourceBeneficialOwner
        } else {
            IdentifierScheme::Opaque
        }
    }

    /// Returns true for the canonical `{jurisdiction_code, company_number}` shape.
    #[must_use]
    pub fn is_open_corporates(&self) -> bool {
        self.scheme() == IdentifierScheme::OpenCorporates
    }

    /// Validates the identifier at the input boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidIdentifier {
            identifier: self.to_string(),
            reason: reason.to_string(),
        };

        if self.0.is_empty() {
            return Err(invalid("identifier has no keys"));
        }
        if self.0.keys().any(|k| k.trim().is_empty()) {
            return Err(invalid("identifier keys must not be blank"));
        }

        let scheme = self.scheme();
        if scheme != IdentifierScheme::Opaque && self.0.values().any(|v| v.trim().is_empty()) {
            return Err(invalid(&format!("{scheme} identifier has a blank value")));
        }

        if scheme == IdentifierScheme::OpenCorporates {
            let code = self.get(JURISDICTION_CODE).unwrap_or_default();
            if !jurisdiction_code_pattern().is_match(code) {
                return Err(invalid(&format!("'{code}' is not a jurisdiction code")));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(ValidationError::InvalidIdentifier {
            identifier: key.to_string(),
            reason: format!("value of '{key}' must be a scalar"),
        }),
    }
}

impl TryFrom<Map<String, Value>> for Identifier {
    type Error = ValidationError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut out = BTreeMap::new();
        for (key, value) in &map {
            out.insert(key.clone(), scalar_to_string(key, value)?);
        }
        Ok(Self(out))
    }
}

impl From<Identifier> for BTreeMap<String, String> {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// Adds every identifier in `incoming` that `target` lacks, keeping order.
/// Returns the number added.
pub fn union_into(target: &mut Vec<Identifier>, incoming: &[Identifier]) -> usize {
    let mut added = 0;
    for identifier in incoming {
        if !target.contains(identifier) {
            target.push(identifier.clone());
            added += 1;
        }
    }
    added
}

/// Removes repeated identifiers, keeping first occurrences.
pub fn dedup(identifiers: &mut Vec<Identifier>) {
    let mut seen: Vec<Identifier> = Vec::with_capacity(identifiers.len());
    identifiers.retain(|i| {
        if seen.contains(i) {
            false
        } else {
            seen.push(i.clone());
            true
        }
    });
}

/// Formats a list of identifiers for logs and error messages.
#[must_use]
pub fn display_identifiers(identifiers: &[Identifier]) -> String {
    let parts: Vec<String> = identifiers.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
