//! Virtual document identities for fragments
//!
//! Every fragment is addressable as a standalone file through a synthetic URI:
//!
//! ```text
//! fragments://<percent-encoded host id>/frag<index>.<language tag>
//! ```
//!
//! Every byte of the host id outside the unreserved set `A-Z a-z 0-9 - _ . ~`
//! is percent-encoded. That is stricter than JavaScript's `encodeURIComponent`,
//! which leaves `! ' ( ) *` alone, but any host path (including one that
//! already contains `%` escapes) still survives the authority segment.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tower_lsp::lsp_types::Url;

/// URI scheme of virtual fragment documents
pub const FRAGMENT_SCHEME: &str = "fragments";

const SCHEME_PREFIX: &str = "fragments://";
const FILE_PREFIX: &str = "frag";

/// A virtual identity string did not have the shape produced by [`VirtualId::encode`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityFormatError {
    #[error("'{0}' does not use the {FRAGMENT_SCHEME}:// scheme")]
    MissingScheme(String),
    #[error("'{0}' has no fragment file segment")]
    MissingPath(String),
    #[error("file segment '{0}' does not start with '{FILE_PREFIX}'")]
    MissingFragmentPrefix(String),
    #[error("file segment '{0}' has no numeric fragment index")]
    InvalidIndex(String),
    #[error("file segment '{0}' has no usable language tag")]
    MissingLanguageTag(String),
    #[error("host segment '{0}' is not valid percent-encoded UTF-8")]
    InvalidEncoding(String),
}

/// Returns true if `tag` can be used as the extension of a virtual file name
///
/// Tags are restricted to ASCII alphanumerics, `_`, `+` and `-` so that they
/// never need escaping inside a URI path.
pub fn is_valid_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

/// Canonical identity of a host document
///
/// Derived from the document location only: the path of its URI, lower-cased
/// so that editors which normalise drive letters or case still map repeated
/// opens of the same file onto one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl AsRef<str>) -> Self {
        HostId(id.as_ref().to_lowercase())
    }

    pub fn from_url(uri: &Url) -> Self {
        Self::new(uri.path())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI of the directory holding all fragments of this host
    pub fn directory_uri(&self) -> String {
        format!("{}{}/", SCHEME_PREFIX, urlencoding::encode(&self.0))
    }

    /// Parses a directory URI produced by [`HostId::directory_uri`]
    ///
    /// A full virtual document URI is accepted too; its file segment is ignored.
    pub fn from_directory_uri(uri: &str) -> Result<Self, IdentityFormatError> {
        let rest = uri
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| IdentityFormatError::MissingScheme(uri.to_string()))?;
        let authority = rest.split('/').next().unwrap_or_default();
        decode_host(authority)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one fragment as an addressable virtual document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualId {
    pub host: HostId,
    pub index: usize,
    pub language_tag: String,
}

impl VirtualId {
    pub fn new(host: HostId, index: usize, language_tag: impl Into<String>) -> Self {
        VirtualId {
            host,
            index,
            language_tag: language_tag.into(),
        }
    }

    /// Formats the identity as `fragments://<host>/frag<index>.<tag>`
    pub fn encode(&self) -> String {
        format!(
            "{}{}/{}{}.{}",
            SCHEME_PREFIX,
            urlencoding::encode(self.host.as_str()),
            FILE_PREFIX,
            self.index,
            self.language_tag
        )
    }

    /// Parses a string produced by [`VirtualId::encode`]
    pub fn decode(uri: &str) -> Result<Self, IdentityFormatError> {
        let rest = uri
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| IdentityFormatError::MissingScheme(uri.to_string()))?;
        let (authority, file) = rest
            .rsplit_once('/')
            .ok_or_else(|| IdentityFormatError::MissingPath(uri.to_string()))?;
        // Only a single path segment is ever produced.
        if authority.contains('/') {
            return Err(IdentityFormatError::MissingPath(uri.to_string()));
        }

        let host = decode_host(authority)?;
        let numbered = file
            .strip_prefix(FILE_PREFIX)
            .ok_or_else(|| IdentityFormatError::MissingFragmentPrefix(file.to_string()))?;
        let (index, language_tag) = numbered
            .rsplit_once('.')
            .ok_or_else(|| IdentityFormatError::MissingLanguageTag(file.to_string()))?;

        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityFormatError::InvalidIndex(file.to_string()));
        }
        let index = index
            .parse::<usize>()
            .map_err(|_| IdentityFormatError::InvalidIndex(file.to_string()))?;
        if !is_valid_language_tag(language_tag) {
            return Err(IdentityFormatError::MissingLanguageTag(file.to_string()));
        }

        Ok(VirtualId::new(host, index, language_tag))
    }

    /// The identity as an LSP document URI
    pub fn to_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.encode())
    }

    pub fn from_url(uri: &Url) -> Result<Self, IdentityFormatError> {
        Self::decode(uri.as_str())
    }

    /// File name of the fragment inside its host directory (`frag<index>.<tag>`)
    pub fn file_name(&self) -> String {
        format!("{}{}.{}", FILE_PREFIX, self.index, self.language_tag)
    }
}

impl fmt::Display for VirtualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for VirtualId {
    type Err = IdentityFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn decode_host(authority: &str) -> Result<HostId, IdentityFormatError> {
    urlencoding::decode(authority)
        .map(HostId::new)
        .map_err(|_| IdentityFormatError::InvalidEncoding(authority.to_string()))
}
