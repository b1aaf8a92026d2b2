//! Canonical storage-key codec for the remediation pipeline.
//!
//! Every component derives its read/write keys through this crate. A key has
//! the shape `{root}{token segments...}/{item segments...}` where the token
//! is the caller's folder hierarchy, carried through the whole job. The empty
//! token must produce keys byte-identical to a codec without namespace
//! support, and `extract_token(derive_key(root, t, name), root) == (t, name)`
//! must hold for every valid token including the empty one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed key: {0}")]
    MalformedKey(String),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Ordered folder segments between a namespace root and an item name.
///
/// Opaque to every component except this crate: callers thread it through
/// by value and hand it back for key derivation. A token of depth zero means
/// "no namespace" and contributes nothing to derived keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct FolderToken {
    segments: Vec<String>,
}

impl FolderToken {
    /// The empty token (flat namespace)
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Render as a key prefix: `"a/b/"` for segments `[a, b]`, `""` when empty
    #[must_use]
    pub fn as_prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in &self.segments {
            prefix.push_str(segment);
            prefix.push('/');
        }
        prefix
    }
}

impl From<&str> for FolderToken {
    fn from(prefix: &str) -> Self {
        let segments = prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self { segments }
    }
}

impl From<String> for FolderToken {
    fn from(prefix: String) -> Self {
        Self::from(prefix.as_str())
    }
}

impl From<FolderToken> for String {
    fn from(token: FolderToken) -> Self {
        token.as_prefix()
    }
}

impl std::fmt::Display for FolderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_prefix())
    }
}

/// Extract the folder token and extension-stripped basename from an input key.
///
/// For `pdf/a/b/myfile.pdf` with root `pdf/` this yields `([a, b], "myfile")`;
/// for `pdf/myfile.pdf` it yields `([], "myfile")`.
pub fn extract_token(input_key: &str, root_prefix: &str) -> Result<(FolderToken, String)> {
    let remainder = input_key.strip_prefix(root_prefix).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{input_key}' does not start with root prefix '{root_prefix}'"
        ))
    })?;

    let (token, file_name) = match remainder.rsplit_once('/') {
        Some((dirs, name)) => (FolderToken::from(dirs), name),
        None => (FolderToken::root(), remainder),
    };

    if file_name.is_empty() {
        return Err(CodecError::MalformedKey(format!(
            "key '{input_key}' has no basename after root prefix '{root_prefix}'"
        )));
    }

    let basename = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _ext)| stem);

    Ok((token, basename.to_string()))
}

/// Join a root prefix, a token, and trailing item segments into one key.
///
/// The empty token inserts nothing, so `derive_key(root, &empty, segs)` is
/// exactly `root + segs.join("/")` (the backward-compatibility law).
#[must_use]
pub fn derive_key(root_prefix: &str, token: &FolderToken, segments: &[&str]) -> String {
    let tail = segments.join("/");
    let mut key = String::with_capacity(root_prefix.len() + tail.len() + 16);
    key.push_str(root_prefix);
    key.push_str(&token.as_prefix());
    key.push_str(&tail);
    key
}

/// Recover the token from a derived key by segment position.
///
/// Splits the remainder after `root_prefix` and takes all but the last
/// `known_suffix_segment_count` segments. Only valid when every component
/// agrees on the suffix segment count for that key shape; temp-area item
/// keys always have exactly two (basename directory, file name).
pub fn recover_token(
    key: &str,
    root_prefix: &str,
    known_suffix_segment_count: usize,
) -> Result<FolderToken> {
    let remainder = key.strip_prefix(root_prefix).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' does not start with root prefix '{root_prefix}'"
        ))
    })?;

    let parts: Vec<&str> = remainder.split('/').collect();
    if parts.len() < known_suffix_segment_count {
        return Err(CodecError::MalformedKey(format!(
            "key '{key}' has {} segments after '{root_prefix}', expected at least {known_suffix_segment_count}",
            parts.len()
        )));
    }

    let token_segments = parts[..parts.len() - known_suffix_segment_count]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    Ok(FolderToken::new(token_segments))
}

/// Recover the token from a key whose final segment begins with a literal
/// marker, returning the token and the marker-stripped file name.
///
/// Used at the post-audit boundary on result keys of the shape
/// `{result_root}{token}COMPLIANT_{name}`, where the marker is guaranteed
/// to open the last segment.
pub fn recover_token_from_marker(
    key: &str,
    root_prefix: &str,
    marker: &str,
) -> Result<(FolderToken, String)> {
    let remainder = key.strip_prefix(root_prefix).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' does not start with root prefix '{root_prefix}'"
        ))
    })?;

    let (token, file_name) = match remainder.rsplit_once('/') {
        Some((dirs, name)) => (FolderToken::from(dirs), name),
        None => (FolderToken::root(), remainder),
    };

    let stripped = file_name.strip_prefix(marker).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' does not carry marker '{marker}' in its final segment"
        ))
    })?;

    Ok((token, stripped.to_string()))
}

/// Split a temp-area item key into (basename directory, item file name),
/// given the root and an explicitly known token.
///
/// For `temp/a/b/myfile/myfile_chunk_1.pdf` with root `temp/` and token
/// `[a, b]` this yields `("myfile", "myfile_chunk_1.pdf")`.
pub fn split_item_key(
    key: &str,
    root_prefix: &str,
    token: &FolderToken,
) -> Result<(String, String)> {
    let remainder = key.strip_prefix(root_prefix).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' does not start with root prefix '{root_prefix}'"
        ))
    })?;

    let prefix = token.as_prefix();
    let remainder = remainder.strip_prefix(prefix.as_str()).ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' does not carry token prefix '{prefix}' after '{root_prefix}'"
        ))
    })?;

    let (dir, name) = remainder.split_once('/').ok_or_else(|| {
        CodecError::MalformedKey(format!(
            "key '{key}' has no item directory under '{root_prefix}{prefix}'"
        ))
    })?;

    if dir.is_empty() || name.is_empty() {
        return Err(CodecError::MalformedKey(format!(
            "key '{key}' has an empty segment under '{root_prefix}{prefix}'"
        )));
    }

    Ok((dir.to_string(), name.to_string()))
}
