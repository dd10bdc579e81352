//! The encoded metric name syntax.
//!
//! A metric identifier is a run of segments separated by whitespace. Each segment is either a
//! plain name token, which is kept as part of the CloudWatch metric name, or a `key=value`
//! dimension. A trailing `*` on either kind of segment marks it as permutable: the metric is
//! submitted once with and once without that segment.
//!
//! ```text
//! identifier := segment (WS segment)*
//! segment    := dimension | nameToken
//! dimension  := key "=" value ["*"]
//! nameToken  := token ["*"]
//! ```
use thiserror::Error;

/// Default delimiter used when joining segments back together.
pub const NAME_TOKEN_DELIMITER: char = ' ';

/// Default separator between the key and the value of a dimension segment.
pub const NAME_DIMENSION_SEPARATOR: char = '=';

/// Default marker which, trailing a name token or a dimension, makes it permutable.
pub const NAME_PERMUTE_MARKER: char = '*';

/// Errors raised while validating parts of an encoded metric name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// A name token contains a reserved character or is empty.
    #[error("invalid name token {0:?}: must be non-empty, without whitespace, separator or inner permute marker")]
    InvalidNameToken(String),

    /// A dimension key or value contains a reserved character or is empty.
    #[error("invalid dimension part {0:?}: must be non-empty, without whitespace, separator or permute marker")]
    InvalidDimensionPart(String),
}

/// The set of special characters making up the encoded name syntax.
///
/// The three characters are overridden together. Whitespace always delimits segments in
/// addition to `delimiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syntax {
    pub delimiter: char,
    pub separator: char,
    pub permute_marker: char,
}

impl Default for Syntax {
    fn default() -> Self {
        Syntax {
            delimiter: NAME_TOKEN_DELIMITER,
            separator: NAME_DIMENSION_SEPARATOR,
            permute_marker: NAME_PERMUTE_MARKER,
        }
    }
}

impl Syntax {
    /// Splits an identifier into its non-empty segments.
    pub fn segments<'a>(&self, identifier: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let delimiter = self.delimiter;
        identifier
            .split(move |c: char| c.is_whitespace() || c == delimiter)
            .filter(|segment| !segment.is_empty())
    }

    /// Strips a single trailing permute marker, returning the bare segment and whether it
    /// was marked.
    pub fn strip_permute_marker<'a>(&self, segment: &'a str) -> (&'a str, bool) {
        match segment.strip_suffix(self.permute_marker) {
            Some(bare) => (bare, true),
            None => (segment, false),
        }
    }

    /// Splits a bare segment on the first separator, if there is one.
    pub fn split_dimension<'a>(&self, segment: &'a str) -> Option<(&'a str, &'a str)> {
        segment.split_once(self.separator)
    }

    /// Validates a single name token, which may end with the permute marker.
    pub fn validate_name_token<'a>(&self, token: &'a str) -> Result<&'a str, NameError> {
        let (bare, _) = self.strip_permute_marker(token);
        if bare.is_empty() || bare.chars().any(|c| self.is_reserved(c)) {
            return Err(NameError::InvalidNameToken(token.to_string()));
        }
        Ok(token)
    }

    /// Validates the key or the value of a dimension. The permute marker must already have
    /// been stripped.
    pub fn validate_dimension_part<'a>(&self, part: &'a str) -> Result<&'a str, NameError> {
        if part.is_empty() || part.chars().any(|c| self.is_reserved(c)) {
            return Err(NameError::InvalidDimensionPart(part.to_string()));
        }
        Ok(part)
    }

    /// Rewrites arbitrary text into a valid dimension part by replacing every reserved
    /// character with an underscore.
    pub fn sanitize_dimension_part(&self, part: &str) -> String {
        if part.is_empty() {
            return "_".to_string();
        }
        let mut out = String::with_capacity(part.len());
        for c in part.chars() {
            if self.is_reserved(c) {
                out.push('_');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[inline]
    fn is_reserved(&self, c: char) -> bool {
        c.is_whitespace() || c == self.delimiter || c == self.separator || c == self.permute_marker
    }
}
