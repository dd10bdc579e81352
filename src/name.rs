use std::fmt;
use std::str::FromStr;

use crate::datum::Dimension;
use crate::syntax::{NameError, Syntax};

/// Builder for encoded metric names.
///
/// Useful when a name is put together programmatically. A name that is already written out,
/// such as `"MyMetric SomeTag* color=green machine=1.2.3.4*"`, can be handed to the `metrics`
/// macros directly.
///
/// Name tokens keep the order they were added in. Dimensions are written after all name
/// tokens, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricNameBuilder {
    syntax: Syntax,
    names: Vec<String>,
    dimensions: Vec<String>,
}

impl MetricNameBuilder {
    /// Creates an empty [`MetricNameBuilder`] using the default syntax.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty [`MetricNameBuilder`] for a custom syntax.
    pub fn with_syntax(syntax: Syntax) -> Self {
        MetricNameBuilder {
            syntax,
            ..Default::default()
        }
    }

    /// Creates a builder holding every segment of `encoded`.
    ///
    /// ## Errors
    ///
    /// Fails on the first segment which is not valid.
    pub fn parse(encoded: &str) -> Result<Self, NameError> {
        Self::new().add(encoded)
    }

    /// Adds a single name token, which may end with the permute marker.
    ///
    /// ## Errors
    ///
    /// If the token is empty or contains a reserved character.
    pub fn add_name_token(mut self, token: &str) -> Result<Self, NameError> {
        let token = self.syntax.validate_name_token(token.trim())?;
        self.names.push(token.to_string());
        Ok(self)
    }

    /// Adds a single name token, forcing its permute marker on or off.
    ///
    /// ## Errors
    ///
    /// If the token is empty or contains a reserved character.
    pub fn add_name_token_permuted(self, token: &str, permute: bool) -> Result<Self, NameError> {
        let (bare, _) = self.syntax.strip_permute_marker(token.trim());
        if permute {
            let token = format!("{}{}", bare, self.syntax.permute_marker);
            self.add_name_token(&token)
        } else {
            self.add_name_token(bare)
        }
    }

    /// Adds a dimension.
    ///
    /// ## Errors
    ///
    /// If either the name or the value is empty or contains a reserved character.
    pub fn add_dimension(mut self, name: &str, value: &str, permute: bool) -> Result<Self, NameError> {
        self.syntax.validate_dimension_part(name)?;
        self.syntax.validate_dimension_part(value)?;

        let mut segment = String::with_capacity(name.len() + value.len() + 2);
        segment.push_str(name);
        segment.push(self.syntax.separator);
        segment.push_str(value);
        if permute {
            segment.push(self.syntax.permute_marker);
        }
        self.dimensions.push(segment);
        Ok(self)
    }

    /// Adds a required [`Dimension`].
    ///
    /// ## Errors
    ///
    /// If either part of the dimension is not valid.
    pub fn add_required_dimension(self, dimension: &Dimension) -> Result<Self, NameError> {
        self.add_dimension(&dimension.name, &dimension.value, false)
    }

    /// Adds every segment of an already encoded name.
    ///
    /// Segments are told apart the same way the exporter does it: a segment holding the
    /// separator is a dimension, anything else is a name token.
    ///
    /// ## Errors
    ///
    /// Fails on the first segment which is not valid. Segments before it have been added.
    pub fn add(mut self, encoded: &str) -> Result<Self, NameError> {
        let syntax = self.syntax;
        for segment in syntax.segments(encoded) {
            let (bare, permute) = syntax.strip_permute_marker(segment);
            self = match syntax.split_dimension(bare) {
                Some((name, value)) => self.add_dimension(name, value, permute)?,
                None => self.add_name_token(segment)?,
            };
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.dimensions.is_empty()
    }

    /// Returns the encoded name.
    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MetricNameBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in self.names.iter().chain(self.dimensions.iter()) {
            if first {
                first = false;
            } else {
                write!(f, "{}", self.syntax.delimiter)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for MetricNameBuilder {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
