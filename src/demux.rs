//! Demultiplexing of encoded metric identifiers.
//!
//! CloudWatch does not aggregate custom metrics over dimensions. To get similar convenience
//! a metric is submitted in duplicate, once for each combination of the optional parts of its
//! name. [`DemuxedKey`] parses an identifier such as
//! `"Requests route* color=green machine=1.2.3.4*"` and expands it into every concrete
//! (metric name, dimension set) pair.
use std::iter::FusedIterator;

use indexmap::IndexSet;

use crate::datum::{Dimension, MetricDatum};
use crate::syntax::Syntax;

/// An entry of a permutation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutable<T> {
    pub value: T,
    pub permutable: bool,
}

impl<T> Permutable<T> {
    pub fn required(value: T) -> Self {
        Permutable {
            value,
            permutable: false,
        }
    }

    pub fn optional(value: T) -> Self {
        Permutable {
            value,
            permutable: true,
        }
    }
}

/// Lazily yields every subset of a chain in which required entries are always present and
/// permutable entries are present or absent.
///
/// A chain with `k` permutable entries yields exactly `2^k` subsets. Entries keep their
/// relative order in every subset. The first subset is the one holding only the required
/// entries. Iteration never materializes more than the current subset, so calling
/// [`permutations`] again restarts from scratch.
#[derive(Debug, Clone)]
pub struct Permutations<'a, T> {
    chain: &'a [Permutable<T>],
    // inclusion flags of the permutable entries, least significant first
    mask: Vec<bool>,
    done: bool,
}

/// Returns the permutations of `chain`.
pub fn permutations<T>(chain: &[Permutable<T>]) -> Permutations<'_, T> {
    let permutable = chain.iter().filter(|entry| entry.permutable).count();
    Permutations {
        chain,
        mask: vec![false; permutable],
        done: false,
    }
}

impl<'a, T> Permutations<'a, T> {
    fn current(&self) -> Vec<&'a T> {
        let mut flags = self.mask.iter();
        self.chain
            .iter()
            .filter(|entry| !entry.permutable || flags.next().copied().unwrap_or(false))
            .map(|entry| &entry.value)
            .collect()
    }

    fn advance(&mut self) {
        for flag in self.mask.iter_mut() {
            if *flag {
                *flag = false;
            } else {
                *flag = true;
                return;
            }
        }
        // carried out of the last flag: every combination has been visited
        self.done = true;
    }

    fn remaining(&self) -> Option<usize> {
        if self.done {
            return Some(0);
        }
        let visited = self
            .mask
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .try_fold(0usize, |acc, (bit, _)| {
                1usize.checked_shl(bit as u32).map(|v| acc | v)
            })?;
        let total = 1usize.checked_shl(self.mask.len() as u32)?;
        Some(total - visited)
    }
}

impl<'a, T> Iterator for Permutations<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let subset = self.current();
        self.advance();
        Some(subset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining() {
            Some(n) => (n, Some(n)),
            None => (usize::MAX, None),
        }
    }
}

impl<'a, T> FusedIterator for Permutations<'a, T> {}

/// An encoded identifier split into its ordered name chain and its dimension chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxedKey {
    names: Vec<Permutable<String>>,
    dimensions: Vec<Permutable<Dimension>>,
}

impl DemuxedKey {
    /// Parses an identifier with the default [`Syntax`].
    pub fn parse(identifier: &str) -> Self {
        Self::parse_with(&Syntax::default(), identifier)
    }

    /// Parses an identifier.
    ///
    /// Parsing is lenient and never fails: identifiers reaching the exporter come from the
    /// registry and are taken as they are. Empty segments are skipped.
    pub fn parse_with(syntax: &Syntax, identifier: &str) -> Self {
        let mut names = Vec::new();
        let mut dimensions = Vec::new();

        for segment in syntax.segments(identifier) {
            // The marker is stripped before splitting so that it flags the whole dimension
            // and never ends up inside its value.
            let (segment, permutable) = syntax.strip_permute_marker(segment);

            if let Some((name, value)) = syntax.split_dimension(segment) {
                dimensions.push(Permutable {
                    value: Dimension::new(name, value),
                    permutable,
                });
            } else if !segment.is_empty() {
                names.push(Permutable {
                    value: segment.to_string(),
                    permutable,
                });
            }
        }

        DemuxedKey { names, dimensions }
    }

    pub fn names(&self) -> &[Permutable<String>] {
        &self.names
    }

    pub fn dimensions(&self) -> &[Permutable<Dimension>] {
        &self.dimensions
    }

    /// Expands this key into every datum it stands for.
    ///
    /// `type_dimension` is a required member of every dimension set. `specify` stamps the
    /// value of the metric onto each datum. Name combinations that leave no token at all are
    /// skipped.
    pub fn expand<F>(&self, type_dimension: Dimension, specify: F) -> Expansion<'_, F>
    where
        F: FnMut(MetricDatum) -> MetricDatum,
    {
        Expansion {
            names: permutations(&self.names),
            dimensions: &self.dimensions,
            type_dimension,
            current: None,
            specify,
        }
    }
}

/// Iterator returned by [`DemuxedKey::expand`]: the cartesian product of the non-empty name
/// permutations and the dimension permutations.
pub struct Expansion<'a, F> {
    names: Permutations<'a, String>,
    dimensions: &'a [Permutable<Dimension>],
    type_dimension: Dimension,
    current: Option<(String, Permutations<'a, Dimension>)>,
    specify: F,
}

impl<'a, F> Expansion<'a, F> {
    fn next_name(&mut self) -> Option<String> {
        for tokens in self.names.by_ref() {
            // CloudWatch metric names are always space separated, whatever the delimiter.
            let mut name = String::new();
            for token in tokens {
                if !name.is_empty() {
                    name.push(' ');
                }
                name.push_str(token);
            }
            if !name.trim().is_empty() {
                return Some(name);
            }
        }
        None
    }
}

impl<'a, F> Iterator for Expansion<'a, F>
where
    F: FnMut(MetricDatum) -> MetricDatum,
{
    type Item = MetricDatum;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((name, dimension_sets)) = self.current.as_mut() {
                if let Some(dimensions) = dimension_sets.next() {
                    let mut set = IndexSet::with_capacity(dimensions.len() + 1);
                    set.insert(self.type_dimension.clone());
                    set.extend(dimensions.into_iter().cloned());

                    let datum = MetricDatum::new(name.clone(), set);
                    return Some((self.specify)(datum));
                }
            }

            let name = self.next_name()?;
            self.current = Some((name, permutations(self.dimensions)));
        }
    }
}

impl<'a, F> FusedIterator for Expansion<'a, F> where F: FnMut(MetricDatum) -> MetricDatum {}
