//! Key transforms
//!
//! An optional rewrite applied to every key read out of a backing table:
//! replace the backing table's key prefix, replace the comparator-defined
//! suffix, or both. Used to slice externally-built or replicated tables
//! into a different keyspace without rewriting their bytes.
//!
//! The prefix step is invertible: caller-supplied bounds and seek keys,
//! expressed in transformed space, are translated back into backing-table
//! space before any read. The suffix step is never inverted because read
//! bounds are always supplied already split at the user-key/suffix
//! boundary.

use crate::comparator::Comparator;
use crate::error::{Result, StrataError};

/// Replaces the backing table's key prefix with a new one.
///
/// Order preservation holds when all affected keys carry `strip`, which the
/// validation at view/ingest setup guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixReplacement {
    /// Prefix every backing key carries.
    pub strip: Vec<u8>,
    /// Prefix substituted in its place.
    pub replace: Vec<u8>,
}

impl PrefixReplacement {
    pub fn new(strip: impl Into<Vec<u8>>, replace: impl Into<Vec<u8>>) -> Self {
        Self {
            strip: strip.into(),
            replace: replace.into(),
        }
    }

    /// Backing space -> transformed space.
    fn apply(&self, key: &[u8]) -> Result<Vec<u8>> {
        let rest = key
            .strip_prefix(self.strip.as_slice())
            .ok_or(StrataError::PrefixMismatch)?;
        let mut out = Vec::with_capacity(self.replace.len() + rest.len());
        out.extend_from_slice(&self.replace);
        out.extend_from_slice(rest);
        Ok(out)
    }

    /// Transformed space -> backing space. Exact inverse of [`apply`].
    fn invert(&self, key: &[u8]) -> Result<Vec<u8>> {
        let rest = key
            .strip_prefix(self.replace.as_slice())
            .ok_or(StrataError::PrefixMismatch)?;
        let mut out = Vec::with_capacity(self.strip.len() + rest.len());
        out.extend_from_slice(&self.strip);
        out.extend_from_slice(rest);
        Ok(out)
    }
}

/// Optional key rewrite, absent by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyTransform {
    /// Keys pass through unchanged.
    #[default]
    None,
    /// Prefix substitution only.
    Prefix(PrefixReplacement),
    /// Suffix substitution only: the comparator-located suffix is replaced.
    Suffix(Vec<u8>),
    /// Both substitutions, prefix applied first.
    Both {
        prefix: PrefixReplacement,
        suffix: Vec<u8>,
    },
}

impl KeyTransform {
    pub fn is_none(&self) -> bool {
        matches!(self, KeyTransform::None)
    }

    /// Whether this transform rewrites suffixes.
    pub fn replaces_suffix(&self) -> bool {
        matches!(self, KeyTransform::Suffix(_) | KeyTransform::Both { .. })
    }

    /// Apply the full transform to a backing-space key.
    pub fn apply(&self, cmp: &dyn Comparator, key: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyTransform::None => Ok(key.to_vec()),
            KeyTransform::Prefix(p) => p.apply(key),
            KeyTransform::Suffix(s) => Ok(substitute_suffix(cmp, key, s)),
            KeyTransform::Both { prefix, suffix } => {
                let rewritten = prefix.apply(key)?;
                Ok(substitute_suffix(cmp, &rewritten, suffix))
            }
        }
    }

    /// Invert the prefix step only, translating a transformed-space key
    /// (bound or seek key, already split at the suffix boundary) into
    /// backing space.
    pub fn invert_prefix(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyTransform::None | KeyTransform::Suffix(_) => Ok(key.to_vec()),
            KeyTransform::Prefix(p) | KeyTransform::Both { prefix: p, .. } => p.invert(key),
        }
    }
}

/// Split `key` at the comparator-defined suffix boundary and append the
/// replacement suffix.
fn substitute_suffix(cmp: &dyn Comparator, key: &[u8], suffix: &[u8]) -> Vec<u8> {
    let n = cmp.split(key);
    let mut out = Vec::with_capacity(n + suffix.len());
    out.extend_from_slice(&key[..n]);
    out.extend_from_slice(suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BytewiseComparator, SeparatorSuffixComparator};

    #[test]
    fn prefix_apply_then_invert_is_identity() {
        let t = KeyTransform::Prefix(PrefixReplacement::new(b"old/".to_vec(), b"new/".to_vec()));
        let cmp = BytewiseComparator;
        let applied = t.apply(&cmp, b"old/key1").unwrap();
        assert_eq!(applied, b"new/key1");
        assert_eq!(t.invert_prefix(&applied).unwrap(), b"old/key1");
    }

    #[test]
    fn prefix_mismatch_is_an_error() {
        let t = KeyTransform::Prefix(PrefixReplacement::new(b"old/".to_vec(), b"new/".to_vec()));
        let cmp = BytewiseComparator;
        assert!(matches!(
            t.apply(&cmp, b"other/key"),
            Err(StrataError::PrefixMismatch)
        ));
        assert!(matches!(
            t.invert_prefix(b"other/key"),
            Err(StrataError::PrefixMismatch)
        ));
    }

    #[test]
    fn suffix_substitution_splits_at_comparator_boundary() {
        let cmp = SeparatorSuffixComparator::default();
        let t = KeyTransform::Suffix(b"@v9".to_vec());
        assert_eq!(t.apply(&cmp, b"key@v1").unwrap(), b"key@v9");
        // Suffix is never inverted.
        assert_eq!(t.invert_prefix(b"key@v9").unwrap(), b"key@v9");
    }

    #[test]
    fn both_applies_prefix_then_suffix() {
        let cmp = SeparatorSuffixComparator::default();
        let t = KeyTransform::Both {
            prefix: PrefixReplacement::new(b"a/".to_vec(), b"b/".to_vec()),
            suffix: b"@v2".to_vec(),
        };
        assert_eq!(t.apply(&cmp, b"a/key@v1").unwrap(), b"b/key@v2");
    }

    #[test]
    fn order_preserved_for_order_preserving_prefixes() {
        let t = KeyTransform::Prefix(PrefixReplacement::new(b"p/".to_vec(), b"q/".to_vec()));
        let cmp = BytewiseComparator;
        let keys: Vec<&[u8]> = vec![b"p/a", b"p/b", b"p/c"];
        let mapped: Vec<Vec<u8>> = keys.iter().map(|k| t.apply(&cmp, k).unwrap()).collect();
        for w in mapped.windows(2) {
            assert!(w[0] < w[1]);
        }
    }
}
