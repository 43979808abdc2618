//! Built-in merge operators

use crate::error::StrataResult;
use crate::traits::MergeOperator;

/// Concatenates operands onto the existing value
///
/// With a delimiter, pieces are joined by it. The default engine operator.
#[derive(Debug, Clone, Default)]
pub struct ConcatMergeOperator {
    delimiter: Vec<u8>,
}

impl ConcatMergeOperator {
    /// Plain concatenation
    pub fn new() -> Self {
        Self::default()
    }

    /// Join pieces with `delimiter`
    pub fn with_delimiter(delimiter: &[u8]) -> Self {
        ConcatMergeOperator {
            delimiter: delimiter.to_vec(),
        }
    }
}

impl MergeOperator for ConcatMergeOperator {
    fn name(&self) -> &str {
        "concat"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> StrataResult<Vec<u8>> {
        let mut out = existing.map(<[u8]>::to_vec).unwrap_or_default();
        let mut first = existing.is_none();
        for operand in operands {
            if !first {
                out.extend_from_slice(&self.delimiter);
            }
            out.extend_from_slice(operand);
            first = false;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_without_existing() {
        let op = ConcatMergeOperator::new();
        let out = op.full_merge(b"k", None, &[b"a", b"b"]).unwrap();
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_concat_with_delimiter() {
        let op = ConcatMergeOperator::with_delimiter(b",");
        let out = op.full_merge(b"k", Some(b"x"), &[b"y", b"z"]).unwrap();
        assert_eq!(out, b"x,y,z");
        let out = op.full_merge(b"k", None, &[b"y"]).unwrap();
        assert_eq!(out, b"y");
    }
}
