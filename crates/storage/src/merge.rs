//! Merge resolution
//!
//! Folds a newest-first run of versions into the visible value of a key.

use strata_core::{MergeOperator, OpKind, StrataResult};

use crate::memtable::StoredVersion;

/// Resolve the visible value from `versions`, newest first
///
/// Merge operands accumulate until a Put (base value) or Delete (no base)
/// is reached. A key whose newest visible version is a Delete reads as
/// absent.
pub fn resolve<'a, I>(
    key: &[u8],
    versions: I,
    operator: &dyn MergeOperator,
) -> StrataResult<Option<Vec<u8>>>
where
    I: IntoIterator<Item = &'a StoredVersion>,
{
    let mut operands: Vec<&[u8]> = Vec::new();
    let mut base: Option<&[u8]> = None;
    let mut seen_any = false;

    for version in versions {
        seen_any = true;
        match version.kind {
            OpKind::Merge => operands.push(&version.value),
            OpKind::Put => {
                base = Some(&version.value);
                break;
            }
            OpKind::Delete => break,
        }
    }

    if !seen_any {
        return Ok(None);
    }
    if operands.is_empty() {
        return Ok(base.map(<[u8]>::to_vec));
    }
    operands.reverse();
    operator.full_merge(key, base, &operands).map(Some)
}
