//! Commit-time validation for optimistic transactions
//!
//! Each tracked key carries the sequence it was observed at: the bound
//! snapshot's sequence, or the engine sequence at first touch. A key
//! conflicts when the base engine holds a newer write (put, merge or
//! delete) for it.
//!
//! Validation runs inside the base engine's write serialization, so a
//! passing check and the batch apply form one step.

use std::collections::BTreeMap;

use strata_core::{ColumnFamilyId, SequenceNumber, Storage, StrataError, StrataResult, TxnId};

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Key was written after the transaction observed it
    WriteAfterTrack {
        /// Column family of the key
        cf: ColumnFamilyId,
        /// The conflicting key
        key: Vec<u8>,
        /// Sequence the transaction observed
        tracked_sequence: SequenceNumber,
        /// Newest committed sequence at validation
        current_sequence: SequenceNumber,
    },
}

/// Result of transaction validation
///
/// A transaction commits only if `is_valid()` returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Successful validation
    pub fn ok() -> Self {
        Self::default()
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Convert into the error reported for `txn_id`, if any conflict was found
    pub fn into_result(self, txn_id: TxnId) -> StrataResult<()> {
        let conflicts = self.conflicts.len();
        match self.conflicts.into_iter().next() {
            None => Ok(()),
            Some(ConflictType::WriteAfterTrack { cf, key, .. }) => Err(StrataError::ConflictAborted {
                txn_id,
                conflicts,
                cf,
                key,
            }),
        }
    }
}

/// Check every tracked key against the current state of `storage`
///
/// Keys are visited in (column family, key) order so the first reported
/// conflict is deterministic.
pub fn validate_tracked_keys(
    tracked: &BTreeMap<(ColumnFamilyId, Vec<u8>), SequenceNumber>,
    storage: &dyn Storage,
) -> StrataResult<ValidationResult> {
    let mut result = ValidationResult::ok();
    for ((cf, key), tracked_sequence) in tracked {
        if let Some(current_sequence) = storage.latest_sequence(*cf, key)? {
            if current_sequence > *tracked_sequence {
                result.conflicts.push(ConflictType::WriteAfterTrack {
                    cf: *cf,
                    key: key.clone(),
                    tracked_sequence: *tracked_sequence,
                    current_sequence,
                });
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_ok() {
        let result = ValidationResult::ok();
        assert!(result.is_valid());
        assert!(result.into_result(1).is_ok());
    }

    #[test]
    fn test_conflicts_become_error() {
        let result = ValidationResult {
            conflicts: vec![
                ConflictType::WriteAfterTrack {
                    cf: ColumnFamilyId::DEFAULT,
                    key: b"a".to_vec(),
                    tracked_sequence: 1,
                    current_sequence: 3,
                },
                ConflictType::WriteAfterTrack {
                    cf: ColumnFamilyId::DEFAULT,
                    key: b"b".to_vec(),
                    tracked_sequence: 1,
                    current_sequence: 2,
                },
            ],
        };
        assert_eq!(result.conflict_count(), 2);
        match result.into_result(9) {
            Err(StrataError::ConflictAborted {
                txn_id, conflicts, key, ..
            }) => {
                assert_eq!(txn_id, 9);
                assert_eq!(conflicts, 2);
                assert_eq!(key, b"a".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
