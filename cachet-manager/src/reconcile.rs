//! Sorted two-pointer reconciliation diff.
//!
//! After an ordered batch fetch, the ids the secondary store did *not*
//! return are confirmed absent and become negative-cache writes. The diff
//! walks the ascending requested ids and the ascending returned ids in
//! lockstep, which also enforces the ordered-fetch contract: anything
//! other than a strictly ascending, duplicate-free subsequence of the
//! requested ids is a contract violation, not data.

use std::cmp::Ordering;

use cachet_core::StoreError;

/// Compute the requested ids missing from an ordered fetch result.
///
/// `requested` must be sorted strictly ascending (callers dedupe through a
/// `BTreeSet`). Generic over any ordered key type.
///
/// # Errors
///
/// Returns [`StoreError::ContractViolation`] when `returned` is not a
/// strictly ascending, duplicate-free subsequence of `requested`.
pub fn sorted_absent_diff<K: Ord + Clone>(
    requested: &[K],
    returned: &[K],
) -> Result<Vec<K>, StoreError> {
    debug_assert!(requested.windows(2).all(|w| w[0] < w[1]));

    let mut absent = Vec::new();
    let mut r = 0;
    for id in requested {
        if r == returned.len() {
            // Returned ids exhausted: every remaining requested id is absent.
            absent.push(id.clone());
            continue;
        }
        match returned[r].cmp(id) {
            Ordering::Equal => r += 1,
            Ordering::Greater => absent.push(id.clone()),
            Ordering::Less => {
                return Err(StoreError::ContractViolation {
                    reason: format!(
                        "returned id at position {r} is out of order, duplicated, or was never requested"
                    ),
                });
            }
        }
    }
    if r != returned.len() {
        return Err(StoreError::ContractViolation {
            reason: format!(
                "{} trailing returned id(s) were never requested",
                returned.len() - r
            ),
        });
    }
    Ok(absent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_interleaved_absences() {
        let requested = vec![1, 2, 3, 4, 5, 6, 7];
        let returned = vec![2, 4, 6];
        assert_eq!(
            sorted_absent_diff(&requested, &returned).unwrap(),
            vec![1, 3, 5, 7]
        );
    }

    #[test]
    fn test_all_present() {
        let requested = vec![1, 2, 3];
        assert!(sorted_absent_diff(&requested, &requested).unwrap().is_empty());
    }

    #[test]
    fn test_none_present() {
        let requested = vec![10, 20];
        assert_eq!(
            sorted_absent_diff::<u64>(&requested, &[]).unwrap(),
            vec![10, 20]
        );
    }

    #[test]
    fn test_empty_request() {
        assert!(sorted_absent_diff::<u64>(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_tail_is_absent() {
        let requested = vec![1, 2, 3, 4];
        let returned = vec![1, 2];
        assert_eq!(
            sorted_absent_diff(&requested, &returned).unwrap(),
            vec![3, 4]
        );
    }

    #[test]
    fn test_string_keys() {
        let requested = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let returned = vec!["b".to_string()];
        assert_eq!(
            sorted_absent_diff(&requested, &returned).unwrap(),
            vec!["a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_duplicate_returned_id_is_violation() {
        let requested = vec![1, 2, 3];
        let returned = vec![2, 2];
        assert!(sorted_absent_diff(&requested, &returned).is_err());
    }

    #[test]
    fn test_unsorted_returned_is_violation() {
        let requested = vec![1, 2, 3];
        let returned = vec![3, 1];
        assert!(sorted_absent_diff(&requested, &returned).is_err());
    }

    #[test]
    fn test_foreign_returned_id_is_violation() {
        let requested = vec![2, 4];
        let returned = vec![2, 3];
        assert!(sorted_absent_diff(&requested, &returned).is_err());
    }

    proptest! {
        /// The diff agrees with set difference for any valid fetch result.
        #[test]
        fn prop_diff_matches_set_difference(
            requested in proptest::collection::btree_set(0u64..500, 0..60),
            mask in proptest::collection::vec(any::<bool>(), 60),
        ) {
            let requested: Vec<u64> = requested.into_iter().collect();
            let returned: Vec<u64> = requested
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(id, _)| *id)
                .collect();

            let absent = sorted_absent_diff(&requested, &returned).unwrap();

            let returned_set: BTreeSet<u64> = returned.iter().copied().collect();
            let expected: Vec<u64> = requested
                .iter()
                .filter(|id| !returned_set.contains(id))
                .copied()
                .collect();
            prop_assert_eq!(absent, expected);
        }
    }
}
