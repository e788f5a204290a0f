//! Comparator contract for the sorting engine.
//!
//! The engine orders elements through a strict weak less-than plus two
//! sentinel values bracketing every real element. The sentinels pad the tail
//! block of a run and keep the merge inner loops free of bounds checks, so
//! they are part of the on-disk layout, not a convenience.

/// Strict weak ordering with sentinels: `min_value() <= e <= max_value()`
/// must hold for every element `e` fed to the engine.
///
/// `Send + Sync` because the in-run sort may fan the comparator out over
/// worker threads.
pub trait SentinelCmp<T>: Clone + Send + Sync {
    /// Strict weak less-than.
    fn less(&self, a: &T, b: &T) -> bool;

    /// A value no real element compares less than.
    fn min_value(&self) -> T;

    /// A value no real element compares greater than.
    fn max_value(&self) -> T;
}

/// Validates the sentinel contract at construction time.
///
/// Panics if the comparator is not a strict weak order over its own
/// sentinels.
pub fn verify_sentinel_order<T, C: SentinelCmp<T>>(cmp: &C) {
    let min = cmp.min_value();
    let max = cmp.max_value();
    assert!(!cmp.less(&min, &min), "cmp(MIN, MIN) must be false");
    assert!(cmp.less(&min, &max), "cmp(MIN, MAX) must be true");
    assert!(!cmp.less(&max, &min), "cmp(MAX, MIN) must be false");
    assert!(!cmp.less(&max, &max), "cmp(MAX, MAX) must be false");
}

/// `std::cmp::Ordering` bridge for sort routines that want a three-way
/// comparison.
pub(crate) fn ordering<T, C: SentinelCmp<T>>(cmp: &C, a: &T, b: &T) -> std::cmp::Ordering {
    if cmp.less(a, b) {
        std::cmp::Ordering::Less
    } else if cmp.less(b, a) {
        std::cmp::Ordering::Greater
    } else {
        std::cmp::Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct U32Less;

    impl SentinelCmp<u32> for U32Less {
        fn less(&self, a: &u32, b: &u32) -> bool {
            a < b
        }
        fn min_value(&self) -> u32 {
            0
        }
        fn max_value(&self) -> u32 {
            u32::MAX
        }
    }

    #[derive(Clone)]
    struct BrokenCmp;

    impl SentinelCmp<u32> for BrokenCmp {
        fn less(&self, a: &u32, b: &u32) -> bool {
            a <= b
        }
        fn min_value(&self) -> u32 {
            0
        }
        fn max_value(&self) -> u32 {
            u32::MAX
        }
    }

    #[test]
    fn accepts_strict_weak_order() {
        verify_sentinel_order(&U32Less);
    }

    #[test]
    #[should_panic(expected = "cmp(MIN, MIN) must be false")]
    fn rejects_non_strict_order() {
        verify_sentinel_order(&BrokenCmp);
    }
}
