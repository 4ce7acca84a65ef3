//! Planning which sub-ranges must actually be fetched.

use tracery_filters::Filter;
use tracery_intervals::{BlockInterval, IntervalSet};

/// One filter's outstanding work within a requested interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilterPlan {
    /// Position of the filter in the sync's filter list.
    pub filter_index: usize,
    /// Ranges not yet cached for this filter.
    pub required: IntervalSet,
}

/// Computes per-filter required ranges: the requested interval minus what is
/// cached, clamped to the filter's own block bounds.
pub(crate) fn plan_required(
    filters: &[Filter],
    cached: &[IntervalSet],
    requested: BlockInterval,
) -> Vec<FilterPlan> {
    debug_assert_eq!(filters.len(), cached.len());

    filters
        .iter()
        .zip(cached)
        .enumerate()
        .filter_map(|(filter_index, (filter, cached_set))| {
            let from = requested.from.max(filter.from_block().unwrap_or(0));
            let to = requested.to.min(filter.to_block().unwrap_or(u64::MAX));
            if from > to {
                return None;
            }

            let required = IntervalSet::single(from, to).difference(cached_set);
            if required.is_empty() {
                None
            } else {
                Some(FilterPlan {
                    filter_index,
                    required,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, B256};
    use tracery_test_utils::make_log_filter;

    use super::*;

    fn make_filter() -> Filter {
        make_log_filter(
            1,
            address!("00000000000000000000000000000000000000aa"),
            B256::repeat_byte(0xdd),
        )
    }

    #[test]
    fn test_uncached_filter_requires_whole_interval() {
        let filters = vec![make_filter()];
        let cached = vec![IntervalSet::new()];
        let plans = plan_required(&filters, &cached, BlockInterval::new(1, 100));

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].required, IntervalSet::single(1, 100));
    }

    #[test]
    fn test_fully_cached_filter_is_skipped() {
        let filters = vec![make_filter()];
        let cached = vec![IntervalSet::single(1, 100)];
        let plans = plan_required(&filters, &cached, BlockInterval::new(1, 100));
        assert!(plans.is_empty());
    }

    #[test]
    fn test_partially_cached_filter_requires_holes() {
        let filters = vec![make_filter()];
        let cached = vec![IntervalSet::single(20, 40)];
        let plans = plan_required(&filters, &cached, BlockInterval::new(1, 100));

        assert_eq!(plans[0].required.as_slice().len(), 2);
        assert!(plans[0].required.contains(1));
        assert!(!plans[0].required.contains(30));
        assert!(plans[0].required.contains(100));
    }

    #[test]
    fn test_filter_bounds_clamp_requested_interval() {
        let Filter::Log(mut log_filter) = make_filter() else {
            unreachable!();
        };
        log_filter.from_block = Some(50);
        log_filter.to_block = Some(60);
        let filters = vec![Filter::Log(log_filter)];
        let cached = vec![IntervalSet::new()];

        let plans = plan_required(&filters, &cached, BlockInterval::new(1, 100));
        assert_eq!(plans[0].required, IntervalSet::single(50, 60));
    }

    #[test]
    fn test_filter_outside_interval_is_skipped() {
        let Filter::Log(mut log_filter) = make_filter() else {
            unreachable!();
        };
        log_filter.from_block = Some(500);
        let filters = vec![Filter::Log(log_filter)];
        let cached = vec![IntervalSet::new()];

        let plans = plan_required(&filters, &cached, BlockInterval::new(1, 100));
        assert!(plans.is_empty());
    }
}
