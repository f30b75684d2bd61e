use std::collections::BTreeSet;

use super::EpisodeState;

/// Computes which episodes a TV subscription still needs.
pub struct EpisodeGapTracker;

impl EpisodeGapTracker {
    /// Remaining episodes after removing those the library reports present.
    ///
    /// Without a persisted set the gap is seeded from `current..=total`
    /// (or `1..=total`). The result only ever shrinks: an episode dropped
    /// once is never added back, and an absent report leaves the set as is.
    pub fn remaining(
        state: &EpisodeState,
        library_report: Option<&BTreeSet<u32>>,
        target_total: u32,
    ) -> BTreeSet<u32> {
        let tracked = match &state.lack_episodes {
            Some(lack) => lack.clone(),
            None => {
                let first = state.current_episode.unwrap_or(1).max(1);
                (first..=target_total).collect()
            }
        };

        match library_report {
            Some(present) => tracked.difference(present).copied().collect(),
            None => tracked,
        }
    }

    pub fn is_complete(remaining: &BTreeSet<u32>) -> bool {
        remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(lack: Option<&[u32]>, current: Option<u32>) -> EpisodeState {
        EpisodeState {
            lack_episodes: lack.map(|l| l.iter().copied().collect()),
            current_episode: current,
        }
    }

    #[test]
    fn test_seed_from_total() {
        let remaining = EpisodeGapTracker::remaining(&state(None, None), None, 4);
        assert_eq!(remaining, BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn test_seed_from_current_episode() {
        let remaining = EpisodeGapTracker::remaining(&state(None, Some(3)), None, 5);
        assert_eq!(remaining, BTreeSet::from([3, 4, 5]));
    }

    #[test]
    fn test_library_report_removes_present() {
        let library = BTreeSet::from([1, 2]);
        let remaining = EpisodeGapTracker::remaining(&state(Some(&[2, 3, 4]), None), Some(&library), 10);
        assert_eq!(remaining, BTreeSet::from([3, 4]));
    }

    #[test]
    fn test_never_readds_dropped_episodes() {
        // the persisted set wins over the total: 1 and 2 stay dropped
        let remaining = EpisodeGapTracker::remaining(&state(Some(&[3]), None), Some(&BTreeSet::new()), 10);
        assert_eq!(remaining, BTreeSet::from([3]));
    }

    #[test]
    fn test_shrink_only_across_growing_reports() {
        let initial = state(None, None);
        let report_1 = BTreeSet::from([1]);
        let report_2 = BTreeSet::from([1, 2, 5]);

        let remaining_1 = EpisodeGapTracker::remaining(&initial, Some(&report_1), 6);
        let next = EpisodeState {
            lack_episodes: Some(remaining_1.clone()),
            current_episode: None,
        };
        let remaining_2 = EpisodeGapTracker::remaining(&next, Some(&report_2), 6);

        assert!(remaining_2.is_subset(&remaining_1));
        assert_eq!(remaining_2, BTreeSet::from([3, 4, 6]));
    }

    #[test]
    fn test_complete_when_empty() {
        let library: BTreeSet<u32> = (1..=3).collect();
        let remaining = EpisodeGapTracker::remaining(&state(None, None), Some(&library), 3);
        assert!(EpisodeGapTracker::is_complete(&remaining));
    }
}
