use hashbrown::{HashMap, HashSet};
use mordant::PlayerId;

/// Tracks who has been told about whom.
///
/// `known_players[A]` is the set of players A currently sees; `known_by[B]`
/// is the inverse index: everyone who sees B. The two are kept in lockstep,
/// which turns disconnect cost into O(degree) instead of a scan over every
/// player on the server.
///
/// Because view range is symmetric, the relation is maintained symmetrically:
/// an update that lets A see B also lets B see A. The observer's set always
/// equals the candidate set after `update` returns.
pub struct VisibilityTracker {
    known_players: HashMap<PlayerId, HashSet<PlayerId>>,
    known_by: HashMap<PlayerId, HashSet<PlayerId>>,

    // Diff scratch, reused across calls.
    entered: Vec<PlayerId>,
    left: Vec<PlayerId>,
}

impl VisibilityTracker {
    pub fn new() -> VisibilityTracker {
        VisibilityTracker {
            known_players: HashMap::new(),
            known_by: HashMap::new(),
            entered: Vec::new(),
            left: Vec::new(),
        }
    }

    /// Reconciles the observer's known set against the candidate set of
    /// players currently in range. Returns `(entered, left)`: candidates the
    /// observer did not know yet, and known players no longer in range.
    ///
    /// The returned slices borrow internal scratch buffers and are valid
    /// until the next call.
    pub fn update(
        &mut self,
        observer: PlayerId,
        candidates: &HashSet<PlayerId>,
    ) -> (&[PlayerId], &[PlayerId]) {
        debug_assert!(!candidates.contains(&observer), "Observer cannot see itself");

        {
            let known = self
                .known_players
                .entry(observer)
                .or_insert_with(HashSet::new);

            self.entered.clear();
            self.left.clear();

            for &candidate in candidates.iter() {
                if !known.contains(&candidate) {
                    self.entered.push(candidate);
                }
            }

            for &known_id in known.iter() {
                if !candidates.contains(&known_id) {
                    self.left.push(known_id);
                }
            }
        }

        for &entered in self.entered.iter() {
            self.known_players
                .entry(observer)
                .or_insert_with(HashSet::new)
                .insert(entered);
            self.known_by
                .entry(entered)
                .or_insert_with(HashSet::new)
                .insert(observer);

            self.known_players
                .entry(entered)
                .or_insert_with(HashSet::new)
                .insert(observer);
            self.known_by
                .entry(observer)
                .or_insert_with(HashSet::new)
                .insert(entered);
        }

        for &left in self.left.iter() {
            if let Some(known) = self.known_players.get_mut(&observer) {
                known.remove(&left);
            }
            if let Some(observers) = self.known_by.get_mut(&left) {
                observers.remove(&observer);
            }

            if let Some(known) = self.known_players.get_mut(&left) {
                known.remove(&observer);
            }
            if let Some(observers) = self.known_by.get_mut(&observer) {
                observers.remove(&left);
            }
        }

        (&self.entered, &self.left)
    }

    /// Drops a player from the tracker, severing every edge in both
    /// directions. O(degree of the player).
    pub fn remove_player(&mut self, id: PlayerId) {
        if let Some(observers) = self.known_by.remove(&id) {
            for observer in observers {
                if let Some(known) = self.known_players.get_mut(&observer) {
                    known.remove(&id);
                }
            }
        }

        if let Some(known) = self.known_players.remove(&id) {
            for known_id in known {
                if let Some(observers) = self.known_by.get_mut(&known_id) {
                    observers.remove(&id);
                }
            }
        }
    }

    /// True when `observer` has been told about `target`.
    #[inline]
    pub fn knows(&self, observer: PlayerId, target: PlayerId) -> bool {
        self.known_players
            .get(&observer)
            .map_or(false, |known| known.contains(&target))
    }

    /// Everyone currently seeing `id`, collected into `out` (cleared first).
    pub fn observers_of(&self, id: PlayerId, out: &mut Vec<PlayerId>) {
        out.clear();

        if let Some(observers) = self.known_by.get(&id) {
            out.extend(observers.iter().copied());
        }
    }

    /// Checks the bidirectional invariant. Test support.
    #[cfg(test)]
    fn check_invariants(&self) {
        for (&a, known) in self.known_players.iter() {
            for &b in known.iter() {
                assert!(
                    self.known_by.get(&b).map_or(false, |obs| obs.contains(&a)),
                    "{} knows {} but the inverse index disagrees",
                    a,
                    b
                );
            }
        }

        for (&b, observers) in self.known_by.iter() {
            for &a in observers.iter() {
                assert!(
                    self.known_players
                        .get(&a)
                        .map_or(false, |known| known.contains(&b)),
                    "{} is known_by {} but the forward index disagrees",
                    b,
                    a
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[PlayerId]) -> HashSet<PlayerId> {
        ids.iter().copied().collect()
    }

    fn sorted(slice: &[PlayerId]) -> Vec<PlayerId> {
        let mut out = slice.to_vec();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_first_update_enters_everything() {
        let mut tracker = VisibilityTracker::new();

        let (entered, left) = tracker.update(1, &set(&[2, 3]));

        assert_eq!(sorted(entered), vec![2, 3]);
        assert!(left.is_empty());
        tracker.check_invariants();
    }

    #[test]
    fn test_update_post_state_matches_candidates() {
        let mut tracker = VisibilityTracker::new();

        tracker.update(1, &set(&[2, 3, 4]));
        tracker.update(1, &set(&[3, 5]));

        assert!(!tracker.knows(1, 2));
        assert!(tracker.knows(1, 3));
        assert!(!tracker.knows(1, 4));
        assert!(tracker.knows(1, 5));
        tracker.check_invariants();
    }

    #[test]
    fn test_update_reports_diffs() {
        let mut tracker = VisibilityTracker::new();
        tracker.update(1, &set(&[2, 3]));

        let (entered, left) = tracker.update(1, &set(&[3, 4]));

        assert_eq!(sorted(entered), vec![4]);
        assert_eq!(sorted(left), vec![2]);
    }

    #[test]
    fn test_relation_is_symmetric() {
        let mut tracker = VisibilityTracker::new();
        tracker.update(1, &set(&[2]));

        assert!(tracker.knows(1, 2));
        assert!(tracker.knows(2, 1));
        tracker.check_invariants();

        tracker.update(1, &set(&[]));

        assert!(!tracker.knows(1, 2));
        assert!(!tracker.knows(2, 1));
        tracker.check_invariants();
    }

    #[test]
    fn test_no_diff_on_stable_set() {
        let mut tracker = VisibilityTracker::new();
        tracker.update(1, &set(&[2, 3]));

        let (entered, left) = tracker.update(1, &set(&[2, 3]));

        assert!(entered.is_empty());
        assert!(left.is_empty());
    }

    #[test]
    fn test_remove_player_severs_both_directions() {
        let mut tracker = VisibilityTracker::new();
        tracker.update(1, &set(&[2, 3]));
        tracker.update(4, &set(&[1]));

        let mut observers = Vec::new();
        tracker.observers_of(1, &mut observers);
        assert_eq!(sorted(&observers), vec![2, 3, 4]);

        tracker.remove_player(1);

        assert!(!tracker.knows(2, 1));
        assert!(!tracker.knows(3, 1));
        assert!(!tracker.knows(4, 1));
        tracker.observers_of(1, &mut observers);
        assert!(observers.is_empty());
        tracker.check_invariants();
    }

    #[test]
    fn test_scratch_reuse_across_calls() {
        let mut tracker = VisibilityTracker::new();

        tracker.update(1, &set(&[2]));
        let (entered, _) = tracker.update(1, &set(&[2, 3]));
        assert_eq!(sorted(entered), vec![3]);

        let (entered, left) = tracker.update(1, &set(&[]));
        assert!(entered.is_empty());
        assert_eq!(sorted(left), vec![2, 3]);
    }
}
