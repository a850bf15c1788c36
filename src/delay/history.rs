use std::usize;

use crate::delay::update_map::UpdateMap;
use crate::errors::{Error, Result};

/// Marks a history slot whose map has been fused into an earlier slot.
pub const CLEARED: usize = usize::MAX;
/// Marks the root of the `previous` chain.
pub const PAST_FIRST: usize = usize::MAX - 1;

/// Time-indexed log of update maps, one per staged step, with lazy suffix
/// composition over the slots that are still live.
///
/// Steps are never renumbered. Compaction (`fuse_prev`) folds a slot's map
/// into the nearest earlier live slot and marks the slot `CLEARED`; the
/// live slots form a doubly-linked chain so fusing is O(1). A suffix query
/// walks the chain once from the back and caches its cursor, so a batch of
/// queries in descending step order costs O(steps walked) overall.
#[derive(Debug, Clone)]
pub struct MapHistory {
    elements: Vec<UpdateMap>,
    previous: Vec<usize>,
    next: Vec<usize>,
    back: usize,
    // suffix cursor: composition of the maps at live slots in
    // [walk_slot, back], valid while `revision` is unchanged
    revision: usize,
    walk_revision: usize,
    walk_slot: usize,
    walk_map: UpdateMap,
}

impl MapHistory {
    /// A fresh history holding the identity root at step 0.
    pub fn new() -> Self {
        MapHistory {
            elements: vec![UpdateMap::identity()],
            previous: vec![PAST_FIRST],
            next: vec![CLEARED],
            back: 0,
            revision: 0,
            walk_revision: CLEARED,
            walk_slot: 0,
            walk_map: UpdateMap::identity(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// The most recent live slot.
    pub fn back_step(&self) -> usize {
        self.back
    }

    pub fn back(&self) -> &UpdateMap {
        &self.elements[self.back]
    }

    pub fn is_cleared(&self, step: usize) -> bool {
        self.previous[step] == CLEARED
    }

    pub fn get(&self, step: usize) -> Result<&UpdateMap> {
        self.check_step(step)?;
        Ok(&self.elements[step])
    }

    /// The nearest earlier live step, or `PAST_FIRST` at the root.
    pub fn previous_step(&self, step: usize) -> Result<usize> {
        self.check_step(step)?;
        Ok(self.previous[step])
    }

    pub fn push_back(&mut self, map: UpdateMap) {
        let step = self.elements.len();
        self.elements.push(map);
        self.previous.push(self.back);
        self.next.push(CLEARED);
        self.next[self.back] = step;
        self.back = step;
        self.revision += 1;
    }

    /// Fold the map at `step` into the nearest earlier live slot, preserving
    /// the overall composition, and mark `step` as `CLEARED`.
    pub fn fuse_prev(&mut self, step: usize) -> Result<()> {
        self.check_step(step)?;
        let prev = self.previous[step];
        if prev == PAST_FIRST {
            return Err(Error::OutOfRange {
                domain: "map history previous step",
                index: step,
                len: self.elements.len(),
            });
        }
        self.elements[prev] = self.elements[step].compose(&self.elements[prev]);
        let next = self.next[step];
        self.next[prev] = next;
        if next != CLEARED {
            self.previous[next] = prev;
        }
        if self.back == step {
            self.back = prev;
        }
        self.previous[step] = CLEARED;
        self.next[step] = CLEARED;
        self.revision += 1;
        Ok(())
    }

    /// Composition of the maps at all live slots at or above `step`
    /// (identity when there is none), i.e. the total update staged since
    /// step `step - 1`.
    pub fn suffix(&mut self, step: usize) -> Result<UpdateMap> {
        if step > self.elements.len() {
            return Err(Error::OutOfRange {
                domain: "map history",
                index: step,
                len: self.elements.len(),
            });
        }
        if self.back < step {
            return Ok(UpdateMap::identity());
        }
        let (mut slot, mut map) =
            if self.walk_revision == self.revision && self.walk_slot >= step {
                (self.walk_slot, self.walk_map)
            } else {
                (self.back, self.elements[self.back])
            };
        loop {
            let prev = self.previous[slot];
            if prev == PAST_FIRST || prev < step {
                break;
            }
            map = map.compose(&self.elements[prev]);
            slot = prev;
        }
        self.walk_revision = self.revision;
        self.walk_slot = slot;
        self.walk_map = map;
        Ok(map)
    }

    /// Fuse every live slot in `(bottom, top]` into the earliest of them, so
    /// the range is represented by a single slot holding its composition.
    pub fn condense(&mut self, top: usize, bottom: usize) -> Result<()> {
        let mut slot = self.back;
        while slot != PAST_FIRST && slot > top {
            slot = self.previous[slot];
        }
        while slot != PAST_FIRST && self.previous[slot] != PAST_FIRST && self.previous[slot] > bottom
        {
            let prev = self.previous[slot];
            self.fuse_prev(slot)?;
            slot = prev;
        }
        Ok(())
    }

    fn check_step(&self, step: usize) -> Result<()> {
        if step >= self.elements.len() {
            return Err(Error::OutOfRange {
                domain: "map history",
                index: step,
                len: self.elements.len(),
            });
        }
        if self.is_cleared(step) {
            return Err(Error::ErasedHistory { step });
        }
        Ok(())
    }
}

impl Default for MapHistory {
    fn default() -> Self {
        MapHistory::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio::stats::LogProb;

    fn map(c: f64, k: f64) -> UpdateMap {
        UpdateMap::new(LogProb(c.ln()), LogProb(k.ln()))
    }

    fn example_history() -> MapHistory {
        let mut history = MapHistory::new();
        history.push_back(map(0.1, 0.9));
        history.push_back(map(0.2, 0.8));
        history.push_back(map(0.3, 0.7));
        history.push_back(map(0.4, 0.6));
        history
    }

    #[test]
    fn test_push_and_access() {
        let history = example_history();
        assert_eq!(history.len(), 5);
        assert_eq!(history.back_step(), 4);
        assert_relative_eq!(*history.get(2).unwrap().constant(), 0.2_f64.ln());
        assert_eq!(history.previous_step(3).unwrap(), 2);
        assert_eq!(history.previous_step(0).unwrap(), PAST_FIRST);
    }

    #[test]
    fn test_suffix_composes_in_application_order() {
        let mut history = example_history();
        let expected = history
            .get(4)
            .unwrap()
            .compose(&history.get(3).unwrap().compose(history.get(2).unwrap()));
        let suffix = history.suffix(2).unwrap();
        let x = LogProb(0.5_f64.ln());
        assert_relative_eq!(*suffix.apply(x), *expected.apply(x), epsilon = 1e-12);
        // past the back the suffix is empty
        assert!(history.suffix(5).unwrap().is_identity());
    }

    #[test]
    fn test_suffix_cursor_descends() {
        let mut history = example_history();
        let low = history.suffix(1).unwrap();
        // a later query higher up restarts the walk and must agree
        let again = history.suffix(1).unwrap();
        assert_eq!(low, again);
        let x = LogProb(0.25_f64.ln());
        let step_by_step = history
            .get(4)
            .unwrap()
            .apply(history.get(3).unwrap().apply(
                history
                    .get(2)
                    .unwrap()
                    .apply(history.get(1).unwrap().apply(x)),
            ));
        assert_relative_eq!(*low.apply(x), *step_by_step, epsilon = 1e-12);
    }

    #[test]
    fn test_fuse_prev_preserves_composition() {
        let mut history = example_history();
        let x = LogProb(0.5_f64.ln());
        let before = history.suffix(1).unwrap().apply(x);
        history.fuse_prev(3).unwrap();
        assert!(history.is_cleared(3));
        assert_eq!(history.get(3), Err(Error::ErasedHistory { step: 3 }));
        assert_eq!(history.previous_step(4).unwrap(), 2);
        let after = history.suffix(1).unwrap().apply(x);
        assert_relative_eq!(*before, *after, epsilon = 1e-12);
    }

    #[test]
    fn test_fuse_back_moves_back() {
        let mut history = example_history();
        history.fuse_prev(4).unwrap();
        assert_eq!(history.back_step(), 3);
        history.push_back(map(0.5, 0.5));
        assert_eq!(history.back_step(), 5);
        assert_eq!(history.previous_step(5).unwrap(), 3);
    }

    #[test]
    fn test_fuse_root_is_rejected() {
        let mut history = example_history();
        assert!(history.fuse_prev(0).is_err());
    }

    #[test]
    fn test_condense_range() {
        let mut history = example_history();
        let x = LogProb(0.5_f64.ln());
        let before = history.suffix(1).unwrap().apply(x);
        // (1, 4] collapses into slot 2
        history.condense(4, 1).unwrap();
        assert!(!history.is_cleared(1));
        assert!(!history.is_cleared(2));
        assert!(history.is_cleared(3));
        assert!(history.is_cleared(4));
        assert_eq!(history.back_step(), 2);
        let after = history.suffix(1).unwrap().apply(x);
        assert_relative_eq!(*before, *after, epsilon = 1e-12);
    }
}
