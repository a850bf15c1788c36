// Copyright 2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Deferred evaluation of per-row forward updates.
//!
//! At each site the forward recurrence applies an affine log-space map to
//! every row of the previous column. Instead of doing so eagerly, a single
//! site map is staged into a shared [`history::MapHistory`] and rows are
//! grouped into equivalence classes that share one pending composed map.
//! A row's true value is only materialized when the row is consulted,
//! which happens when it carries the rare allele at the current site. This
//! drops the per-site cost from the cohort size to the rare-class size,
//! amortized, at the price of O(rows + steps) memory.

pub mod history;
pub mod update_map;

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::usize;

use bio::stats::LogProb;
use vec_map::VecMap;

use crate::delay::history::MapHistory;
use crate::delay::update_map::UpdateMap;
use crate::errors::{Error, Result};

/// Index of an update-equivalence class.
pub type Eqclass = usize;
/// Index of a cohort haplotype row.
pub type Row = usize;
/// Index of a staged history step.
pub type Step = usize;

const NO_EQCLASS: usize = usize::MAX;

/// The lazy update batching structure.
///
/// Every row belongs to exactly one equivalence class; a class stores the
/// composed map pending for its rows since `eqclass_last_updated`, and the
/// history stores one map per staged step. The true forward value of a row
/// is the class map, extended by the history suffix past its last update,
/// applied to the row's stored value. Classes that were last updated at the
/// same step form a doubly-linked list rooted in `rep_eqclass_of_site`, so
/// that a step whose list empties can have its history slot fused away.
#[derive(Debug, Clone)]
pub struct DelayedEvalMap {
    current_site: Step,
    current_step: Step,
    map_history: MapHistory,

    row_to_eqclass: Vec<Eqclass>,
    newest_eqclass: Option<Eqclass>,

    eqclass_to_map: Vec<UpdateMap>,
    eqclass_size: Vec<usize>,
    eqclass_last_updated: Vec<Step>,
    // emptied slots, recycled before the parallel arrays grow
    empty_eqclass_indices: Vec<Eqclass>,

    site_n_classes: BTreeMap<Step, usize>,
    rep_eqclass_of_site: VecMap<Eqclass>,
    site_class_list_above: Vec<Eqclass>,
    site_class_list_below: Vec<Eqclass>,
}

impl DelayedEvalMap {
    /// All rows start in a single identity class anchored at the root step.
    pub fn new(rows: usize) -> Self {
        let mut site_n_classes = BTreeMap::new();
        site_n_classes.insert(0, 1);
        let mut rep_eqclass_of_site = VecMap::new();
        rep_eqclass_of_site.insert(0, 0);
        DelayedEvalMap {
            current_site: 0,
            current_step: 0,
            map_history: MapHistory::new(),
            row_to_eqclass: vec![0; rows],
            newest_eqclass: None,
            eqclass_to_map: vec![UpdateMap::identity()],
            eqclass_size: vec![rows],
            eqclass_last_updated: vec![0],
            empty_eqclass_indices: Vec::new(),
            site_n_classes,
            rep_eqclass_of_site,
            site_class_list_above: vec![NO_EQCLASS],
            site_class_list_below: vec![NO_EQCLASS],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.row_to_eqclass.len()
    }

    pub fn current_site(&self) -> Step {
        self.current_site
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn number_of_eqclasses(&self) -> usize {
        self.eqclass_to_map.len() - self.empty_eqclass_indices.len()
    }

    pub fn map_history(&self) -> &MapHistory {
        &self.map_history
    }

    pub fn eqclass_of(&self, row: Row) -> Result<Eqclass> {
        self.row_to_eqclass
            .get(row)
            .copied()
            .ok_or(Error::OutOfRange {
                domain: "cohort rows",
                index: row,
                len: self.row_to_eqclass.len(),
            })
    }

    /// The composed map pending for `row` as currently stored, without
    /// catching its class up to the present step.
    pub fn pending_map(&self, row: Row) -> Result<&UpdateMap> {
        let eqclass = self.eqclass_of(row)?;
        Ok(&self.eqclass_to_map[eqclass])
    }

    /// Stage the update every row undergoes at the next site. No row or
    /// class is touched.
    pub fn stage_map_for_site(&mut self, site_map: UpdateMap) {
        self.current_site += 1;
        self.push_step(site_map);
    }

    /// Stage a span update. Identical to a site step except that the site
    /// counter does not advance.
    pub fn stage_map_for_span(&mut self, span_map: UpdateMap) {
        self.push_step(span_map);
    }

    fn push_step(&mut self, map: UpdateMap) {
        self.map_history.push_back(map);
        self.current_step += 1;
        self.newest_eqclass = None;
    }

    /// Catch the classes of the given rows up to the current step. The
    /// caller passes the rare side of the current site; that restriction is
    /// what makes the overall amortization work.
    pub fn update_active_rows(&mut self, rows: &[Row]) -> Result<()> {
        let eqclasses = self.rows_to_eqclasses(rows)?;
        self.update_maps(&eqclasses)
    }

    pub fn update_eqclass(&mut self, eqclass: Eqclass) -> Result<()> {
        self.update_maps(&[eqclass])
    }

    /// Compose the history suffix since each class's last update into its
    /// stored map and splice the class into the current step's list.
    pub fn update_maps(&mut self, eqclasses: &[Eqclass]) -> Result<()> {
        let mut stale: Vec<Eqclass> = eqclasses
            .iter()
            .copied()
            .filter(|&e| self.eqclass_last_updated[e] != self.current_step)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        stale.sort_unstable();
        stale.dedup();
        // newest first, so one backward walk over the history serves all
        stale.sort_unstable_by_key(|&e| Reverse(self.eqclass_last_updated[e]));
        let mut emptied = Vec::new();
        for &eqclass in &stale {
            let old_step = self.eqclass_last_updated[eqclass];
            let suffix = self.map_history.suffix(old_step + 1)?;
            self.eqclass_to_map[eqclass] = suffix.compose(&self.eqclass_to_map[eqclass]);
            self.eqclass_last_updated[eqclass] = self.current_step;
            if self.remove_from_site_list(old_step, eqclass) {
                emptied.push(old_step);
            }
            self.add_to_site_list(self.current_step, eqclass);
        }
        // compaction last: fusing slots invalidates the suffix cursor
        for step in emptied {
            self.condense_around(step)?;
        }
        Ok(())
    }

    /// The composed pending map of `row` applied to `value`, after catching
    /// the row's class up to the current step.
    pub fn evaluate(&mut self, row: Row, value: LogProb) -> Result<LogProb> {
        let eqclass = self.eqclass_of(row)?;
        self.update_maps(&[eqclass])?;
        Ok(self.eqclass_to_map[eqclass].apply(value))
    }

    /// Move `row` into the identity class of the current step, creating it
    /// on the first call after a stage.
    pub fn assign_row_to_newest_eqclass(&mut self, row: Row) -> Result<()> {
        let old = self.eqclass_of(row)?;
        let newest = match self.newest_eqclass {
            Some(eqclass) => eqclass,
            None => {
                let eqclass = self.add_eqclass(UpdateMap::identity());
                self.newest_eqclass = Some(eqclass);
                eqclass
            }
        };
        if old == newest {
            return Ok(());
        }
        self.row_to_eqclass[row] = newest;
        self.eqclass_size[newest] += 1;
        self.decrement_eqclass(old)
    }

    /// Group the listed rows under a fresh identity class at the current
    /// step. The caller has just made their stored values current.
    pub fn reset_rows(&mut self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let fresh = self.add_eqclass(UpdateMap::identity());
        self.newest_eqclass = Some(fresh);
        for &row in rows {
            let old = self.eqclass_of(row)?;
            if old == fresh {
                continue;
            }
            self.row_to_eqclass[row] = fresh;
            self.eqclass_size[fresh] += 1;
            self.decrement_eqclass(old)?;
        }
        Ok(())
    }

    /// Bring every class up to the current step and restart the history
    /// from a fresh root. Afterwards the structure occupies O(rows) memory
    /// and `evaluate` keeps working; used before taking a snapshot of the
    /// forward state.
    pub fn hard_update_all(&mut self) -> Result<()> {
        let live = self.live_eqclasses();
        self.update_maps(&live)?;
        debug!(
            "hard update of {} eqclasses at step {}; resetting history",
            live.len(),
            self.current_step
        );
        self.map_history = MapHistory::new();
        self.current_step = 0;
        self.current_site = 0;
        self.newest_eqclass = None;
        self.site_n_classes.clear();
        self.rep_eqclass_of_site.clear();
        for &eqclass in &live {
            self.eqclass_last_updated[eqclass] = 0;
            self.site_class_list_above[eqclass] = NO_EQCLASS;
            self.site_class_list_below[eqclass] = NO_EQCLASS;
        }
        for &eqclass in &live {
            self.add_to_site_list(0, eqclass);
        }
        Ok(())
    }

    /// Collapse all rows into a single identity class and forget the
    /// history entirely.
    pub fn hard_clear_all(&mut self) {
        *self = DelayedEvalMap::new(self.row_to_eqclass.len());
    }

    pub fn condense_history(&mut self, top: Step, bottom: Step) -> Result<()> {
        self.map_history.condense(top, bottom)
    }

    fn rows_to_eqclasses(&self, rows: &[Row]) -> Result<Vec<Eqclass>> {
        let mut eqclasses = Vec::with_capacity(rows.len());
        for &row in rows {
            eqclasses.push(self.eqclass_of(row)?);
        }
        eqclasses.sort_unstable();
        eqclasses.dedup();
        Ok(eqclasses)
    }

    fn add_eqclass(&mut self, map: UpdateMap) -> Eqclass {
        let eqclass = if let Some(recycled) = self.empty_eqclass_indices.pop() {
            self.eqclass_to_map[recycled] = map;
            self.eqclass_size[recycled] = 0;
            self.eqclass_last_updated[recycled] = self.current_step;
            recycled
        } else {
            self.eqclass_to_map.push(map);
            self.eqclass_size.push(0);
            self.eqclass_last_updated.push(self.current_step);
            self.site_class_list_above.push(NO_EQCLASS);
            self.site_class_list_below.push(NO_EQCLASS);
            self.eqclass_to_map.len() - 1
        };
        self.add_to_site_list(self.current_step, eqclass);
        eqclass
    }

    fn decrement_eqclass(&mut self, eqclass: Eqclass) -> Result<()> {
        self.eqclass_size[eqclass] -= 1;
        if self.eqclass_size[eqclass] == 0 {
            self.delete_eqclass(eqclass)?;
        }
        Ok(())
    }

    fn delete_eqclass(&mut self, eqclass: Eqclass) -> Result<()> {
        let step = self.eqclass_last_updated[eqclass];
        let emptied = self.remove_from_site_list(step, eqclass);
        self.empty_eqclass_indices.push(eqclass);
        if self.newest_eqclass == Some(eqclass) {
            self.newest_eqclass = None;
        }
        if emptied {
            self.condense_around(step)?;
        }
        Ok(())
    }

    fn add_to_site_list(&mut self, step: Step, eqclass: Eqclass) {
        *self.site_n_classes.entry(step).or_insert(0) += 1;
        self.site_class_list_above[eqclass] = NO_EQCLASS;
        match self.rep_eqclass_of_site.get(step).copied() {
            Some(rep) => {
                self.site_class_list_below[eqclass] = rep;
                self.site_class_list_above[rep] = eqclass;
            }
            None => {
                self.site_class_list_below[eqclass] = NO_EQCLASS;
            }
        }
        self.rep_eqclass_of_site.insert(step, eqclass);
    }

    /// Returns true when the step's list became empty.
    fn remove_from_site_list(&mut self, step: Step, eqclass: Eqclass) -> bool {
        let above = self.site_class_list_above[eqclass];
        let below = self.site_class_list_below[eqclass];
        if above == NO_EQCLASS {
            if below == NO_EQCLASS {
                self.rep_eqclass_of_site.remove(step);
            } else {
                self.rep_eqclass_of_site.insert(step, below);
            }
        } else {
            self.site_class_list_below[above] = below;
        }
        if below != NO_EQCLASS {
            self.site_class_list_above[below] = above;
        }
        self.site_class_list_above[eqclass] = NO_EQCLASS;
        self.site_class_list_below[eqclass] = NO_EQCLASS;
        let count = self.site_n_classes.get_mut(&step).unwrap();
        *count -= 1;
        if *count == 0 {
            self.site_n_classes.remove(&step);
            true
        } else {
            false
        }
    }

    /// A step with no classes left no longer needs its own history slot:
    /// the gap between its occupied neighbours collapses into one slot.
    fn condense_around(&mut self, step: Step) -> Result<()> {
        let bottom = self
            .site_n_classes
            .range(..step)
            .next_back()
            .map(|(&s, _)| s)
            .unwrap_or(0);
        let top = self
            .site_n_classes
            .range(step + 1..)
            .next()
            .map(|(&s, _)| s)
            .unwrap_or(self.current_step);
        if top > bottom {
            self.map_history.condense(top, bottom)?;
        }
        Ok(())
    }

    fn live_eqclasses(&self) -> Vec<Eqclass> {
        let mut recycled = vec![false; self.eqclass_to_map.len()];
        for &eqclass in &self.empty_eqclass_indices {
            recycled[eqclass] = true;
        }
        (0..self.eqclass_to_map.len())
            .filter(|&e| !recycled[e])
            .collect()
    }
}
