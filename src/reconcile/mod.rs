// Copyright 2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Reconciliation of a read's site list with the reference site grid.
//!
//! A read carries its own list of queried positions. Each of them either
//! aligns to a reference site (shared), falls on a non-site position
//! (read-only), or the read crosses reference sites it does not query
//! itself. This module folds the two grids into the index streams the
//! forward engine consumes: alleles per covered reference site, span
//! lengths, and per-span augmentation counts.

use crate::errors::{Error, Result};
use crate::model::query::InputHaplotype;
use crate::model::{Allele, AlleleAtSite};
use crate::reference::{Reference, ReferenceSequence};

/// Projection of one read onto the reference grid. Built once per read via
/// [`ReadReconcilerBuilder`]; every derived index stream is precomputed.
#[derive(Debug, Builder, Getters, CopyGetters)]
#[builder(pattern = "owned", build_fn(skip))]
pub struct ReadReconciler<'a, R: Reference> {
    reference: &'a R,
    reference_sequence: &'a ReferenceSequence,
    read_sequence: Vec<u8>,
    companion_sequence: Option<Vec<u8>>,
    #[getset(get_copy = "pub")]
    start_position: u64,
    #[getset(get_copy = "pub")]
    end_position: u64,
    /// Positions of the read's own sites, relative to the read start.
    #[getset(get = "pub")]
    read_site_positions: Vec<u64>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    read_site_is_shared: Vec<bool>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    shared_site_read_indices: Vec<usize>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    ref_site_below_read_site: Vec<Option<usize>>,
    /// Rank of each read site among the sites of its kind (shared or
    /// read-only), for addressing per-site auxiliary arrays.
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    subsequence_indices: Vec<usize>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    ref_sites_in_initial_span: Vec<AlleleAtSite>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    ref_sites_after_shared_sites: Vec<Vec<AlleleAtSite>>,
    /// Mismatches of the read against the invariant reference, bucketed by
    /// the read site the bucket precedes (one trailing bucket at the end).
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    invariant_penalties_by_read_site: Vec<usize>,
    #[builder(setter(skip))]
    #[getset(get = "pub")]
    companion_penalties_by_read_site: Vec<usize>,
    #[builder(setter(skip))]
    ref_sites: bool,
}

impl<'a, R: Reference> ReadReconcilerBuilder<'a, R> {
    pub fn build(self) -> Result<ReadReconciler<'a, R>> {
        let reference = self
            .reference
            .unwrap_or_else(|| panic!("bug: reconciler needs a reference"));
        let reference_sequence = self
            .reference_sequence
            .unwrap_or_else(|| panic!("bug: reconciler needs a reference sequence"));
        let read_sequence = self
            .read_sequence
            .unwrap_or_else(|| panic!("bug: reconciler needs the read sequence"));
        let companion_sequence = self.companion_sequence.unwrap_or(None);
        let start_position = self.start_position.unwrap_or(0);
        let read_site_positions = self.read_site_positions.unwrap_or_default();

        let length = read_sequence.len() as u64;
        let end_position = start_position + length;

        if let Some(companion) = &companion_sequence {
            if companion.len() != read_sequence.len() {
                panic!("bug: companion sequence length differs from the read");
            }
        }
        if read_site_positions
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            panic!("bug: read site positions must be strictly increasing");
        }
        for &position in &read_site_positions {
            if position >= length {
                return Err(Error::ReadOutOfReference {
                    position: start_position + position,
                    start: start_position,
                    end: end_position,
                });
            }
        }
        if length > 0
            && !(reference_sequence.contains(start_position)
                && reference_sequence.contains(end_position - 1))
        {
            return Err(Error::ReadOutOfReference {
                position: start_position,
                start: reference_sequence.offset(),
                end: reference_sequence.end(),
            });
        }

        let mut reconciler = ReadReconciler {
            reference,
            reference_sequence,
            read_sequence,
            companion_sequence,
            start_position,
            end_position,
            read_site_positions,
            read_site_is_shared: Vec::new(),
            shared_site_read_indices: Vec::new(),
            ref_site_below_read_site: Vec::new(),
            subsequence_indices: Vec::new(),
            ref_sites_in_initial_span: Vec::new(),
            ref_sites_after_shared_sites: Vec::new(),
            invariant_penalties_by_read_site: Vec::new(),
            companion_penalties_by_read_site: Vec::new(),
            ref_sites: false,
        };
        reconciler.find_ref_sites_below_read_sites();
        reconciler.find_shared_sites();
        reconciler.check_for_ref_sites()?;
        reconciler.build_subsequence_indices();
        reconciler.count_invariant_penalties()?;
        reconciler.find_ref_only_sites_and_alleles()?;
        Ok(reconciler)
    }
}

impl<'a, R: Reference> ReadReconciler<'a, R> {
    pub fn length(&self) -> u64 {
        self.read_sequence.len() as u64
    }

    pub fn read_sites(&self) -> usize {
        self.read_site_positions.len()
    }

    pub fn shared_sites(&self) -> usize {
        self.shared_site_read_indices.len()
    }

    pub fn ref_position(&self, read_position: u64) -> u64 {
        self.start_position + read_position
    }

    pub fn read_position(&self, ref_position: u64) -> Result<u64> {
        if ref_position >= self.start_position && ref_position < self.end_position {
            Ok(ref_position - self.start_position)
        } else {
            Err(Error::ReadOutOfReference {
                position: ref_position,
                start: self.start_position,
                end: self.end_position,
            })
        }
    }

    /// The base the read carries at a reference position it covers.
    pub fn read_allele_at(&self, ref_position: u64) -> Result<Allele> {
        let read_position = self.read_position(ref_position)?;
        Ok(Allele::from_u8(self.read_sequence[read_position as usize]))
    }

    pub fn read_site_ref_position(&self, read_site: usize) -> u64 {
        self.ref_position(self.read_site_positions[read_site])
    }

    pub fn contains_shared_sites(&self) -> bool {
        !self.shared_site_read_indices.is_empty()
    }

    /// True when the read window crosses at least one reference site. When
    /// false, the engine sees the whole read as a single initial span.
    pub fn contains_ref_sites(&self) -> bool {
        self.ref_sites
    }

    pub fn contains_read_only_sites(&self) -> bool {
        self.shared_site_read_indices.len() != self.read_site_positions.len()
    }

    pub fn index_among_shared_sites(&self, read_site: usize) -> Option<usize> {
        if self.read_site_is_shared[read_site] {
            Some(self.subsequence_indices[read_site])
        } else {
            None
        }
    }

    pub fn index_among_read_only_sites(&self, read_site: usize) -> Option<usize> {
        if self.read_site_is_shared[read_site] {
            None
        } else {
            Some(self.subsequence_indices[read_site])
        }
    }

    pub fn shared_site_ref_index(&self, shared_site: usize) -> usize {
        self.ref_site_below_read_site[self.shared_site_read_indices[shared_site]].unwrap()
    }

    /// The engine query implied by this read: alleles per covered reference
    /// site taken from the read bases, span augmentations counted against
    /// the invariant reference.
    pub fn build_query(&self) -> Result<InputHaplotype> {
        if !self.contains_ref_sites() {
            let augmentations =
                self.mismatches_in(self.start_position, self.end_position, &self.read_sequence)?;
            return InputHaplotype::from_reference_window(
                self.reference,
                Vec::new(),
                &[augmentations],
                self.start_position,
                self.length(),
            );
        }
        let (lower, upper) = self.window_sites();
        let mut alleles = Vec::with_capacity(upper - lower);
        let mut positions = Vec::with_capacity(upper - lower);
        for site in lower..upper {
            let position = self.reference.position_of(site)?;
            alleles.push(self.read_allele_at(position)?);
            positions.push(position);
        }
        let mut augmentations = Vec::with_capacity(positions.len() + 1);
        augmentations.push(self.mismatches_in(
            self.start_position,
            positions[0],
            &self.read_sequence,
        )?);
        for (j, &position) in positions.iter().enumerate() {
            let to = positions
                .get(j + 1)
                .copied()
                .unwrap_or(self.end_position);
            augmentations.push(self.mismatches_in(position + 1, to, &self.read_sequence)?);
        }
        InputHaplotype::from_reference_window(
            self.reference,
            alleles,
            &augmentations,
            self.start_position,
            self.length(),
        )
    }

    /// Reference sites covered by the window, as a half-open site range.
    fn window_sites(&self) -> (usize, usize) {
        let lower = self
            .reference
            .find_site_above(self.start_position)
            .unwrap_or_else(|| panic!("bug: window_sites called without reference sites"));
        let upper = self
            .reference
            .find_site_above(self.end_position)
            .unwrap_or_else(|| self.reference.num_sites());
        (lower, upper)
    }

    fn find_shared_sites(&mut self) {
        for read_site in 0..self.read_site_positions.len() {
            let shared = self
                .reference
                .is_site(self.read_site_ref_position(read_site));
            self.read_site_is_shared.push(shared);
            if shared {
                self.shared_site_read_indices.push(read_site);
            }
        }
    }

    fn find_ref_sites_below_read_sites(&mut self) {
        for read_site in 0..self.read_site_positions.len() {
            let below = self
                .reference
                .find_site_below(self.read_site_ref_position(read_site));
            self.ref_site_below_read_site.push(below);
        }
    }

    fn check_for_ref_sites(&mut self) -> Result<()> {
        self.ref_sites = match self.reference.find_site_above(self.start_position) {
            Some(site) => self.reference.position_of(site)? < self.end_position,
            None => false,
        };
        Ok(())
    }

    fn build_subsequence_indices(&mut self) {
        let mut next_shared = 0;
        let mut next_read_only = 0;
        for read_site in 0..self.read_site_is_shared.len() {
            if self.read_site_is_shared[read_site] {
                self.subsequence_indices.push(next_shared);
                next_shared += 1;
            } else {
                self.subsequence_indices.push(next_read_only);
                next_read_only += 1;
            }
        }
    }

    /// Count disagreements with the invariant reference between consecutive
    /// read sites (and against both window boundaries).
    fn count_invariant_penalties(&mut self) -> Result<()> {
        let buckets = self.penalty_buckets();
        for &(from, to) in &buckets {
            let count = self.mismatches_in(from, to, &self.read_sequence)?;
            self.invariant_penalties_by_read_site.push(count);
        }
        if self.companion_sequence.is_some() {
            let mut counts = Vec::with_capacity(buckets.len());
            for &(from, to) in &buckets {
                let companion = self.companion_sequence.as_ref().unwrap();
                counts.push(self.mismatches_in(from, to, companion)?);
            }
            self.companion_penalties_by_read_site = counts;
        }
        Ok(())
    }

    fn penalty_buckets(&self) -> Vec<(u64, u64)> {
        if self.read_site_positions.is_empty() {
            return vec![(self.start_position, self.end_position)];
        }
        let mut buckets = Vec::with_capacity(self.read_sites() + 1);
        buckets.push((self.start_position, self.read_site_ref_position(0)));
        for read_site in 1..self.read_sites() {
            buckets.push((
                self.read_site_ref_position(read_site - 1) + 1,
                self.read_site_ref_position(read_site),
            ));
        }
        buckets.push((
            self.read_site_ref_position(self.read_sites() - 1) + 1,
            self.end_position,
        ));
        buckets
    }

    /// Positions in `[from, to)` where `sequence` disagrees with the
    /// invariant reference. Site positions are scored by the site
    /// machinery and skipped here.
    fn mismatches_in(&self, from: u64, to: u64, sequence: &[u8]) -> Result<usize> {
        let mut count = 0;
        for position in from..to {
            if self.reference.is_site(position) {
                continue;
            }
            let allele = Allele::from_u8(sequence[(position - self.start_position) as usize]);
            if !self.reference_sequence.matches(position, allele)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn find_ref_only_sites_and_alleles(&mut self) -> Result<()> {
        if !self.contains_ref_sites() {
            return Ok(());
        }
        let (lower, upper) = self.window_sites();
        if !self.contains_shared_sites() {
            // every covered reference site lacks a matching read site
            self.ref_sites_in_initial_span = self.alleles_for_sites(lower, upper)?;
            return Ok(());
        }
        let first_shared = self.shared_site_ref_index(0);
        self.ref_sites_in_initial_span = self.alleles_for_sites(lower, first_shared)?;
        for shared_site in 0..self.shared_sites() - 1 {
            let from = self.shared_site_ref_index(shared_site) + 1;
            let to = self.shared_site_ref_index(shared_site + 1);
            let sites = self.alleles_for_sites(from, to)?;
            self.ref_sites_after_shared_sites.push(sites);
        }
        let from = self.shared_site_ref_index(self.shared_sites() - 1) + 1;
        let terminal = self.alleles_for_sites(from, upper)?;
        self.ref_sites_after_shared_sites.push(terminal);
        Ok(())
    }

    fn alleles_for_sites(&self, from: usize, to: usize) -> Result<Vec<AlleleAtSite>> {
        let mut sites = Vec::with_capacity(to.saturating_sub(from));
        for site in from..to {
            let position = self.reference.position_of(site)?;
            let allele = self.read_allele_at(position)?;
            sites.push(AlleleAtSite::new(site, allele));
        }
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Allele::{A, C};
    use crate::model::Span;
    use crate::model::query::Query;
    use crate::reference::LinearReference;

    /// Reference sites at 100, 120, 140 inside an all-`A` invariant
    /// reference covering [90, 190).
    fn example_setting() -> (LinearReference, ReferenceSequence) {
        (
            LinearReference::new(vec![100, 120, 140]),
            ReferenceSequence::new(90, vec![b'A'; 100]),
        )
    }

    #[test]
    fn test_shared_and_read_only_classification() {
        let (reference, sequence) = example_setting();
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 50])
            .start_position(100)
            .read_site_positions(vec![0, 20, 35])
            .build()
            .unwrap();
        // read sites at reference positions 100, 120, 135: the first two
        // align to reference sites, the third does not
        assert_eq!(reconciler.read_site_is_shared(), &[true, true, false]);
        assert_eq!(reconciler.shared_site_read_indices(), &[0, 1]);
        assert_eq!(reconciler.subsequence_indices(), &[0, 1, 0]);
        assert_eq!(reconciler.index_among_shared_sites(1), Some(1));
        assert_eq!(reconciler.index_among_shared_sites(2), None);
        assert_eq!(reconciler.index_among_read_only_sites(2), Some(0));
        assert_eq!(
            reconciler.ref_site_below_read_site(),
            &[Some(0), Some(1), Some(1)]
        );
        assert!(reconciler.contains_shared_sites());
        assert!(reconciler.contains_read_only_sites());
        assert!(reconciler.contains_ref_sites());
        assert_eq!(reconciler.shared_site_ref_index(1), 1);
        // reference site 140 has no matching read site
        assert_eq!(
            reconciler.ref_sites_after_shared_sites(),
            &vec![vec![], vec![AlleleAtSite::new(2, A)]]
        );
    }

    #[test]
    fn test_invariant_penalty_buckets() {
        let (reference, sequence) = example_setting();
        // mismatches at read positions 2 and 30 (reference positions 102,
        // 130); the read sites themselves and reference sites are skipped
        let mut read = vec![b'A'; 50];
        read[2] = b'C';
        read[30] = b'G';
        read[20] = b'T';
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(read)
            .start_position(100)
            .read_site_positions(vec![0, 20, 35])
            .build()
            .unwrap();
        // buckets: [100,100), (100,120), (120,135), (135,150)
        assert_eq!(
            reconciler.invariant_penalties_by_read_site(),
            &[0, 1, 1, 0]
        );
    }

    #[test]
    fn test_companion_penalties() {
        let (reference, sequence) = example_setting();
        let mut companion = vec![b'A'; 50];
        companion[10] = b'C';
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 50])
            .companion_sequence(Some(companion))
            .start_position(100)
            .read_site_positions(vec![0, 20])
            .build()
            .unwrap();
        assert_eq!(reconciler.invariant_penalties_by_read_site(), &[0, 0, 0]);
        assert_eq!(reconciler.companion_penalties_by_read_site(), &[0, 1, 0]);
    }

    #[test]
    fn test_read_within_one_span() {
        let (reference, sequence) = example_setting();
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 10])
            .start_position(101)
            .read_site_positions(vec![3])
            .build()
            .unwrap();
        assert!(!reconciler.contains_ref_sites());
        assert!(!reconciler.contains_shared_sites());
        let query = reconciler.build_query().unwrap();
        assert!(!query.has_sites());
        assert_eq!(query.left_tail(), Some(Span::new(10, 0)));
    }

    #[test]
    fn test_empty_read() {
        let (reference, sequence) = example_setting();
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![])
            .start_position(100)
            .read_site_positions(vec![])
            .build()
            .unwrap();
        assert_eq!(reconciler.length(), 0);
        assert_eq!(reconciler.read_sites(), 0);
        assert!(!reconciler.contains_ref_sites());
        let query = reconciler.build_query().unwrap();
        assert!(!query.has_sites());
        assert_eq!(query.left_tail(), None);
    }

    #[test]
    fn test_read_site_outside_read_is_rejected() {
        let (reference, sequence) = example_setting();
        let result = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 10])
            .start_position(100)
            .read_site_positions(vec![12])
            .build();
        assert_eq!(
            result.err(),
            Some(Error::ReadOutOfReference {
                position: 112,
                start: 100,
                end: 110,
            })
        );
    }

    #[test]
    fn test_read_outside_reference_sequence_is_rejected() {
        let (reference, sequence) = example_setting();
        let result = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 120])
            .start_position(100)
            .read_site_positions(vec![])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_query_streams() {
        let (reference, sequence) = example_setting();
        // reads C at reference site 120, G at non-site position 110, and T
        // at non-site position 146
        let mut read = vec![b'A'; 50];
        read[20] = b'C';
        read[10] = b'G';
        read[46] = b'T';
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(read)
            .start_position(100)
            .read_site_positions(vec![0, 20])
            .build()
            .unwrap();
        let query = reconciler.build_query().unwrap();
        assert_eq!(query.num_sites(), 3);
        assert_eq!(query.left_tail(), None);
        assert_eq!(query.allele_at(0), A);
        assert_eq!(query.allele_at(1), C);
        assert_eq!(query.allele_at(2), A);
        assert_eq!(query.rel_index(0), 0);
        // one augmentation in (100, 120), none in (120, 140), one after 140
        assert_eq!(query.span_after(0), Some(Span::new(19, 1)));
        assert_eq!(query.span_after(1), Some(Span::new(19, 0)));
        assert_eq!(query.span_after(2), Some(Span::new(9, 1)));
    }

    #[test]
    fn test_read_crossing_sites_without_read_sites() {
        let (reference, sequence) = example_setting();
        let reconciler = ReadReconcilerBuilder::default()
            .reference(&reference)
            .reference_sequence(&sequence)
            .read_sequence(vec![b'A'; 30])
            .start_position(95)
            .read_site_positions(vec![])
            .build()
            .unwrap();
        assert!(reconciler.contains_ref_sites());
        assert!(!reconciler.contains_shared_sites());
        // both covered sites end up in the initial span bucket
        assert_eq!(
            reconciler.ref_sites_in_initial_span(),
            &[AlleleAtSite::new(0, A), AlleleAtSite::new(1, A)]
        );
        let query = reconciler.build_query().unwrap();
        assert_eq!(query.num_sites(), 2);
        assert_eq!(query.left_tail(), Some(Span::new(5, 0)));
    }
}
