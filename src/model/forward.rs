// Copyright 2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::LogProb;
use itertools::Itertools;

use crate::delay::update_map::UpdateMap;
use crate::delay::DelayedEvalMap;
use crate::errors::{Error, Result};
use crate::model::penalties::Penalties;
use crate::model::query::Query;
use crate::model::{Allele, Span};
use crate::reference::cohort::Cohort;
use crate::reference::Reference;
use crate::utils::{log_big_sum, log_weighted_big_sum, logdiff, logsum};

/// The forward-probability engine.
///
/// For every cohort haplotype `i` it maintains the log probability `R[i]`
/// that the query's path through the cohort lies on `i` after the sites
/// extended so far, together with the column sum `S`. Only the most
/// recently materialized column is stored; rows on the common side of a
/// site are deferred through the [`DelayedEvalMap`], so a site costs time
/// proportional to its rare side.
///
/// The collaborators are read-only and shared; independent engines over the
/// same cohort can serve concurrent queries.
pub struct ForwardMatrix<'a, R, C, Q>
where
    R: Reference,
    C: Cohort,
    Q: Query,
{
    reference: &'a R,
    cohort: &'a C,
    penalties: &'a Penalties,
    query: &'a Q,
    delay: DelayedEvalMap,
    column: Vec<LogProb>,
    sums: Vec<LogProb>,
    // shared row value after an initial left tail, before any site
    initial_value: Option<LogProb>,
    last_extended: Option<usize>,
}

impl<'a, R, C, Q> ForwardMatrix<'a, R, C, Q>
where
    R: Reference,
    C: Cohort,
    Q: Query,
{
    pub fn new(reference: &'a R, cohort: &'a C, penalties: &'a Penalties, query: &'a Q) -> Self {
        let num_haplotypes = cohort.num_haplotypes();
        if num_haplotypes != penalties.num_haplotypes() {
            panic!(
                "bug: cohort of {} haplotypes does not fit penalties derived for {}",
                num_haplotypes,
                penalties.num_haplotypes()
            );
        }
        if query.has_sites() && query.rel_index(query.num_sites() - 1) >= reference.num_sites() {
            panic!("bug: query site indices exceed the reference");
        }
        ForwardMatrix {
            reference,
            cohort,
            penalties,
            query,
            delay: DelayedEvalMap::new(num_haplotypes),
            column: vec![LogProb::ln_one(); num_haplotypes],
            sums: Vec::with_capacity(query.num_sites()),
            initial_value: None,
            last_extended: None,
        }
    }

    pub fn reference(&self) -> &R {
        self.reference
    }

    pub fn penalties(&self) -> &Penalties {
        self.penalties
    }

    /// Column sums of the query sites extended so far. A span after a site
    /// folds into that site's entry.
    pub fn column_sums(&self) -> &[LogProb] {
        &self.sums
    }

    /// Run the recurrence over the whole query and return its final
    /// log likelihood. An empty query yields certainty.
    pub fn calculate_probability(&mut self) -> Result<LogProb> {
        self.initialize_probability();
        for j in 0..self.query.num_sites() {
            self.extend_probability_at_site(j)?;
            if let Some(span) = self.query.span_after(j) {
                self.extend_probability_at_span_after(j, span)?;
            }
        }
        Ok(self.last_s())
    }

    /// Fold an initial left tail into the column. Walks begin with
    /// probability 1/H on each haplotype; since no site distinguishes
    /// haplotypes within the tail, every row ends up with the same value.
    pub fn initialize_probability(&mut self) {
        if let Some(tail) = self.query.left_tail() {
            let penalties = self.penalties;
            let lfsl = LogProb((tail.length as f64 - 1.0) * *penalties.log_fs_base());
            let mutation = penalties.span_mutation(tail.length, tail.augmentations);
            let value = mutation + lfsl - penalties.log_h();
            for entry in self.column.iter_mut() {
                *entry = value;
            }
            self.initial_value = Some(value);
        }
    }

    pub fn extend_probability_at_site(&mut self, j: usize) -> Result<()> {
        let allele = self.query.allele_at(j);
        let site = self.query.rel_index(j);
        if self.last_extended.is_none() && self.initial_value.is_none() {
            return self.extend_initial_site(j, site, allele);
        }
        let penalties = self.penalties;
        let cohort = self.cohort;
        let match_is_rare = cohort.is_rare(site, allele)?;
        let active = cohort.active_rows(site, allele)?;
        let s_prev = self.last_s();

        // every row undergoes the common-side update lazily; only the rare
        // side is materialized and corrected to its own emission
        self.delay
            .stage_map_for_site(penalties.site_map(match_is_rare, s_prev));
        self.delay.update_active_rows(active)?;
        let correction = penalties.minority_correction(match_is_rare);
        for &row in active {
            let common_value = self.delay.evaluate(row, self.column[row])?;
            self.column[row] = LogProb(*common_value + correction);
        }
        self.delay.reset_rows(active)?;

        let sum = if active.is_empty() {
            let emission = if match_is_rare {
                penalties.log_mu()
            } else {
                penalties.log_mu_complement()
            };
            emission + s_prev + penalties.log_fs_base()
        } else {
            // the rare rows just written carry exactly the variant part of
            // the column sum: divide their emission back out
            let minority = active.iter().map(|&row| self.column[row]).collect_vec();
            let minority_sum = log_big_sum(&minority)?;
            if match_is_rare {
                let corrective =
                    minority_sum - penalties.log_mu_complement() + penalties.log_2mu_complement();
                logsum(
                    penalties.log_mu() + s_prev + penalties.log_fs_base(),
                    corrective,
                )
            } else {
                let corrective =
                    minority_sum - penalties.log_mu() + penalties.log_2mu_complement();
                logdiff(
                    penalties.log_mu_complement() + s_prev + penalties.log_fs_base(),
                    corrective,
                )?
            }
        };
        self.record_site(j, sum);
        Ok(())
    }

    /// The very first site of a query without a left tail: only two row
    /// values are possible, so the column is written eagerly once.
    fn extend_initial_site(&mut self, j: usize, site: usize, allele: Allele) -> Result<()> {
        debug_assert_eq!(j, 0);
        let penalties = self.penalties;
        let cohort = self.cohort;
        let value_match = penalties.log_mu_complement() - penalties.log_h();
        let value_mismatch = penalties.log_mu() - penalties.log_h();
        for entry in self.column.iter_mut() {
            *entry = value_mismatch;
        }
        for &row in cohort.matches(site, allele)? {
            self.column[row] = value_match;
        }
        let n_match = cohort.count_matching(site, allele)?;
        let n_mismatch = cohort.num_haplotypes() - n_match;
        let sum = log_weighted_big_sum(
            &[penalties.log_mu_complement(), penalties.log_mu()],
            &[n_match, n_mismatch],
        )? - penalties.log_h();
        // the column is current as written: the staged step carries no
        // pending update
        self.delay.stage_map_for_site(UpdateMap::identity());
        self.record_site(j, sum);
        Ok(())
    }

    pub fn extend_probability_at_span_after(&mut self, j: usize, span: Span) -> Result<()> {
        let penalties = self.penalties;
        let s_prev = self.last_s();
        self.delay
            .stage_map_for_span(penalties.span_map(span.length, span.augmentations, s_prev)?);
        let lfsl = LogProb(span.length as f64 * *penalties.log_fs_base());
        self.sums[j] = penalties.span_mutation(span.length, span.augmentations) + s_prev + lfsl;
        Ok(())
    }

    /// The current forward value of a single row, composing whatever
    /// updates are still pending for it.
    pub fn row_probability(&mut self, row: usize) -> Result<LogProb> {
        let value = self.column.get(row).copied().ok_or(Error::OutOfRange {
            domain: "cohort rows",
            index: row,
            len: self.column.len(),
        })?;
        self.delay.evaluate(row, value)
    }

    /// Force all pending updates and return the materialized column with
    /// the current column sum. Afterwards the delay structure occupies
    /// O(H) memory and the engine remains extendable.
    pub fn snapshot(&mut self) -> Result<(Vec<LogProb>, LogProb)> {
        debug!("snapshot at query site {:?}", self.last_extended);
        self.delay.hard_update_all()?;
        let mut column = Vec::with_capacity(self.column.len());
        for row in 0..self.column.len() {
            column.push(self.delay.evaluate(row, self.column[row])?);
        }
        Ok((column, self.last_s()))
    }

    fn record_site(&mut self, j: usize, sum: LogProb) {
        debug_assert_eq!(self.sums.len(), j);
        self.sums.push(sum);
        self.last_extended = Some(j);
    }

    fn last_s(&self) -> LogProb {
        match self.last_extended {
            Some(j) => self.sums[j],
            None => match self.initial_value {
                Some(value) => value + self.penalties.log_h(),
                None => LogProb::ln_one(),
            },
        }
    }
}
