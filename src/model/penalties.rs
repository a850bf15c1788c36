use std::f64::consts::LN_2;

use bio::stats::LogProb;

use crate::delay::update_map::UpdateMap;
use crate::errors::{Error, Result};
use crate::utils::{logdiff, logsum};

/// The log-space recombination and mutation penalties of the model together
/// with every derived constant the forward recurrence needs. Immutable after
/// construction; all log arithmetic in the engine pulls from here.
///
/// With recombination probability rho and mutation probability mu,
/// `log_ft_base = log(1 - 2 rho)` is the per-step weight of staying on the
/// same haplotype and `log_fs_base = log(1 - 2 rho + H rho)` the weight
/// folded into the column sum when every row is extended alike.
#[derive(Debug, Clone, CopyGetters, Serialize, Deserialize)]
#[getset(get_copy = "pub")]
pub struct Penalties {
    log_rho: LogProb,
    log_mu: LogProb,
    num_haplotypes: usize,
    log_h: LogProb,
    log_rho_complement: LogProb,
    log_mu_complement: LogProb,
    log_2mu_complement: LogProb,
    log_ft_base: LogProb,
    log_fs_base: LogProb,
}

impl Penalties {
    pub fn new(log_rho: f64, log_mu: f64, num_haplotypes: usize) -> Result<Self> {
        // the complements require rho < 0.5 and mu < 0.5; the negated
        // comparisons also reject NaN
        if !(log_rho < -LN_2) || !(log_mu < -LN_2) || num_haplotypes == 0 {
            return Err(Error::InvalidParameters {
                log_rho,
                log_mu,
                num_haplotypes,
            });
        }
        let log_h = LogProb((num_haplotypes as f64).ln());
        let log_ft_base = LogProb((-2.0 * log_rho.exp()).ln_1p());
        Ok(Penalties {
            log_rho: LogProb(log_rho),
            log_mu: LogProb(log_mu),
            num_haplotypes,
            log_h,
            log_rho_complement: LogProb((-log_rho.exp()).ln_1p()),
            log_mu_complement: LogProb((-log_mu.exp()).ln_1p()),
            log_2mu_complement: LogProb((-2.0 * log_mu.exp()).ln_1p()),
            log_ft_base,
            log_fs_base: logsum(log_ft_base, LogProb(log_rho) + log_h),
        })
    }

    /// The update every row on the common side of a site undergoes: the row
    /// value is multiplied by `emission * ft` and receives the shared
    /// `emission * rho * S_prev` term, where the emission is `mu` when
    /// matches are rare and `1 - mu` otherwise.
    pub fn site_map(&self, match_is_rare: bool, last_sum: LogProb) -> UpdateMap {
        let emission = if match_is_rare {
            self.log_mu
        } else {
            self.log_mu_complement
        };
        UpdateMap::new(
            emission + self.log_rho + last_sum,
            emission + self.log_ft_base,
        )
    }

    /// The update every row undergoes across a span of `length` invariant
    /// positions, `augmentations` of which mismatch the reference.
    pub fn span_map(
        &self,
        length: usize,
        augmentations: usize,
        last_sum: LogProb,
    ) -> Result<UpdateMap> {
        let lfsl = LogProb(length as f64 * *self.log_fs_base);
        let lftl = LogProb(length as f64 * *self.log_ft_base);
        let mutation = self.span_mutation(length, augmentations);
        // fs > ft for any H >= 1, so the difference is always defined
        let invariant = mutation + last_sum - self.log_h + logdiff(lfsl, lftl)?;
        Ok(UpdateMap::new(invariant, mutation + lftl))
    }

    /// Mutation weight of a span: `(1 - mu)^(length - augmentations) *
    /// mu^augmentations` in log space.
    pub fn span_mutation(&self, length: usize, augmentations: usize) -> LogProb {
        debug_assert!(augmentations <= length);
        LogProb(
            (length - augmentations) as f64 * *self.log_mu_complement
                + augmentations as f64 * *self.log_mu,
        )
    }

    /// Scalar that turns a common-side updated row value into the rare-side
    /// value at the same site (the two updates differ only in their
    /// emission factor).
    pub fn minority_correction(&self, match_is_rare: bool) -> f64 {
        if match_is_rare {
            *self.log_mu_complement - *self.log_mu
        } else {
            *self.log_mu - *self.log_mu_complement
        }
    }
}
