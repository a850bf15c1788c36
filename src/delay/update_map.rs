use std::f64;

use bio::stats::LogProb;

use crate::utils::logsum;

/// An affine map in log space, sending a value `x` to
/// `logsum(constant, coefficient + x)`, in probability space a linear map
/// `p -> c + k * p`. The forward recurrence at every site and span has this
/// shape, which is what makes deferred batch evaluation possible: maps
/// compose associatively, so any run of postponed updates collapses into a
/// single map.
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters, Serialize, Deserialize)]
#[getset(get_copy = "pub")]
pub struct UpdateMap {
    constant: LogProb,
    coefficient: LogProb,
}

impl UpdateMap {
    pub fn new(constant: LogProb, coefficient: LogProb) -> Self {
        UpdateMap {
            constant,
            coefficient,
        }
    }

    /// The neutral element of composition: adds nothing, scales by one.
    pub fn identity() -> Self {
        UpdateMap {
            constant: LogProb::ln_zero(),
            coefficient: LogProb::ln_one(),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self.constant == f64::NEG_INFINITY && *self.coefficient == 0.0
    }

    /// Apply the map to a log-space value.
    pub fn apply(&self, value: LogProb) -> LogProb {
        logsum(self.constant, self.coefficient + value)
    }

    /// The map equivalent to applying `inner` first and then `self`.
    pub fn compose(&self, inner: &UpdateMap) -> UpdateMap {
        UpdateMap {
            constant: logsum(self.constant, self.coefficient + inner.constant),
            coefficient: self.coefficient + inner.coefficient,
        }
    }
}

impl Default for UpdateMap {
    fn default() -> Self {
        UpdateMap::identity()
    }
}
