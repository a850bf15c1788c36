use std::f64;

use bio::stats::LogProb;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::errors::{Error, Result};

/// Stable log-space addition: `log(exp(a) + exp(b))`.
///
/// Unlike `LogProb::ln_add_exp`, two `-inf` operands yield `-inf` rather
/// than NaN.
pub fn logsum(a: LogProb, b: LogProb) -> LogProb {
    if *a == f64::NEG_INFINITY {
        b
    } else if *b == f64::NEG_INFINITY {
        a
    } else {
        a.ln_add_exp(b)
    }
}

/// Stable log-space subtraction: `log(exp(a) - exp(b))` for `a >= b`.
pub fn logdiff(a: LogProb, b: LogProb) -> Result<LogProb> {
    if *b == f64::NEG_INFINITY {
        return Ok(a);
    }
    if *a < *b {
        return Err(Error::NumericDomain {
            minuend: *a,
            subtrahend: *b,
        });
    }
    Ok(LogProb(*a + (-(*b - *a).exp()).ln_1p()))
}

/// Stable log-space sum over a slice of summands, via the max-shift trick.
pub fn log_big_sum(summands: &[LogProb]) -> Result<LogProb> {
    if summands.is_empty() {
        return Err(Error::EmptySum);
    }
    let max = *summands
        .iter()
        .max_by_key(|&&p| OrderedFloat(*p))
        .unwrap();
    if *max == f64::NEG_INFINITY {
        return Ok(LogProb::ln_zero());
    }
    let mut rest = 0.0;
    let mut seen_max = false;
    for &p in summands {
        // the maximum itself contributes the leading 1 in log1p; skip it once
        if !seen_max && *p == *max {
            seen_max = true;
            continue;
        }
        rest += (*p - *max).exp();
    }
    Ok(LogProb(*max + rest.ln_1p()))
}

/// Log-space sum of `summands[i]` each weighted by the integer multiplicity
/// `counts[i]`. Zero counts are skipped; if nothing remains the sum is empty.
pub fn log_weighted_big_sum(summands: &[LogProb], counts: &[usize]) -> Result<LogProb> {
    let weighted = summands
        .iter()
        .zip(counts.iter())
        .filter(|(_, &n)| n > 0)
        .map(|(&p, &n)| LogProb(*p + (n as f64).ln()))
        .collect_vec();
    log_big_sum(&weighted)
}
