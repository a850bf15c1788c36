use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error(
        "invalid penalty parameters: mutation and recombination probabilities must each be below 0.5 and the cohort must be non-empty (log_rho={log_rho}, log_mu={log_mu}, H={num_haplotypes})"
    )]
    InvalidParameters {
        log_rho: f64,
        log_mu: f64,
        num_haplotypes: usize,
    },
    #[error("log-space sum over an empty set of summands")]
    EmptySum,
    #[error("log-space difference {minuend} - {subtrahend} is outside the numeric domain")]
    NumericDomain { minuend: f64, subtrahend: f64 },
    #[error("history step {step} has been erased by compaction")]
    ErasedHistory { step: usize },
    #[error("index {index} out of range for {domain} of size {len}")]
    OutOfRange {
        domain: &'static str,
        index: usize,
        len: usize,
    },
    #[error("read position {position} outside the reference interval [{start}, {end})")]
    ReadOutOfReference { position: u64, start: u64, end: u64 },
}
