// Copyright 2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Haplotype likelihood calculation against a reference cohort under a
//! Li-Stephens style recombination-mutation model.
//!
//! The forward probabilities of a query haplotype are extended site by site
//! over the cohort. Instead of touching every cohort haplotype at every
//! site, identical affine updates are staged in a shared history and only
//! composed into a row when that row is consulted, which reduces the
//! per-site cost from the cohort size to the size of the rare allele class
//! (see [`delay::DelayedEvalMap`]).

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate getset;
#[cfg(test)]
#[macro_use]
extern crate lazy_static;
#[cfg(test)]
#[macro_use]
extern crate approx;

pub mod delay;
pub mod errors;
pub mod model;
pub mod reconcile;
pub mod reference;
pub mod utils;

pub use crate::errors::{Error, Result};
pub use crate::model::forward::ForwardMatrix;
pub use crate::model::penalties::Penalties;
pub use crate::model::query::{InputHaplotype, Query};
pub use crate::reference::cohort::{Cohort, HaplotypeCohort};
pub use crate::reference::{LinearReference, Reference, ReferenceSequence};
