pub mod cohort;

use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::model::Allele;

/// The ordered variant sites of a linear reference.
pub trait Reference {
    fn num_sites(&self) -> usize;

    /// Physical position of a site.
    fn position_of(&self, site: usize) -> Result<u64>;

    /// The site at `position` itself, or else the nearest site above it.
    fn find_site_above(&self, position: u64) -> Option<usize>;

    /// The site at `position` itself, or else the nearest site below it.
    fn find_site_below(&self, position: u64) -> Option<usize>;

    fn is_site(&self, position: u64) -> bool;
}

/// Reference sites backed by a sorted position vector.
#[derive(Debug, Clone, Default)]
pub struct LinearReference {
    positions: Vec<u64>,
    site_by_position: HashMap<u64, usize>,
}

impl LinearReference {
    pub fn new(positions: Vec<u64>) -> Self {
        if positions.windows(2).any(|pair| pair[0] >= pair[1]) {
            panic!("bug: reference site positions must be strictly increasing");
        }
        let site_by_position = positions
            .iter()
            .enumerate()
            .map(|(site, &position)| (position, site))
            .collect();
        LinearReference {
            positions,
            site_by_position,
        }
    }
}

impl Reference for LinearReference {
    fn num_sites(&self) -> usize {
        self.positions.len()
    }

    fn position_of(&self, site: usize) -> Result<u64> {
        self.positions.get(site).copied().ok_or(Error::OutOfRange {
            domain: "reference sites",
            index: site,
            len: self.positions.len(),
        })
    }

    fn find_site_above(&self, position: u64) -> Option<usize> {
        match self.positions.binary_search(&position) {
            Ok(site) => Some(site),
            Err(insertion) if insertion < self.positions.len() => Some(insertion),
            Err(_) => None,
        }
    }

    fn find_site_below(&self, position: u64) -> Option<usize> {
        match self.positions.binary_search(&position) {
            Ok(site) => Some(site),
            Err(0) => None,
            Err(insertion) => Some(insertion - 1),
        }
    }

    fn is_site(&self, position: u64) -> bool {
        self.site_by_position.contains_key(&position)
    }
}

/// The invariant reference bases over an interval, consulted for read
/// positions that do not fall on a site.
#[derive(Debug, Clone)]
pub struct ReferenceSequence {
    offset: u64,
    bases: Vec<u8>,
}

impl ReferenceSequence {
    pub fn new(offset: u64, bases: Vec<u8>) -> Self {
        ReferenceSequence { offset, bases }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// One past the last covered position.
    pub fn end(&self) -> u64 {
        self.offset + self.bases.len() as u64
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.offset && position < self.end()
    }

    pub fn allele_at(&self, position: u64) -> Result<Allele> {
        if !self.contains(position) {
            return Err(Error::OutOfRange {
                domain: "reference sequence",
                index: position as usize,
                len: self.bases.len(),
            });
        }
        Ok(Allele::from_u8(self.bases[(position - self.offset) as usize]))
    }

    pub fn matches(&self, position: u64, allele: Allele) -> Result<bool> {
        Ok(self.allele_at(position)? == allele)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_reference() -> LinearReference {
        LinearReference::new(vec![100, 120, 140])
    }

    #[test]
    fn test_site_lookup() {
        let reference = example_reference();
        assert_eq!(reference.num_sites(), 3);
        assert_eq!(reference.position_of(1).unwrap(), 120);
        assert!(reference.position_of(3).is_err());
        assert!(reference.is_site(120));
        assert!(!reference.is_site(121));
    }

    #[test]
    fn test_find_site_above_and_below() {
        let reference = example_reference();
        assert_eq!(reference.find_site_above(100), Some(0));
        assert_eq!(reference.find_site_above(101), Some(1));
        assert_eq!(reference.find_site_above(141), None);
        assert_eq!(reference.find_site_below(100), Some(0));
        assert_eq!(reference.find_site_below(99), None);
        assert_eq!(reference.find_site_below(139), Some(1));
        assert_eq!(reference.find_site_below(140), Some(2));
    }

    #[test]
    fn test_reference_sequence() {
        let sequence = ReferenceSequence::new(100, b"ACGT".to_vec());
        assert_eq!(sequence.end(), 104);
        assert!(sequence.contains(103));
        assert!(!sequence.contains(104));
        assert_eq!(sequence.allele_at(102).unwrap(), Allele::G);
        assert!(sequence.matches(100, Allele::A).unwrap());
        assert!(!sequence.matches(101, Allele::A).unwrap());
        assert!(sequence.allele_at(99).is_err());
    }
}
