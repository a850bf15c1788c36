use crate::errors::Result;
use crate::model::{Allele, Span};
use crate::reference::Reference;

/// The query haplotype as the forward engine consumes it: an allele per
/// covered reference site, plus the invariant spans between and around
/// them. Spans carry their augmentation counts, the positions at which the
/// query disagrees with the invariant reference.
pub trait Query {
    fn num_sites(&self) -> usize;

    fn has_sites(&self) -> bool {
        self.num_sites() > 0
    }

    /// The span preceding the first site, if the query starts between
    /// sites.
    fn left_tail(&self) -> Option<Span>;

    /// The span between site `site` and its successor (or the end of the
    /// query).
    fn span_after(&self, site: usize) -> Option<Span>;

    fn allele_at(&self, site: usize) -> Allele;

    /// The reference site index of query site `site`.
    fn rel_index(&self, site: usize) -> usize;
}

/// A query over a contiguous run of reference sites.
#[derive(Debug, Clone)]
pub struct InputHaplotype {
    alleles: Vec<Allele>,
    first_ref_site: usize,
    left_tail: Option<Span>,
    spans_after: Vec<Option<Span>>,
}

impl InputHaplotype {
    pub fn new(
        alleles: Vec<Allele>,
        first_ref_site: usize,
        left_tail: Option<Span>,
        spans_after: Vec<Option<Span>>,
    ) -> Self {
        if spans_after.len() != alleles.len() {
            panic!(
                "bug: {} spans for {} query sites",
                spans_after.len(),
                alleles.len()
            );
        }
        InputHaplotype {
            alleles,
            first_ref_site,
            left_tail: left_tail.filter(|span| span.length > 0),
            spans_after: spans_after
                .into_iter()
                .map(|span| span.filter(|span| span.length > 0))
                .collect(),
        }
    }

    /// Derive the tail and span lengths from the reference site positions
    /// covered by the window `[start, start + length)`. `alleles` holds one
    /// call per covered site; `augmentations` holds one count per span,
    /// leading tail first.
    pub fn from_reference_window<R: Reference>(
        reference: &R,
        alleles: Vec<Allele>,
        augmentations: &[usize],
        start: u64,
        length: u64,
    ) -> Result<Self> {
        let end = start + length;
        let first_site = match reference.find_site_above(start) {
            Some(site) if reference.position_of(site)? < end => site,
            _ => {
                // the window crosses no site: a single initial span covers it
                if !alleles.is_empty() {
                    panic!("bug: allele calls supplied for a window without sites");
                }
                let left_tail = if length > 0 {
                    Some(Span::new(length as usize, augmentations[0]))
                } else {
                    None
                };
                return Ok(InputHaplotype {
                    alleles,
                    first_ref_site: 0,
                    left_tail,
                    spans_after: Vec::new(),
                });
            }
        };
        let mut positions = Vec::new();
        for site in first_site..reference.num_sites() {
            let position = reference.position_of(site)?;
            if position >= end {
                break;
            }
            positions.push(position);
        }
        if alleles.len() != positions.len() {
            panic!(
                "bug: {} allele calls for {} sites in the window",
                alleles.len(),
                positions.len()
            );
        }
        if augmentations.len() != positions.len() + 1 {
            panic!(
                "bug: {} augmentation counts for {} spans",
                augmentations.len(),
                positions.len() + 1
            );
        }
        let tail_length = (positions[0] - start) as usize;
        let left_tail = if tail_length > 0 {
            Some(Span::new(tail_length, augmentations[0]))
        } else {
            debug_assert_eq!(augmentations[0], 0);
            None
        };
        let mut spans_after = Vec::with_capacity(positions.len());
        for (j, &position) in positions.iter().enumerate() {
            let gap = match positions.get(j + 1) {
                Some(&successor) => (successor - position - 1) as usize,
                None => (end - position - 1) as usize,
            };
            spans_after.push(if gap > 0 {
                Some(Span::new(gap, augmentations[j + 1]))
            } else {
                None
            });
        }
        Ok(InputHaplotype {
            alleles,
            first_ref_site: first_site,
            left_tail,
            spans_after,
        })
    }
}

impl Query for InputHaplotype {
    fn num_sites(&self) -> usize {
        self.alleles.len()
    }

    fn left_tail(&self) -> Option<Span> {
        self.left_tail
    }

    fn span_after(&self, site: usize) -> Option<Span> {
        self.spans_after[site]
    }

    fn allele_at(&self, site: usize) -> Allele {
        self.alleles[site]
    }

    fn rel_index(&self, site: usize) -> usize {
        self.first_ref_site + site
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Allele::{A, C, G};
    use crate::reference::LinearReference;

    #[test]
    fn test_from_reference_window() {
        let reference = LinearReference::new(vec![100, 120, 140]);
        let query = InputHaplotype::from_reference_window(
            &reference,
            vec![A, C, G],
            &[1, 2, 0, 1],
            95,
            50,
        )
        .unwrap();
        assert_eq!(query.num_sites(), 3);
        assert_eq!(query.left_tail(), Some(Span::new(5, 1)));
        assert_eq!(query.span_after(0), Some(Span::new(19, 2)));
        assert_eq!(query.span_after(1), Some(Span::new(19, 0)));
        assert_eq!(query.span_after(2), Some(Span::new(4, 1)));
        assert_eq!(query.allele_at(1), C);
        assert_eq!(query.rel_index(2), 2);
    }

    #[test]
    fn test_window_starting_on_a_site() {
        let reference = LinearReference::new(vec![100, 101, 120]);
        let query =
            InputHaplotype::from_reference_window(&reference, vec![A, C], &[0, 0, 3], 100, 10)
                .unwrap();
        assert_eq!(query.left_tail(), None);
        // adjacent sites leave no span between them
        assert_eq!(query.span_after(0), None);
        assert_eq!(query.span_after(1), Some(Span::new(8, 3)));
    }

    #[test]
    fn test_window_without_sites() {
        let reference = LinearReference::new(vec![100, 120]);
        let query =
            InputHaplotype::from_reference_window(&reference, vec![], &[4], 101, 10).unwrap();
        assert!(!query.has_sites());
        assert_eq!(query.left_tail(), Some(Span::new(10, 4)));
    }

    #[test]
    fn test_empty_window() {
        let reference = LinearReference::new(vec![100]);
        let query = InputHaplotype::from_reference_window(&reference, vec![], &[0], 50, 0).unwrap();
        assert!(!query.has_sites());
        assert_eq!(query.left_tail(), None);
    }
}
