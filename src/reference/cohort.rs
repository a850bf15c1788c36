use crate::errors::{Error, Result};
use crate::model::Allele;

/// The alleles carried by the cohort haplotypes at every reference site.
///
/// The forward engine only ever iterates the rare side of a site, so the
/// contract exposes both row lists and the rare-side selection.
pub trait Cohort {
    fn num_haplotypes(&self) -> usize;

    fn allele_at(&self, site: usize, haplotype: usize) -> Result<Allele>;

    /// Rows carrying `allele` at `site`.
    fn matches(&self, site: usize, allele: Allele) -> Result<&[usize]>;

    /// Rows carrying any other allele at `site`.
    fn non_matches(&self, site: usize, allele: Allele) -> Result<&[usize]>;

    fn count_matching(&self, site: usize, allele: Allele) -> Result<usize>;

    /// True when the rows matching `allele` are the minority at `site`.
    /// A tie counts as rare, so the selection is deterministic.
    fn is_rare(&self, site: usize, allele: Allele) -> Result<bool> {
        Ok(2 * self.count_matching(site, allele)? <= self.num_haplotypes())
    }

    /// Whichever of `matches` and `non_matches` is smaller.
    fn active_rows(&self, site: usize, allele: Allele) -> Result<&[usize]> {
        if self.is_rare(site, allele)? {
            self.matches(site, allele)
        } else {
            self.non_matches(site, allele)
        }
    }
}

/// A dense cohort with the per-(site, allele) row lists of both sides
/// precomputed, the way the engine wants to consume them.
#[derive(Debug, Clone)]
pub struct HaplotypeCohort {
    num_haplotypes: usize,
    alleles_by_site: Vec<Vec<Allele>>,
    matching_rows: Vec<Vec<Vec<usize>>>,
    non_matching_rows: Vec<Vec<Vec<usize>>>,
}

impl HaplotypeCohort {
    /// Build from site-major allele calls: `alleles_by_site[site][row]`.
    pub fn new(alleles_by_site: Vec<Vec<Allele>>, num_haplotypes: usize) -> Self {
        let mut matching_rows = Vec::with_capacity(alleles_by_site.len());
        let mut non_matching_rows = Vec::with_capacity(alleles_by_site.len());
        for (site, row_alleles) in alleles_by_site.iter().enumerate() {
            if row_alleles.len() != num_haplotypes {
                panic!(
                    "bug: site {} carries {} allele calls for a cohort of {}",
                    site,
                    row_alleles.len(),
                    num_haplotypes
                );
            }
            let mut matching = vec![Vec::new(); Allele::COUNT];
            let mut non_matching = vec![Vec::new(); Allele::COUNT];
            for (row, &allele) in row_alleles.iter().enumerate() {
                for index in 0..Allele::COUNT {
                    if allele.index() == index {
                        matching[index].push(row);
                    } else {
                        non_matching[index].push(row);
                    }
                }
            }
            matching_rows.push(matching);
            non_matching_rows.push(non_matching);
        }
        HaplotypeCohort {
            num_haplotypes,
            alleles_by_site,
            matching_rows,
            non_matching_rows,
        }
    }

    pub fn num_sites(&self) -> usize {
        self.alleles_by_site.len()
    }

    fn check_site(&self, site: usize) -> Result<()> {
        if site >= self.alleles_by_site.len() {
            return Err(Error::OutOfRange {
                domain: "cohort sites",
                index: site,
                len: self.alleles_by_site.len(),
            });
        }
        Ok(())
    }
}

impl Cohort for HaplotypeCohort {
    fn num_haplotypes(&self) -> usize {
        self.num_haplotypes
    }

    fn allele_at(&self, site: usize, haplotype: usize) -> Result<Allele> {
        self.check_site(site)?;
        self.alleles_by_site[site]
            .get(haplotype)
            .copied()
            .ok_or(Error::OutOfRange {
                domain: "cohort haplotypes",
                index: haplotype,
                len: self.num_haplotypes,
            })
    }

    fn matches(&self, site: usize, allele: Allele) -> Result<&[usize]> {
        self.check_site(site)?;
        Ok(&self.matching_rows[site][allele.index()])
    }

    fn non_matches(&self, site: usize, allele: Allele) -> Result<&[usize]> {
        self.check_site(site)?;
        Ok(&self.non_matching_rows[site][allele.index()])
    }

    fn count_matching(&self, site: usize, allele: Allele) -> Result<usize> {
        Ok(self.matches(site, allele)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Allele::{A, C, G};

    fn example_cohort() -> HaplotypeCohort {
        HaplotypeCohort::new(vec![vec![A, A, C, A], vec![C, G, C, C], vec![A, A, A, A]], 4)
    }

    #[test]
    fn test_row_lists() {
        let cohort = example_cohort();
        assert_eq!(cohort.matches(0, A).unwrap(), &[0, 1, 3]);
        assert_eq!(cohort.non_matches(0, A).unwrap(), &[2]);
        assert_eq!(cohort.count_matching(1, G).unwrap(), 1);
        assert_eq!(cohort.allele_at(1, 1).unwrap(), G);
        assert!(cohort.matches(3, A).is_err());
        assert!(cohort.allele_at(0, 4).is_err());
    }

    #[test]
    fn test_rare_side_selection() {
        let cohort = example_cohort();
        assert!(!cohort.is_rare(0, A).unwrap());
        assert!(cohort.is_rare(0, C).unwrap());
        assert_eq!(cohort.active_rows(0, A).unwrap(), &[2]);
        assert_eq!(cohort.active_rows(0, C).unwrap(), &[2]);
        // absent allele: the empty match side is rare
        assert!(cohort.is_rare(2, C).unwrap());
        assert!(cohort.active_rows(2, C).unwrap().is_empty());
    }

    #[test]
    fn test_tie_counts_as_rare() {
        let cohort = HaplotypeCohort::new(vec![vec![A, A, C, C]], 4);
        assert!(cohort.is_rare(0, A).unwrap());
        assert_eq!(cohort.active_rows(0, A).unwrap(), &[0, 1]);
    }
}
