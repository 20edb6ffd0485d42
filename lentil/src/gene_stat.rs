use crate::common::*;

#[derive(Clone, Debug, PartialEq)]
pub struct GeneStat {
    pub gene: Box<str>,
    pub mean: f64,
    pub std: f64,
}

/// Per-gene summary of the denoised expression
#[derive(Clone, Debug, Default)]
pub struct GeneStatTable {
    rows: Vec<GeneStat>,
}

/// Genes whose standard deviation is strictly above the median
#[derive(Clone, Debug)]
pub struct HvgSelection {
    pub median: f64,
    /// in descending order of standard deviation
    pub genes: Vec<GeneStat>,
}

impl HvgSelection {
    pub fn gene_names(&self) -> Vec<Box<str>> {
        self.genes.iter().map(|g| g.gene.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

impl GeneStatTable {
    /// Every statistic must be finite.
    ///
    /// * `genes` - gene names
    /// * `mean` - per-gene mean
    /// * `std` - per-gene standard deviation
    pub fn new(genes: &[Box<str>], mean: &[f64], std: &[f64]) -> anyhow::Result<Self> {
        if genes.len() != mean.len() || genes.len() != std.len() {
            return Err(anyhow::anyhow!(
                "{} genes, {} means, {} standard deviations",
                genes.len(),
                mean.len(),
                std.len()
            ));
        }

        let rows = genes
            .iter()
            .zip(mean.iter().zip(std.iter()))
            .map(|(g, (&mean, &std))| {
                if mean.is_finite() && std.is_finite() {
                    Ok(GeneStat {
                        gene: g.clone(),
                        mean,
                        std,
                    })
                } else {
                    Err(HvgError::NonFiniteStatistic(g.clone()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[GeneStat] {
        &self.rows
    }

    /// Descending standard deviation; ties keep their current order
    pub fn sort_by_std_descending(&mut self) {
        self.rows.sort_by(|a, b| b.std.total_cmp(&a.std));
    }

    pub fn median_std(&self) -> Option<f64> {
        let std = self.rows.iter().map(|g| g.std).collect::<Vec<_>>();
        median(&std)
    }

    /// Keep genes with standard deviation strictly greater than the
    /// median, in the current row order
    pub fn select_above_median(&self) -> anyhow::Result<HvgSelection> {
        let median = self
            .median_std()
            .ok_or_else(|| anyhow::anyhow!("no gene statistics to select from"))?;

        let genes: Vec<GeneStat> = self
            .rows
            .iter()
            .filter(|g| g.std > median)
            .cloned()
            .collect();

        if genes.is_empty() {
            return Err(HvgError::EmptySelection { median }.into());
        }

        Ok(HvgSelection { median, genes })
    }
}

/// Median of the values; the mean of the two middle ones for an even
/// count
pub fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(std: &[f64]) -> GeneStatTable {
        let genes: Vec<Box<str>> = (0..std.len()).map(|i| format!("G{}", i).into()).collect();
        GeneStatTable::new(&genes, &vec![0.; std.len()], std).unwrap()
    }

    #[test]
    fn median_of_odd_and_even() {
        assert_eq!(median(&[3., 1., 2.]), Some(2.));
        assert_eq!(median(&[4., 1., 3., 2.]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let mut t = table(&[1., 2., 2., 0.5, 2.]);
        t.sort_by_std_descending();
        let order: Vec<&str> = t.rows().iter().map(|g| g.gene.as_ref()).collect();
        assert_eq!(order, vec!["G1", "G2", "G4", "G0", "G3"]);
    }

    #[test]
    fn selection_is_strict() -> anyhow::Result<()> {
        // median 2 is shared by three genes; none of them is selected
        let mut t = table(&[1., 2., 2., 2., 5.]);
        t.sort_by_std_descending();
        let sel = t.select_above_median()?;
        assert_eq!(sel.median, 2.);
        assert_eq!(sel.gene_names(), vec![Box::from("G4")]);
        Ok(())
    }

    #[test]
    fn single_gene_selects_nothing() {
        let err = table(&[3.]).select_above_median().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HvgError>(),
            Some(HvgError::EmptySelection { .. })
        ));
    }

    #[test]
    fn non_finite_is_rejected() {
        let genes: Vec<Box<str>> = vec!["A".into(), "B".into()];
        let err = GeneStatTable::new(&genes, &[0., 0.], &[1., f64::NAN]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HvgError>(),
            Some(HvgError::NonFiniteStatistic(g)) if g.as_ref() == "B"
        ));
    }
}
