use crate::common::*;
use matrix_util::common_io::read_lines;
use std::collections::{HashMap, HashSet};

/// Genes of the candidate list found in the data, in list order
#[derive(Clone, Debug, PartialEq)]
pub struct ValidGenes {
    pub names: Vec<Box<str>>,
    /// column of each gene in the data
    pub indices: Vec<usize>,
}

impl ValidGenes {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Trim every line, drop blank ones, and keep the first occurrence
/// of each name
pub fn parse_gene_list<I, S>(lines: I) -> Vec<Box<str>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut ret = vec![];
    for line in lines {
        let name = line.as_ref().trim();
        if !name.is_empty() && seen.insert(name.to_string()) {
            ret.push(Box::from(name));
        }
    }
    ret
}

/// Read candidate genes, one per line
///
/// * `file_path` - plain text or gzipped
pub fn read_gene_list(file_path: &str) -> anyhow::Result<Vec<Box<str>>> {
    let genes = parse_gene_list(read_lines(file_path)?);
    if genes.is_empty() {
        return Err(HvgError::EmptyGeneList(file_path.into()).into());
    }
    info!("Read {} candidate genes from {}", genes.len(), file_path);
    Ok(genes)
}

/// Keep the candidates present in `var_names`, preserving their order
///
/// * `candidates` - candidate gene names
/// * `var_names` - gene names of the data
pub fn intersect_genes(
    candidates: &[Box<str>],
    var_names: &[Box<str>],
) -> anyhow::Result<ValidGenes> {
    let name_to_idx: HashMap<&str, usize> = var_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_ref(), i))
        .collect();

    let (names, indices): (Vec<Box<str>>, Vec<usize>) = candidates
        .iter()
        .filter_map(|g| name_to_idx.get(g.as_ref()).map(|&i| (g.clone(), i)))
        .unzip();

    info!(
        "Found {} valid genes out of {} in the list",
        names.len(),
        candidates.len()
    );

    if names.is_empty() {
        return Err(HvgError::NoValidGenes {
            requested: candidates.len(),
        }
        .into());
    }

    Ok(ValidGenes { names, indices })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(xs: &[&str]) -> Vec<Box<str>> {
        xs.iter().map(|&x| Box::from(x)).collect()
    }

    #[test]
    fn parse_trims_and_dedups() {
        let lines = ["  GAPDH ", "", "ACTB", "\t", "GAPDH", "CD3E\r"];
        assert_eq!(parse_gene_list(lines), boxed(&["GAPDH", "ACTB", "CD3E"]));
    }

    #[test]
    fn intersect_keeps_list_order() -> anyhow::Result<()> {
        let var_names = boxed(&["A", "B", "C", "D"]);
        let valid = intersect_genes(&boxed(&["D", "X", "B", "A"]), &var_names)?;
        assert_eq!(valid.names, boxed(&["D", "B", "A"]));
        assert_eq!(valid.indices, vec![3, 1, 0]);
        Ok(())
    }

    #[test]
    fn intersect_nothing_is_an_error() {
        let err = intersect_genes(&boxed(&["X", "Y"]), &boxed(&["A"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HvgError>(),
            Some(HvgError::NoValidGenes { requested: 2 })
        ));
    }
}
