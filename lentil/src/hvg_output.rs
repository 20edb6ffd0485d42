use crate::common::*;
use crate::gene_stat::{GeneStatTable, HvgSelection};
use matrix_util::common_io::write_lines;

/// Selected gene names, one per line, in descending order of
/// standard deviation
pub fn write_hvg_genes(selection: &HvgSelection, out_file: &str) -> anyhow::Result<()> {
    write_lines(&selection.gene_names(), out_file)?;
    info!("Wrote {} genes to {}", selection.len(), out_file);
    Ok(())
}

/// Tab-separated `gene  mean  std  selected` for every valid gene
///
/// * `table` - statistics, in the order they should appear
/// * `median` - selection threshold
/// * `out_file` - output file (`.gz` for gzip)
pub fn write_gene_stats(table: &GeneStatTable, median: f64, out_file: &str) -> anyhow::Result<()> {
    let header = std::iter::once("gene\tmean\tstd\tselected".to_string());
    let lines = table.rows().iter().map(|g| {
        format!(
            "{}\t{}\t{}\t{}",
            g.gene,
            g.mean,
            g.std,
            u8::from(g.std > median)
        )
    });
    let lines: Vec<String> = header.chain(lines).collect();
    write_lines(&lines, out_file)?;
    info!("Wrote statistics of {} genes to {}", table.len(), out_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::{create_temp_dir_file, read_lines};

    #[test]
    fn stats_table_marks_selected_genes() -> anyhow::Result<()> {
        let genes: Vec<Box<str>> = vec!["A".into(), "B".into(), "C".into()];
        let mut table = GeneStatTable::new(&genes, &[1., 2., 3.], &[0.5, 3., 1.])?;
        table.sort_by_std_descending();
        let selection = table.select_above_median()?;

        let stats_file = create_temp_dir_file(".tsv")?;
        let stats_file = stats_file.to_string_lossy();
        write_gene_stats(&table, selection.median, &stats_file)?;

        let lines = read_lines(&stats_file)?;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].as_ref(), "gene\tmean\tstd\tselected");
        assert_eq!(lines[1].as_ref(), "B\t2\t3\t1");
        assert_eq!(lines[2].as_ref(), "C\t3\t1\t0");
        assert_eq!(lines[3].as_ref(), "A\t1\t0.5\t0");

        let hvg_file = create_temp_dir_file(".txt")?;
        let hvg_file = hvg_file.to_string_lossy();
        write_hvg_genes(&selection, &hvg_file)?;
        assert_eq!(read_lines(&hvg_file)?, vec![Box::from("B")]);
        Ok(())
    }
}
