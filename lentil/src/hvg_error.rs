/// Failures of the HVG pipeline that callers may want to tell apart.
/// Everything else travels as a plain `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum HvgError {
    #[error("gene list is empty: {0}")]
    EmptyGeneList(Box<str>),

    #[error("none of the {requested} requested genes is found in the data")]
    NoValidGenes { requested: usize },

    #[error("cannot sample {requested} cells without replacement from {available} cells")]
    SampleTooLarge { requested: usize, available: usize },

    #[error("at least 2 cells are needed for a sample standard deviation, got {0}")]
    SampleTooSmall(usize),

    #[error("no gene has a standard deviation above the median ({median})")]
    EmptySelection { median: f64 },

    #[error("non-finite statistic for gene {0}")]
    NonFiniteStatistic(Box<str>),

    #[error("{file} of {repo} is neither cached nor downloadable: {reason}")]
    ModelUnavailable {
        repo: Box<str>,
        file: Box<str>,
        reason: String,
    },

    #[error("the model has {model} genes, but the data has {data}")]
    GeneAxisMismatch { model: usize, data: usize },

    #[error("the model expects {expected} covariate columns, but the obs columns give {found}")]
    CovariateMismatch { expected: usize, found: usize },
}
