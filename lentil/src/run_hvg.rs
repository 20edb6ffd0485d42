use crate::cell_sampling::sample_cells;
use crate::common::*;
use crate::denoise::*;
use crate::gene_list::*;
use crate::gene_stat::*;
use crate::hvg_output::*;
use crate::model_hub::*;

use candle_util::candle_scvi_model::{ScviLoadOptions, ScviModel};
use data_beans::anndata::AnnData;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct HvgArgs {
    #[command(flatten)]
    pub source: ModelSourceArgs,

    #[arg(
        long,
        help = "AnnData (.h5ad) file",
        long_help = "AnnData (.h5ad) file to select genes from.\n\
		     Default: the adata.h5ad shipped with the model."
    )]
    pub data: Option<Box<str>>,

    #[arg(
        long,
        default_value = DEFAULT_GENE_LIST,
        help = "Candidate genes, one per line"
    )]
    pub gene_list: Box<str>,

    #[arg(
        long,
        short,
        default_value = DEFAULT_OUTPUT,
        help = "Output file of the selected genes"
    )]
    pub out: Box<str>,

    #[arg(
        long,
        help = "Per-gene statistics",
        long_help = "Write tab-separated per-gene statistics:\n\
		     gene, mean, std, selected (1/0),\n\
		     in descending order of std."
    )]
    pub stats_out: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = DEFAULT_SAMPLE_SIZE,
        help = "Number of cells to sample without replacement"
    )]
    pub sample_size: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_LIBRARY_SIZE,
        help = "Library size of the denoised expression"
    )]
    pub library_size: f32,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, help = "Cells per minibatch")]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        default_value_t = 1,
        help = "Posterior samples averaged per cell"
    )]
    pub posterior_samples: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Decode the posterior mean instead of a sample"
    )]
    pub use_posterior_mean: bool,

    #[arg(long, help = "Count layer (default: X)")]
    pub layer: Option<Box<str>>,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = BATCH_KEY,
        help = "Categorical obs columns the model was trained with",
        long_help = "Categorical obs columns the model was trained with,\n\
		     comma-separated, in the order they were registered."
    )]
    pub covariate_keys: Vec<Box<str>>,

    #[arg(
        long,
        default_value_t = false,
        help = "The model was trained with layer norm"
    )]
    pub use_layer_norm: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Encode raw counts, not log1p",
        long_help = "The model was trained with log_variational=False:\n\
		     feed raw counts to the encoder instead of log1p(counts)."
    )]
    pub no_log_variational: bool,

    #[arg(long, value_enum, default_value = "auto", help = "Compute device")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device number")]
    pub device_no: usize,

    #[arg(long, default_value_t = false, help = "Hide the progress bar")]
    pub hide_progress: bool,
}

impl HvgArgs {
    /// What the weights cannot tell about the model
    pub fn scvi_load_options(&self, n_latent: Option<usize>) -> ScviLoadOptions {
        ScviLoadOptions {
            n_latent,
            use_layer_norm: self.use_layer_norm,
            log_variational: !self.no_log_variational,
        }
    }
}

/// Settings of [`select_hvg`]
#[derive(Clone, Debug)]
pub struct HvgConfig {
    pub sample_size: usize,
    pub seed: u64,
    pub denoise: DenoiseConfig,
}

impl Default for HvgConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: DEFAULT_SEED,
            denoise: DenoiseConfig::default(),
        }
    }
}

pub struct HvgResult {
    pub cells: Vec<usize>,
    /// every valid gene, sorted by descending std
    pub stats: GeneStatTable,
    pub selection: HvgSelection,
}

/// Sample cells, denoise them, and keep the genes whose standard
/// deviation is above the median
///
/// * `denoiser` - model
/// * `n_obs` - number of cells in the data
/// * `genes` - valid genes
/// * `config` - sample size, seed, denoising
pub fn select_hvg<D>(
    denoiser: &D,
    n_obs: usize,
    genes: &ValidGenes,
    config: &HvgConfig,
) -> anyhow::Result<HvgResult>
where
    D: ExpressionDenoiser + ?Sized,
{
    let mut rng = StdRng::seed_from_u64(config.seed);
    let cells = sample_cells(n_obs, config.sample_size, &mut rng)?;

    let mut stats = denoised_gene_statistics(denoiser, &cells, genes, &config.denoise, &mut rng)?;
    stats.sort_by_std_descending();

    let selection = stats.select_above_median()?;
    info!(
        "{} of {} genes have std above the median {:.6}",
        selection.len(),
        stats.len(),
        selection.median
    );
    for (i, g) in selection.genes.iter().take(5).enumerate() {
        info!("[{}] {}\tstd = {:.6}", i + 1, g.gene, g.std);
    }

    Ok(HvgResult {
        cells,
        stats,
        selection,
    })
}

pub fn run_hvg(args: &HvgArgs) -> anyhow::Result<()> {
    let device = args.device.to_device(args.device_no)?;
    info!("device: {:?}", device);

    let artifacts = fetch_model_artifacts(&args.source, args.data.is_none())?;

    let data_file: Box<str> = match (&args.data, &artifacts.adata) {
        (Some(file), _) => file.clone(),
        (None, Some(path)) => path.to_string_lossy().into(),
        (None, None) => return Err(anyhow::anyhow!("no data file")),
    };

    let adata = AnnData::open(&data_file)?;

    let candidates = read_gene_list(&args.gene_list)?;
    let genes = intersect_genes(&candidates, adata.var_names())?;

    let latent = LatentSource::from_adata(&adata, args.layer.as_deref())?;

    let load_options = args.scvi_load_options(latent.stored_latent_dim());
    let model = ScviModel::load(&artifacts.weights, &device, &load_options)?;

    let denoise_options = ScviDenoiseOptions {
        covariate_keys: args.covariate_keys.clone(),
        posterior_samples: args.posterior_samples,
        use_posterior_mean: args.use_posterior_mean,
    };
    let denoiser = ScviDenoiser::new(&model, &adata, latent, &denoise_options)?;

    let config = HvgConfig {
        sample_size: args.sample_size,
        seed: args.seed,
        denoise: DenoiseConfig {
            library_size: args.library_size,
            batch_size: args.batch_size,
            show_progress: !args.hide_progress,
        },
    };

    let result = select_hvg(&denoiser, adata.num_obs(), &genes, &config)?;

    write_hvg_genes(&result.selection, &args.out)?;

    if let Some(stats_file) = args.stats_out.as_deref() {
        write_gene_stats(&result.stats, result.selection.median, stats_file)?;
    }

    info!("done");
    Ok(())
}
