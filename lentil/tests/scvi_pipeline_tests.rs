use lentil::common::*;
use lentil::denoise::*;
use lentil::gene_list::*;
use lentil::hvg_output::write_hvg_genes;
use lentil::run_hvg::*;

use approx::assert_abs_diff_eq;
use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_scvi_model::{ScviLoadOptions, ScviModel};
use data_beans::anndata::AnnData;
use hdf5::types::VarLenUnicode;
use matrix_util::common_io::{create_temp_dir_file, read_lines};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;

const N_CELLS: usize = 40;
const N_GENES: usize = 6;
const N_LATENT: usize = 3;
const N_HIDDEN: usize = 8;
const N_BATCHES: usize = 2;

fn gene_names() -> Vec<String> {
    (0..N_GENES).map(|g| format!("gene{}", g)).collect()
}

fn write_strings(group: &hdf5::Group, name: &str, xs: &[String]) -> anyhow::Result<()> {
    let data = xs
        .iter()
        .map(|x| x.parse::<VarLenUnicode>())
        .collect::<Result<Vec<_>, _>>()?;
    group
        .new_dataset_builder()
        .with_data(data.as_slice())
        .create(name)?;
    Ok(())
}

fn write_str_attr(loc: &hdf5::Location, name: &str, value: &str) -> anyhow::Result<()> {
    let value: VarLenUnicode = value.parse()?;
    loc.new_attr::<VarLenUnicode>()
        .shape(())
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

/// Dense counts, two batches; or, given `qzv`, a minified file that
/// keeps only the latent posterior with that variance everywhere
fn write_h5ad(genes: &[String], qzv: Option<f32>) -> anyhow::Result<PathBuf> {
    let file_path = create_temp_dir_file(".h5ad")?;
    let file = hdf5::File::create(&file_path)?;
    let mut rng = StdRng::seed_from_u64(17);

    let var = file.create_group("var")?;
    write_str_attr(&var, "_index", "_index")?;
    write_strings(&var, "_index", genes)?;

    let obs = file.create_group("obs")?;
    write_str_attr(&obs, "_index", "_index")?;
    let cells: Vec<String> = (0..N_CELLS).map(|c| format!("cell{}", c)).collect();
    write_strings(&obs, "_index", &cells)?;
    let batch: Vec<i64> = (0..N_CELLS).map(|c| (c % N_BATCHES) as i64).collect();
    obs.new_dataset_builder()
        .with_data(batch.as_slice())
        .create(BATCH_KEY)?;

    if let Some(v) = qzv {
        let qzm = Array2::from_shape_fn((N_CELLS, N_LATENT), |_| rng.random_range(-1.0_f32..1.0));
        let qzv = Array2::from_elem((N_CELLS, N_LATENT), v);
        let obsm = file.create_group("obsm")?;
        obsm.new_dataset_builder().with_data(&qzm).create(LATENT_QZM_KEY)?;
        obsm.new_dataset_builder().with_data(&qzv).create(LATENT_QZV_KEY)?;

        let uns = file.create_group("uns")?;
        write_strings(&uns, MINIFY_TYPE_KEY, &["latent_posterior_parameters".to_string()])?;
    } else {
        let x = Array2::from_shape_fn((N_CELLS, genes.len()), |_| {
            rng.random_range(0..20) as f32
        });
        file.new_dataset_builder().with_data(&x).create("X")?;
    }

    Ok(file_path)
}

/// scVI weights with `n_cov` one-hot batch columns in the decoder
fn write_weights(with_encoder: bool, n_cov: usize) -> anyhow::Result<PathBuf> {
    let dev = Device::Cpu;
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    let mut put = |k: &str, shape: &[usize]| -> candle_util::candle_core::Result<()> {
        tensors.insert(k.to_string(), Tensor::randn(0_f32, 0.5, shape, &dev)?);
        Ok(())
    };

    put("decoder.px_decoder.fc_layers.Layer 0.0.weight", &[N_HIDDEN, N_LATENT + n_cov])?;
    put("decoder.px_decoder.fc_layers.Layer 0.0.bias", &[N_HIDDEN])?;
    put("decoder.px_scale_decoder.0.weight", &[N_GENES, N_HIDDEN])?;
    put("decoder.px_scale_decoder.0.bias", &[N_GENES])?;

    if with_encoder {
        put("z_encoder.encoder.fc_layers.Layer 0.0.weight", &[N_HIDDEN, N_GENES])?;
        put("z_encoder.encoder.fc_layers.Layer 0.0.bias", &[N_HIDDEN])?;
        put("z_encoder.mean_encoder.weight", &[N_LATENT, N_HIDDEN])?;
        put("z_encoder.mean_encoder.bias", &[N_LATENT])?;
        put("z_encoder.var_encoder.weight", &[N_LATENT, N_HIDDEN])?;
        put("z_encoder.var_encoder.bias", &[N_LATENT])?;
    }

    let file = create_temp_dir_file(".safetensors")?;
    candle_util::candle_core::safetensors::save(&tensors, &file)?;
    Ok(file)
}

fn open(file: &PathBuf) -> anyhow::Result<AnnData> {
    AnnData::open(&file.to_string_lossy())
}

fn load_model(weights: &PathBuf, latent: &LatentSource) -> anyhow::Result<ScviModel> {
    let options = ScviLoadOptions {
        n_latent: latent.stored_latent_dim(),
        ..Default::default()
    };
    ScviModel::load(weights, &Device::Cpu, &options)
}

fn small_config(seed: u64) -> HvgConfig {
    HvgConfig {
        sample_size: 30,
        seed,
        denoise: DenoiseConfig {
            batch_size: 8,
            ..Default::default()
        },
    }
}

#[test]
fn denoised_rows_sum_to_library_size() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), None)?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    assert!(matches!(latent, LatentSource::Counts(_)));

    let model = load_model(&write_weights(true, N_BATCHES)?, &latent)?;
    let denoiser = ScviDenoiser::new(&model, &adata, latent, &ScviDenoiseOptions::default())?;

    let all_genes: Vec<usize> = (0..N_GENES).collect();
    let mut rng = StdRng::seed_from_u64(1);
    let x = denoiser.denoise(&[0, 5, 9], &all_genes, 1e4, &mut rng)?;
    assert_eq!(x.dim(), (3, N_GENES));
    for row in x.rows() {
        assert_abs_diff_eq!(row.sum(), 1e4, epsilon = 1e-1);
        assert!(row.iter().all(|&v| v >= 0.));
    }

    // a gene subset is a column subset of the full output
    let mut rng = StdRng::seed_from_u64(1);
    let sub = denoiser.denoise(&[0, 5, 9], &[4, 1], 1e4, &mut rng)?;
    for i in 0..3 {
        assert_abs_diff_eq!(sub[(i, 0)], x[(i, 4)], epsilon = 1e-3);
        assert_abs_diff_eq!(sub[(i, 1)], x[(i, 1)], epsilon = 1e-3);
    }
    Ok(())
}

#[test]
fn hvg_from_counts_is_reproducible() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), None)?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(true, N_BATCHES)?, &latent)?;
    let denoiser = ScviDenoiser::new(&model, &adata, latent, &ScviDenoiseOptions::default())?;

    let candidates: Vec<Box<str>> = ["gene5", "gene0", "missing", "gene3", "gene1"]
        .iter()
        .map(|&g| g.into())
        .collect();
    let genes = intersect_genes(&candidates, adata.var_names())?;
    assert_eq!(genes.len(), 4);

    let first = select_hvg(&denoiser, adata.num_obs(), &genes, &small_config(42))?;
    let second = select_hvg(&denoiser, adata.num_obs(), &genes, &small_config(42))?;
    assert_eq!(first.selection.gene_names(), second.selection.gene_names());

    let names = first.selection.gene_names();
    assert!(!names.is_empty() && names.len() < genes.len());
    assert!(names.iter().all(|g| genes.names.contains(g)));

    let out = create_temp_dir_file(".txt")?;
    let out = out.to_string_lossy();
    write_hvg_genes(&first.selection, &out)?;
    assert_eq!(read_lines(&out)?, names);
    Ok(())
}

#[test]
fn minified_data_decodes_stored_posterior() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), Some(0.25))?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    assert_eq!(latent.stored_latent_dim(), Some(N_LATENT));

    let model = load_model(&write_weights(false, N_BATCHES)?, &latent)?;
    assert!(model.encoder.is_none());

    let options = ScviDenoiseOptions {
        use_posterior_mean: true,
        ..Default::default()
    };
    let denoiser = ScviDenoiser::new(&model, &adata, latent, &options)?;

    let candidates: Vec<Box<str>> = gene_names().into_iter().map(Box::from).collect();
    let genes = intersect_genes(&candidates, adata.var_names())?;
    let result = select_hvg(&denoiser, adata.num_obs(), &genes, &small_config(7))?;
    assert!(result.selection.len() <= N_GENES / 2);
    Ok(())
}

fn minified_denoiser<'a>(
    model: &'a ScviModel,
    adata: &'a AnnData,
    options: &ScviDenoiseOptions,
) -> anyhow::Result<ScviDenoiser<'a>> {
    let latent = LatentSource::from_adata(adata, None)?;
    ScviDenoiser::new(model, adata, latent, options)
}

#[test]
fn tight_posterior_samples_match_the_mean() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), Some(1e-8))?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(false, N_BATCHES)?, &latent)?;

    let sampled = minified_denoiser(&model, &adata, &ScviDenoiseOptions::default())?;
    let mean_options = ScviDenoiseOptions {
        use_posterior_mean: true,
        ..Default::default()
    };
    let mean = minified_denoiser(&model, &adata, &mean_options)?;

    let cells = [0, 3, 8, 21, 39];
    let genes: Vec<usize> = (0..N_GENES).collect();
    let x = sampled.denoise(&cells, &genes, 1e4, &mut StdRng::seed_from_u64(5))?;
    let y = mean.denoise(&cells, &genes, 1e4, &mut StdRng::seed_from_u64(5))?;
    for (a, b) in x.iter().zip(y.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-2 + 1e-3 * b.abs());
    }
    Ok(())
}

#[test]
fn posterior_samples_follow_the_seed() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), Some(0.25))?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(false, N_BATCHES)?, &latent)?;
    let denoiser = minified_denoiser(&model, &adata, &ScviDenoiseOptions::default())?;

    let cells = [1, 2, 30];
    let genes: Vec<usize> = (0..N_GENES).collect();
    let run = |seed: u64| denoiser.denoise(&cells, &genes, 1e4, &mut StdRng::seed_from_u64(seed));

    let first = run(1)?;
    assert_eq!(first, run(1)?);

    let other = run(2)?;
    let largest_gap = first
        .iter()
        .zip(other.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0_f32, f32::max);
    assert!(largest_gap > 1e-2, "seeds 1 and 2 gave the same draws");
    Ok(())
}

#[test]
fn averaged_posterior_samples_keep_library_size() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), Some(0.25))?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(false, N_BATCHES)?, &latent)?;

    let options = ScviDenoiseOptions {
        posterior_samples: 4,
        ..Default::default()
    };
    let averaged = minified_denoiser(&model, &adata, &options)?;
    let single = minified_denoiser(&model, &adata, &ScviDenoiseOptions::default())?;

    let cells = [4, 11, 17, 26];
    let genes: Vec<usize> = (0..N_GENES).collect();
    let x = averaged.denoise(&cells, &genes, 1e4, &mut StdRng::seed_from_u64(8))?;
    assert_eq!(x.dim(), (cells.len(), N_GENES));
    for row in x.rows() {
        assert_abs_diff_eq!(row.sum(), 1e4, epsilon = 1e-1);
        assert!(row.iter().all(|&v| v >= 0.));
    }

    let y = single.denoise(&cells, &genes, 1e4, &mut StdRng::seed_from_u64(8))?;
    assert_ne!(x, y);
    Ok(())
}

#[test]
fn gene_axis_must_match_the_model() -> anyhow::Result<()> {
    let mut genes = gene_names();
    genes.push("extra".to_string());
    let adata = open(&write_h5ad(&genes, None)?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(true, N_BATCHES)?, &latent)?;

    let err = ScviDenoiser::new(&model, &adata, latent, &ScviDenoiseOptions::default())
        .err()
        .expect("gene axis mismatch");
    assert!(matches!(
        err.downcast_ref::<HvgError>(),
        Some(HvgError::GeneAxisMismatch {
            model: N_GENES,
            data: 7
        })
    ));
    Ok(())
}

#[test]
fn covariate_width_must_match_the_model() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), None)?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(true, 3)?, &latent)?;

    let err = ScviDenoiser::new(&model, &adata, latent, &ScviDenoiseOptions::default())
        .err()
        .expect("covariate mismatch");
    assert!(matches!(
        err.downcast_ref::<HvgError>(),
        Some(HvgError::CovariateMismatch {
            expected: 3,
            found: 2
        })
    ));
    Ok(())
}

#[test]
fn missing_covariate_falls_back_to_first_category() -> anyhow::Result<()> {
    let adata = open(&write_h5ad(&gene_names(), None)?)?;
    let latent = LatentSource::from_adata(&adata, None)?;
    let model = load_model(&write_weights(true, N_BATCHES)?, &latent)?;

    let options = ScviDenoiseOptions {
        covariate_keys: vec!["no_such_column".into()],
        ..Default::default()
    };
    let denoiser = ScviDenoiser::new(&model, &adata, latent, &options)?;

    let mut rng = StdRng::seed_from_u64(3);
    let x = denoiser.denoise(&[1, 2], &[0, 1, 2], DEFAULT_LIBRARY_SIZE, &mut rng)?;
    assert!(x.iter().all(|v| v.is_finite()));
    Ok(())
}
