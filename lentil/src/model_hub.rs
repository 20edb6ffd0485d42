use crate::common::*;

use candle_util::candle_core::{utils, Device};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device`; `auto` takes CUDA, then Metal, then
    /// the CPU
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
            ComputeDevice::Auto => {
                if utils::cuda_is_available() {
                    Device::new_cuda(device_no)?
                } else if utils::metal_is_available() {
                    Device::new_metal(device_no)?
                } else {
                    Device::Cpu
                }
            }
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelSourceArgs {
    #[arg(
        long,
        default_value = DEFAULT_REPO,
        help = "Model repository on the Hugging Face hub"
    )]
    pub repo: Box<str>,

    #[arg(long, default_value = DEFAULT_REVISION, help = "Repository revision")]
    pub revision: Box<str>,

    #[arg(
        long,
        default_value = DEFAULT_CACHE_DIR,
        help = "Download cache directory",
        long_help = "Download cache directory.\n\
		     Files already in this cache are not downloaded again."
    )]
    pub cache_dir: Box<str>,

    #[arg(
        long,
        help = "Local model directory",
        long_help = "A directory that already holds the model files\n\
		     (model.safetensors or model.pt, and adata.h5ad).\n\
		     Nothing is downloaded when this is given."
    )]
    pub model_dir: Option<Box<str>>,
}

/// Local paths of the model files
#[derive(Clone, Debug)]
pub struct ModelArtifacts {
    pub weights: PathBuf,
    /// the AnnData shipped with the model
    pub adata: Option<PathBuf>,
}

/// Resolve the model files: a local directory if given, then the hub
/// cache, then a download
///
/// * `source` - repository and cache
/// * `with_adata` - also fetch the AnnData shipped with the model
pub fn fetch_model_artifacts(
    source: &ModelSourceArgs,
    with_adata: bool,
) -> anyhow::Result<ModelArtifacts> {
    if let Some(dir) = source.model_dir.as_deref() {
        return local_model_artifacts(Path::new(dir), with_adata);
    }

    let mut hub = HubRepo::new(source)?;

    let mut reasons = vec![];
    let mut weights = None;
    for file in WEIGHTS_FILES {
        match hub.get(file) {
            Ok(path) => {
                weights = Some(path);
                break;
            }
            Err(reason) => reasons.push(format!("{}: {}", file, reason)),
        }
    }

    let weights = weights.ok_or_else(|| HvgError::ModelUnavailable {
        repo: source.repo.clone(),
        file: WEIGHTS_FILES.join(" | ").into(),
        reason: reasons.join("; "),
    })?;
    info!("model weights: {}", weights.display());

    let adata = if with_adata {
        let path = hub.get(ADATA_FILE).map_err(|reason| HvgError::ModelUnavailable {
            repo: source.repo.clone(),
            file: ADATA_FILE.into(),
            reason,
        })?;
        info!("model data: {}", path.display());
        Some(path)
    } else {
        None
    };

    Ok(ModelArtifacts { weights, adata })
}

fn local_model_artifacts(dir: &Path, with_adata: bool) -> anyhow::Result<ModelArtifacts> {
    let weights = WEIGHTS_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.exists())
        .ok_or_else(|| HvgError::ModelUnavailable {
            repo: dir.to_string_lossy().into(),
            file: WEIGHTS_FILES.join(" | ").into(),
            reason: "not in the local model directory".into(),
        })?;

    let adata = if with_adata {
        let path = dir.join(ADATA_FILE);
        if !path.exists() {
            return Err(HvgError::ModelUnavailable {
                repo: dir.to_string_lossy().into(),
                file: ADATA_FILE.into(),
                reason: "not in the local model directory".into(),
            }
            .into());
        }
        Some(path)
    } else {
        None
    };

    info!("model weights: {}", weights.display());
    Ok(ModelArtifacts { weights, adata })
}

/// Cache first; the network is only touched on a miss
struct HubRepo {
    repo: Repo,
    cache_dir: PathBuf,
    api: Option<hf_hub::api::sync::ApiRepo>,
}

impl HubRepo {
    fn new(source: &ModelSourceArgs) -> anyhow::Result<Self> {
        let cache_dir = PathBuf::from(source.cache_dir.as_ref());
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            repo: Repo::with_revision(
                source.repo.to_string(),
                RepoType::Model,
                source.revision.to_string(),
            ),
            cache_dir,
            api: None,
        })
    }

    fn get(&mut self, file: &str) -> Result<PathBuf, String> {
        let cached = Cache::new(self.cache_dir.clone())
            .repo(self.repo.clone())
            .get(file);

        if let Some(path) = cached {
            info!("found {} in {}", file, self.cache_dir.display());
            return Ok(path);
        }

        if self.api.is_none() {
            let api = ApiBuilder::new()
                .with_cache_dir(self.cache_dir.clone())
                .with_progress(true)
                .build()
                .map_err(|e| e.to_string())?;
            self.api = Some(api.repo(self.repo.clone()));
        }

        let api = self.api.as_ref().ok_or("no hub client")?;
        info!("downloading {} ...", file);
        api.get(file).map_err(|e| e.to_string())
    }
}
