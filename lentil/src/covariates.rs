use crate::common::*;
use data_beans::anndata::AnnData;

/// One-hot design of categorical `obs` columns, laid out block after
/// block in the order of the keys
#[derive(Clone, Debug)]
pub struct CovariateDesign {
    blocks: Vec<CovariateBlock>,
    width: usize,
}

#[derive(Clone, Debug)]
struct CovariateBlock {
    name: Box<str>,
    /// `None`: every cell takes category 0
    codes: Option<Vec<usize>>,
    n_categories: usize,
}

impl CovariateDesign {
    /// Read the covariate columns from `obs` and match them to the
    /// width the model expects
    ///
    /// * `adata` - data
    /// * `keys` - `obs` columns, in the order the model was set up with
    /// * `expected_width` - number of one-hot columns the model takes
    pub fn from_obs(
        adata: &AnnData,
        keys: &[Box<str>],
        expected_width: usize,
    ) -> anyhow::Result<Option<Self>> {
        if expected_width == 0 {
            return Ok(None);
        }

        let mut blocks = vec![];
        for key in keys {
            match adata.obs_codes(key)? {
                Some(c) if c.n_categories <= 1 => {
                    info!("covariate {} has a single category; skipped", key);
                }
                Some(c) => {
                    info!("covariate {}: {} categories", key, c.n_categories);
                    blocks.push(CovariateBlock {
                        name: key.clone(),
                        codes: Some(c.codes),
                        n_categories: c.n_categories,
                    });
                }
                None => warn!("no obs column {} in {}", key, adata.file_path()),
            }
        }

        if blocks.is_empty() {
            warn!(
                "the model takes {} covariate columns but none was found; \
                 every cell is assigned to the first category",
                expected_width
            );
            blocks.push(CovariateBlock {
                name: "(default)".into(),
                codes: None,
                n_categories: expected_width,
            });
        }

        let width: usize = blocks.iter().map(|b| b.n_categories).sum();
        if width != expected_width {
            return Err(HvgError::CovariateMismatch {
                expected: expected_width,
                found: width,
            }
            .into());
        }

        Ok(Some(Self { blocks, width }))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// One-hot rows of `cells` (cells x width), row-major
    pub fn one_hot(&self, cells: &[usize]) -> anyhow::Result<Vec<f32>> {
        let mut ret = vec![0_f32; cells.len() * self.width];
        let mut offset = 0;
        for b in self.blocks.iter() {
            for (i, &c) in cells.iter().enumerate() {
                let k = match &b.codes {
                    Some(codes) => *codes.get(c).ok_or_else(|| {
                        anyhow::anyhow!("cell {} is out of range of covariate {}", c, b.name)
                    })?,
                    None => 0,
                };
                if k >= b.n_categories {
                    return Err(anyhow::anyhow!(
                        "covariate {}: code {} >= {} categories",
                        b.name,
                        k,
                        b.n_categories
                    ));
                }
                ret[i * self.width + offset + k] = 1.;
            }
            offset += b.n_categories;
        }
        Ok(ret)
    }
}
