//! Read-only access to AnnData `.h5ad` files.
//!
//! Only metadata (gene names, number of cells, covariate codes) is
//! loaded eagerly. Expression values are read row by row, so a small
//! subsample of cells can be pulled out of a very large file.
//!
//! AnnData stores (obs x var) = (cells x features). Here a "row" is
//! always a cell.

use crate::misc::{read_hdf5_strings, read_string_attr};
use log::info;
use ndarray::{s, Array1, Array2};
use std::collections::HashSet;

pub struct AnnData {
    file: hdf5::File,
    file_path: Box<str>,
    n_obs: usize,
    var_names: Vec<Box<str>>,
}

/// Integer codes of a categorical `obs` column
pub struct CategoryCodes {
    pub codes: Vec<usize>,
    pub n_categories: usize,
    pub categories: Option<Vec<Box<str>>>,
}

/// A (cells x columns) matrix in the file that can be read by rows
pub enum RowMatrix {
    Dense {
        data: hdf5::Dataset,
        nrows: usize,
        ncols: usize,
    },
    Csr {
        data: hdf5::Dataset,
        indices: hdf5::Dataset,
        indptr: hdf5::Dataset,
        nrows: usize,
        ncols: usize,
    },
}

impl AnnData {
    /// Open an `.h5ad` file and read its gene names
    ///
    /// * `file_path` - path to the `.h5ad` file
    pub fn open(file_path: &str) -> anyhow::Result<Self> {
        let file = hdf5::File::open(file_path)
            .map_err(|e| anyhow::anyhow!("failed to open AnnData {}: {}", file_path, e))?;
        info!("Opened AnnData h5ad file: {}", file_path);

        let var_group = file.group("var")?;
        let var_names = read_dataframe_index(&var_group)?
            .ok_or_else(|| anyhow::anyhow!("no gene names under var/ in {}", file_path))?;

        {
            let mut seen = HashSet::with_capacity(var_names.len());
            if let Some(dup) = var_names.iter().find(|x| !seen.insert(x.as_ref())) {
                return Err(anyhow::anyhow!(
                    "gene names are not unique in {}: {}",
                    file_path,
                    dup
                ));
            }
        }

        let n_obs = match file.group("obs").ok() {
            Some(obs_group) => read_dataframe_index(&obs_group)?.map(|x| x.len()),
            None => None,
        };

        let n_obs = match n_obs {
            Some(n) => n,
            None => {
                let x = RowMatrix::open(&file, "X")?
                    .ok_or_else(|| anyhow::anyhow!("neither obs/_index nor X in {}", file_path))?;
                x.nrows()
            }
        };

        info!(
            "AnnData: {} cells x {} genes",
            n_obs,
            var_names.len()
        );

        Ok(Self {
            file,
            file_path: file_path.into(),
            n_obs,
            var_names,
        })
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn num_obs(&self) -> usize {
        self.n_obs
    }

    pub fn num_vars(&self) -> usize {
        self.var_names.len()
    }

    pub fn var_names(&self) -> &[Box<str>] {
        &self.var_names
    }

    /// The count matrix: `X` or `layers/{layer}`. `None` if absent.
    pub fn count_matrix(&self, layer: Option<&str>) -> anyhow::Result<Option<RowMatrix>> {
        let key = match layer {
            Some(layer) => format!("layers/{}", layer),
            None => "X".to_string(),
        };

        let ret = RowMatrix::open(&self.file, &key)?;
        if let Some(x) = &ret {
            if x.ncols() != self.num_vars() || x.nrows() != self.num_obs() {
                return Err(anyhow::anyhow!(
                    "{} is {} x {}, but expected {} x {}",
                    key,
                    x.nrows(),
                    x.ncols(),
                    self.num_obs(),
                    self.num_vars()
                ));
            }
        }
        Ok(ret)
    }

    /// A dense `obsm/{key}` matrix. `None` if absent.
    pub fn obsm(&self, key: &str) -> anyhow::Result<Option<RowMatrix>> {
        let ret = RowMatrix::open(&self.file, &format!("obsm/{}", key))?;
        if let Some(x) = &ret {
            if x.nrows() != self.num_obs() {
                return Err(anyhow::anyhow!(
                    "obsm/{} has {} rows for {} cells",
                    key,
                    x.nrows(),
                    self.num_obs()
                ));
            }
        }
        Ok(ret)
    }

    /// Whether `uns/{key}` exists
    pub fn has_uns(&self, key: &str) -> bool {
        link_path_exists(&self.file, &format!("uns/{}", key))
    }

    /// Codes of an `obs` column, either an AnnData categorical or a
    /// non-negative integer column. `None` if the column is absent.
    pub fn obs_codes(&self, key: &str) -> anyhow::Result<Option<CategoryCodes>> {
        let obs_key = format!("obs/{}", key);
        if !link_path_exists(&self.file, &obs_key) {
            return Ok(None);
        }

        let ret = if let Ok(group) = self.file.group(&obs_key) {
            // categorical: {codes, categories}
            let categories = read_hdf5_strings(&group.dataset("categories")?)?;
            let raw = group.dataset("codes")?.read_1d::<i64>()?;
            let codes = raw
                .iter()
                .map(|&c| {
                    if c < 0 || c as usize >= categories.len() {
                        Err(anyhow::anyhow!("missing or invalid category in obs/{}", key))
                    } else {
                        Ok(c as usize)
                    }
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            CategoryCodes {
                codes,
                n_categories: categories.len(),
                categories: Some(categories),
            }
        } else {
            let raw = self.file.dataset(&obs_key)?.read_1d::<i64>()?;
            if raw.iter().any(|&c| c < 0) {
                return Err(anyhow::anyhow!("negative codes in obs/{}", key));
            }
            let codes: Vec<usize> = raw.iter().map(|&c| c as usize).collect();
            let n_categories = codes.iter().max().map(|&m| m + 1).unwrap_or(0);
            CategoryCodes {
                codes,
                n_categories,
                categories: None,
            }
        };

        if ret.codes.len() != self.num_obs() {
            return Err(anyhow::anyhow!(
                "obs/{} has {} entries for {} cells",
                key,
                ret.codes.len(),
                self.num_obs()
            ));
        }

        Ok(Some(ret))
    }
}

impl RowMatrix {
    /// Open a dense dataset or a CSR group at `key`
    fn open(file: &hdf5::File, key: &str) -> anyhow::Result<Option<Self>> {
        if !link_path_exists(file, key) {
            return Ok(None);
        }

        if let Ok(data) = file.dataset(key) {
            let shape = data.shape();
            if shape.len() != 2 {
                return Err(anyhow::anyhow!("{} is not a matrix: {:?}", key, shape));
            }
            return Ok(Some(RowMatrix::Dense {
                data,
                nrows: shape[0],
                ncols: shape[1],
            }));
        }

        let group = file.group(key)?;
        let encoding = read_string_attr(&group, "encoding-type").unwrap_or_default();

        if encoding.contains("csc") {
            return Err(anyhow::anyhow!(
                "{} is stored as CSC; row access needs a CSR or dense matrix",
                key
            ));
        }

        let shape = group.attr("shape")?.read_1d::<i64>()?;
        if shape.len() != 2 {
            return Err(anyhow::anyhow!("invalid shape attribute on {}", key));
        }

        Ok(Some(RowMatrix::Csr {
            data: group.dataset("data")?,
            indices: group.dataset("indices")?,
            indptr: group.dataset("indptr")?,
            nrows: shape[0] as usize,
            ncols: shape[1] as usize,
        }))
    }

    pub fn nrows(&self) -> usize {
        match self {
            RowMatrix::Dense { nrows, .. } | RowMatrix::Csr { nrows, .. } => *nrows,
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            RowMatrix::Dense { ncols, .. } | RowMatrix::Csr { ncols, .. } => *ncols,
        }
    }

    /// Read the selected rows into a dense (rows.len() x ncols) array,
    /// in the order given
    pub fn read_rows(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        let nrows = self.nrows();
        if let Some(&r) = rows.iter().find(|&&r| r >= nrows) {
            return Err(anyhow::anyhow!("row {} out of range ({} rows)", r, nrows));
        }

        let mut ret = Array2::<f32>::zeros((rows.len(), self.ncols()));

        match self {
            RowMatrix::Dense { data, .. } => {
                for (i, &r) in rows.iter().enumerate() {
                    let x = data.read_slice_2d::<f32, _>(s![r..r + 1, ..])?;
                    ret.row_mut(i).assign(&x.row(0));
                }
            }
            RowMatrix::Csr {
                data,
                indices,
                indptr,
                ncols,
                ..
            } => {
                for (i, &r) in rows.iter().enumerate() {
                    let ptr: Array1<u64> = indptr.read_slice_1d::<u64, _>(s![r..r + 2])?;
                    let (start, end) = (ptr[0] as usize, ptr[1] as usize);
                    if end <= start {
                        continue;
                    }
                    let values = data.read_slice_1d::<f32, _>(s![start..end])?;
                    let columns = indices.read_slice_1d::<u64, _>(s![start..end])?;
                    let mut row = ret.row_mut(i);
                    for (&j, &x) in columns.iter().zip(values.iter()) {
                        let j = j as usize;
                        if j >= *ncols {
                            return Err(anyhow::anyhow!("column index {} out of range", j));
                        }
                        row[j] = x;
                    }
                }
            }
        }

        Ok(ret)
    }
}

/// The index column of an AnnData dataframe group (`obs` or `var`):
/// the `_index` attribute names the column, `_index` by default.
fn read_dataframe_index(group: &hdf5::Group) -> anyhow::Result<Option<Vec<Box<str>>>> {
    let index_key = read_string_attr(group, "_index").unwrap_or_else(|| "_index".into());
    match group.dataset(&index_key) {
        Ok(ds) => Ok(Some(read_hdf5_strings(&ds)?)),
        Err(_) => Ok(None),
    }
}

/// `link_exists` only looks at the last component, so check every
/// prefix of a nested path
fn link_path_exists(file: &hdf5::File, key: &str) -> bool {
    let mut path = String::new();
    for part in key.split('/') {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(part);
        if !file.link_exists(&path) {
            return false;
        }
    }
    true
}
