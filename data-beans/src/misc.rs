use hdf5::types::FixedAscii;
use hdf5::types::FixedUnicode;
use hdf5::types::TypeDescriptor;
use hdf5::types::VarLenAscii;
use hdf5::types::VarLenUnicode;
use ndarray::{ArrayBase, Data, Ix1};

const MAX_FIXED_STRING_LEN: usize = 1024;

/// Read strings from `HDF5` dataset
pub fn read_hdf5_strings(data: &hdf5::Dataset) -> anyhow::Result<Vec<Box<str>>> {
    let desc = data.dtype()?.to_descriptor()?;

    let ret: Vec<Box<str>> = match desc {
        TypeDescriptor::VarLenUnicode => ndarray_into_box_str(&data.read_1d::<VarLenUnicode>()?),
        TypeDescriptor::VarLenAscii => ndarray_into_box_str(&data.read_1d::<VarLenAscii>()?),
        TypeDescriptor::FixedAscii(n) | TypeDescriptor::FixedUnicode(n)
            if n > MAX_FIXED_STRING_LEN =>
        {
            return Err(anyhow::anyhow!(
                "{}: fixed-length strings of {} bytes exceed the supported {}",
                data.name(),
                n,
                MAX_FIXED_STRING_LEN
            ));
        }
        TypeDescriptor::FixedAscii(n) => {
            if n < 24 {
                ndarray_into_box_str(&data.read_1d::<FixedAscii<24>>()?)
            } else if n < 128 {
                ndarray_into_box_str(&data.read_1d::<FixedAscii<128>>()?)
            } else {
                ndarray_into_box_str(&data.read_1d::<FixedAscii<1024>>()?)
            }
        }
        TypeDescriptor::FixedUnicode(n) => {
            if n < 24 {
                ndarray_into_box_str(&data.read_1d::<FixedUnicode<24>>()?)
            } else if n < 128 {
                ndarray_into_box_str(&data.read_1d::<FixedUnicode<128>>()?)
            } else {
                ndarray_into_box_str(&data.read_1d::<FixedUnicode<1024>>()?)
            }
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unsupported string type in {}",
                data.name()
            ));
        }
    };

    Ok(ret)
}

/// Read a scalar string attribute, e.g., `encoding-type`
pub fn read_string_attr(loc: &hdf5::Location, name: &str) -> Option<Box<str>> {
    let attr = loc.attr(name).ok()?;
    if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
        return Some(s.as_str().into());
    }
    attr.read_scalar::<VarLenAscii>()
        .ok()
        .map(|s| s.as_str().into())
}

fn ndarray_into_box_str<T, U>(data: &ArrayBase<T, Ix1>) -> Vec<Box<str>>
where
    T: Data<Elem = U>,
    U: ToString,
{
    data.iter()
        .map(|x| x.to_string().into_boxed_str())
        .collect()
}
