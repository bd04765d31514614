//! netCDF assembly reader.
//!
//! Classic files (CDF-1 / CDF-2) are read with `netcdf3`, which decodes the
//! header and leaves variable data on disk. netCDF-4 files sit inside an HDF5
//! container and are read through libnetcdf when the `netcdf4` feature is on.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use netcdf3::{DataSet, FileReader, FileWriter, Version};

use super::assembly::{AssemblyHeader, AssemblyInspector, AttributeValue, Dimension, Variable};
use crate::error::{AssetRule, BrainioError, Result};

pub const FORMAT_TAG: &str = "netcdf";

const CLASSIC_MAGIC: &[u8; 3] = b"CDF";
const HDF5_PREFIX: &[u8; 4] = b"\x89HDF";

/// Which container a netCDF file uses, judged from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Classic,
    Hdf5,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfInspector;

impl NetcdfInspector {
    pub fn new() -> Self {
        Self
    }
}

impl AssemblyInspector for NetcdfInspector {
    fn format_tag(&self) -> &str {
        FORMAT_TAG
    }

    fn inspect(&self, path: &Path) -> Result<AssemblyHeader> {
        match sniff(path)? {
            Container::Classic => read_classic(path),
            Container::Hdf5 => read_hdf5(path),
        }
    }
}

fn container(detail: impl Into<String>) -> BrainioError {
    BrainioError::asset(AssetRule::Container, detail)
}

pub fn sniff(path: &Path) -> Result<Container> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).map_err(|err| BrainioError::io(path, err))?;
    file.read_exact(&mut magic).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => container(format!("{} is too short for netCDF", path.display())),
        _ => BrainioError::io(path, err),
    })?;
    if &magic == HDF5_PREFIX {
        Ok(Container::Hdf5)
    } else if &magic[..3] == CLASSIC_MAGIC {
        Ok(Container::Classic)
    } else {
        Err(container(format!("{} is not a netCDF file", path.display())))
    }
}

fn read_classic(path: &Path) -> Result<AssemblyHeader> {
    let reader = FileReader::open(path).map_err(|err| {
        container(format!(
            "failed to read netCDF header of {}: {err:?}",
            path.display()
        ))
    })?;
    let data_set = reader.data_set();

    let dimensions = data_set
        .get_dims()
        .iter()
        .map(|dim| Dimension {
            name: dim.name().to_string(),
            len: dim.size() as u64,
        })
        .collect();
    let attributes = data_set
        .get_global_attrs()
        .into_iter()
        .map(|attr| (attr.name().to_string(), classic_attribute(attr)))
        .collect();
    let variables = data_set
        .get_vars()
        .into_iter()
        .map(|var| Variable {
            name: var.name().to_string(),
            dimensions: var.dim_names(),
        })
        .collect();

    Ok(AssemblyHeader {
        dimensions,
        attributes,
        variables,
    })
}

fn classic_attribute(attr: &netcdf3::Attribute) -> AttributeValue {
    if let Some(text) = attr.get_as_string() {
        return AttributeValue::Text(text.trim_end_matches('\0').to_string());
    }
    let numbers = if let Some(values) = attr.get_i8() {
        values.iter().map(|v| f64::from(*v)).collect()
    } else if let Some(values) = attr.get_u8() {
        values.iter().map(|v| f64::from(*v)).collect()
    } else if let Some(values) = attr.get_i16() {
        values.iter().map(|v| f64::from(*v)).collect()
    } else if let Some(values) = attr.get_i32() {
        values.iter().map(|v| f64::from(*v)).collect()
    } else if let Some(values) = attr.get_f32() {
        values.iter().map(|v| f64::from(*v)).collect()
    } else {
        attr.get_f64().map(<[f64]>::to_vec).unwrap_or_default()
    };
    AttributeValue::Numbers(numbers)
}

#[cfg(feature = "netcdf4")]
fn read_hdf5(path: &Path) -> Result<AssemblyHeader> {
    use std::collections::BTreeMap;

    let file = netcdf::open(path).map_err(|err| {
        container(format!("failed to open netCDF-4 file {}: {err}", path.display()))
    })?;

    let dimensions = file
        .dimensions()
        .map(|dim| Dimension {
            name: dim.name(),
            len: dim.len() as u64,
        })
        .collect();
    let mut attributes = BTreeMap::new();
    for attr in file.attributes() {
        let value = attr.value().map_err(|err| {
            container(format!("failed to read attribute `{}`: {err}", attr.name()))
        })?;
        if let Some(value) = hdf5_attribute(value) {
            attributes.insert(attr.name().to_string(), value);
        }
    }
    let variables = file
        .variables()
        .map(|var| Variable {
            name: var.name(),
            dimensions: var.dimensions().iter().map(|dim| dim.name()).collect(),
        })
        .collect();

    Ok(AssemblyHeader {
        dimensions,
        attributes,
        variables,
    })
}

/// 64-bit integer attributes are widened lossily; unsigned ones are skipped.
#[cfg(feature = "netcdf4")]
fn hdf5_attribute(value: netcdf::AttributeValue) -> Option<AttributeValue> {
    use netcdf::AttributeValue as Nc;

    let numbers = match value {
        Nc::Str(text) => return Some(AttributeValue::Text(text)),
        Nc::Strs(mut texts) if texts.len() == 1 => {
            return texts.pop().map(AttributeValue::Text);
        }
        Nc::Schar(v) => vec![f64::from(v)],
        Nc::Schars(v) => v.into_iter().map(f64::from).collect(),
        Nc::Short(v) => vec![f64::from(v)],
        Nc::Shorts(v) => v.into_iter().map(f64::from).collect(),
        Nc::Int(v) => vec![f64::from(v)],
        Nc::Ints(v) => v.into_iter().map(f64::from).collect(),
        Nc::Longlong(v) => vec![v as f64],
        Nc::Longlongs(v) => v.into_iter().map(|v| v as f64).collect(),
        Nc::Float(v) => vec![f64::from(v)],
        Nc::Floats(v) => v.into_iter().map(f64::from).collect(),
        Nc::Double(v) => vec![v],
        Nc::Doubles(v) => v,
        _ => return None,
    };
    Some(AttributeValue::Numbers(numbers))
}

#[cfg(not(feature = "netcdf4"))]
fn read_hdf5(path: &Path) -> Result<AssemblyHeader> {
    Err(container(format!(
        "{} is a netCDF-4 (HDF5) file; rebuild with the `netcdf4` feature to read it",
        path.display()
    )))
}

/// Writes `header` as a CDF-1 file with zero-filled `int` variables.
///
/// Text attributes become `char` arrays and numeric ones `double`. Useful for
/// producing small assemblies in tests and demos.
pub fn write_classic(path: &Path, header: &AssemblyHeader) -> Result<()> {
    write_version(path, header, Version::Classic)
}

fn write_version(path: &Path, header: &AssemblyHeader, version: Version) -> Result<()> {
    let mut data_set = DataSet::new();
    for dim in &header.dimensions {
        data_set
            .add_fixed_dim(&dim.name, dim.len as usize)
            .map_err(undescribable)?;
    }
    for (name, value) in &header.attributes {
        let added = match value {
            AttributeValue::Text(text) => data_set.add_global_attr_string(name, text),
            AttributeValue::Numbers(values) => data_set.add_global_attr_f64(name, values.clone()),
        };
        added.map_err(undescribable)?;
    }
    let mut lengths = Vec::with_capacity(header.variables.len());
    for var in &header.variables {
        lengths.push(element_count(header, var)?);
        data_set
            .add_var_i32(&var.name, var.dimensions.as_slice())
            .map_err(undescribable)?;
    }

    let write_failed = |err| unwritable(path, err);
    let mut writer = FileWriter::open(path).map_err(write_failed)?;
    writer.set_def(&data_set, version, 0).map_err(write_failed)?;
    for (var, len) in header.variables.iter().zip(lengths) {
        writer
            .write_var_i32(&var.name, &vec![0i32; len])
            .map_err(write_failed)?;
    }
    writer.close().map_err(write_failed)
}

fn undescribable(err: impl std::fmt::Debug) -> BrainioError {
    BrainioError::invalid(format!("cannot describe assembly as netCDF: {err:?}"))
}

fn unwritable(path: &Path, err: impl std::fmt::Debug) -> BrainioError {
    BrainioError::io(path, std::io::Error::other(format!("{err:?}")))
}

fn element_count(header: &AssemblyHeader, var: &Variable) -> Result<usize> {
    var.dimensions.iter().try_fold(1usize, |count, name| {
        let dim = header.dimension(name).ok_or_else(|| {
            BrainioError::invalid(format!(
                "variable `{}` references unknown dimension `{name}`",
                var.name
            ))
        })?;
        Ok(count * dim.len as usize)
    })
}
