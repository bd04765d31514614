use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{AssetRule, BrainioError, Result};

pub const PRESENTATION_DIM: &str = "presentation";
pub const STIMULUS_ID_VAR: &str = "stimulus_id";
pub const IDENTIFIER_ATTR: &str = "identifier";
pub const STIMULUS_SET_ATTR: &str = "stimulus_set_identifier";

/// Reads the structural header of an assembly container.
///
/// The catalog records [`AssemblyInspector::format_tag`] as the row's `class`.
pub trait AssemblyInspector: Send + Sync {
    fn format_tag(&self) -> &str;
    fn inspect(&self, path: &Path) -> Result<AssemblyHeader>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Numbers(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    /// Zero marks the unlimited (record) dimension.
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub dimensions: Vec<String>,
}

/// Dimensions, global attributes, and variables of an assembly file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyHeader {
    pub dimensions: Vec<Dimension>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub variables: Vec<Variable>,
}

impl AssemblyHeader {
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|var| var.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Identifiers carried inside a valid assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyMetadata {
    pub identifier: String,
    pub stimulus_set_identifier: String,
}

pub fn validate_assembly(header: &AssemblyHeader) -> Result<AssemblyMetadata> {
    if header.dimension(PRESENTATION_DIM).is_none() {
        return Err(BrainioError::asset(
            AssetRule::PresentationDimension,
            format!("`{PRESENTATION_DIM}` must be a dimension of the assembly"),
        ));
    }

    let stimulus_id = header.variable(STIMULUS_ID_VAR).ok_or_else(|| {
        BrainioError::asset(
            AssetRule::StimulusIdCoordinate,
            format!("`{STIMULUS_ID_VAR}` must be a variable of the assembly"),
        )
    })?;
    if !stimulus_id.dimensions.iter().any(|dim| dim == PRESENTATION_DIM) {
        return Err(BrainioError::asset(
            AssetRule::StimulusIdCoordinate,
            format!("`{STIMULUS_ID_VAR}` must be a coordinate along `{PRESENTATION_DIM}`"),
        ));
    }

    let identifier = text_attribute(header, IDENTIFIER_ATTR)?;
    if identifier.is_empty() {
        return Err(BrainioError::asset(
            AssetRule::GlobalAttribute,
            format!("global attribute `{IDENTIFIER_ATTR}` is empty"),
        ));
    }
    let stimulus_set_identifier = text_attribute(header, STIMULUS_SET_ATTR)?;

    Ok(AssemblyMetadata {
        identifier: identifier.to_string(),
        stimulus_set_identifier: stimulus_set_identifier.to_string(),
    })
}

fn text_attribute<'a>(header: &'a AssemblyHeader, name: &str) -> Result<&'a str> {
    match header.attribute(name) {
        Some(AttributeValue::Text(text)) => Ok(text),
        Some(AttributeValue::Numbers(_)) => Err(BrainioError::asset(
            AssetRule::GlobalAttribute,
            format!("global attribute `{name}` must be a string"),
        )),
        None => Err(BrainioError::asset(
            AssetRule::GlobalAttribute,
            format!("`{name}` must be a global attribute of the assembly"),
        )),
    }
}
