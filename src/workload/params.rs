//! Typed launch parameters parsed from a Viewer's free-form configuration map

use std::collections::BTreeMap;
use std::fmt;

use crate::Error;

/// Reserved key holding the git location of the viewer project
pub const SOURCE_KEY: &str = "source";
/// Reserved key holding the script the viewer runs
pub const ENTRY_POINT_KEY: &str = "entry_point";
/// Value used for a reserved key the Viewer leaves out
pub const UNSET_VALUE: &str = "no";

/// Program invocation prepended to every argument list
const PROGRAM_PREFIX: [&str; 2] = ["streamlit", "run"];
/// Separates streamlit's own flags from the script's flags
const ARG_SEPARATOR: &str = "--";

/// A single launch parameter value
#[derive(Clone, Debug, PartialEq)]
pub enum LaunchValue {
    /// String value, passed verbatim
    String(String),
    /// Integer or floating point value
    Number(serde_json::Number),
    /// Boolean flag value
    Bool(bool),
}

impl LaunchValue {
    /// Convert a JSON value, rejecting shapes that have no CLI rendering
    fn from_json(viewer: &str, key: &str, value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Number(n) => Ok(Self::Number(n.clone())),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            other => Err(Error::validation_for(
                viewer,
                format!(
                    "flexyVisSpec.{key} must be a string, number or boolean, got {}",
                    json_kind(other)
                ),
            )),
        }
    }
}

impl fmt::Display for LaunchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Launch parameters with the reserved keys pulled out
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchParams {
    /// Git location of the viewer project
    pub source: String,
    /// Script the viewer runs
    pub entry_point: String,
    /// Remaining parameters, keyed and iterated in sorted order
    pub extra: BTreeMap<String, LaunchValue>,
}

impl LaunchParams {
    /// Parse the Viewer's configuration map
    pub fn from_spec(
        viewer: &str,
        spec: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, Error> {
        let mut source = UNSET_VALUE.to_string();
        let mut entry_point = UNSET_VALUE.to_string();
        let mut extra = BTreeMap::new();

        for (key, value) in spec {
            if key.is_empty() {
                return Err(Error::validation_for(
                    viewer,
                    "flexyVisSpec contains an empty key",
                ));
            }
            match key.as_str() {
                SOURCE_KEY => source = reserved_string(viewer, key, value)?,
                ENTRY_POINT_KEY => entry_point = reserved_string(viewer, key, value)?,
                _ => {
                    extra.insert(key.clone(), LaunchValue::from_json(viewer, key, value)?);
                }
            }
        }

        Ok(Self {
            source,
            entry_point,
            extra,
        })
    }

    /// Container argument list: `streamlit run <entry> -- --k1 v1 --k2 v2 ...`
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = PROGRAM_PREFIX.iter().map(|s| s.to_string()).collect();
        args.push(self.entry_point.clone());
        args.push(ARG_SEPARATOR.to_string());
        for (key, value) in &self.extra {
            args.push(format!("--{key}"));
            args.push(value.to_string());
        }
        args
    }
}

fn reserved_string(viewer: &str, key: &str, value: &serde_json::Value) -> Result<String, Error> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        Error::validation_for(
            viewer,
            format!("flexyVisSpec.{key} must be a string, got {}", json_kind(value)),
        )
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
