//! `---` delimited YAML metadata block followed by a free-form body.
//!
//! The mapping keeps key order and unknown keys, so a read-modify-write
//! only touches the keys the caller changes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

const DELIMITER: &str = "---";

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("no metadata block: document does not start with `---`")]
    Missing,
    #[error("metadata block is never closed")]
    Unterminated,
    #[error("metadata block is not a mapping")]
    NotAMapping,
    #[error("invalid YAML in metadata block: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A parsed record file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub meta: Mapping,
    pub body: String,
}

impl Document {
    pub fn new(meta: Mapping, body: impl Into<String>) -> Self {
        Self {
            meta,
            body: body.into(),
        }
    }

    /// Parse `---\n<yaml>\n---\n<body>`. One blank line after the closing
    /// delimiter belongs to the layout, not the body.
    pub fn parse(text: &str) -> Result<Self, FrontmatterError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.split_inclusive('\n');
        let first = lines.next().ok_or(FrontmatterError::Missing)?;
        if first.trim_end() != DELIMITER {
            return Err(FrontmatterError::Missing);
        }

        let mut offset = first.len();
        let mut yaml_end = None;
        for line in lines {
            if line.trim_end() == DELIMITER {
                yaml_end = Some((offset, offset + line.len()));
                break;
            }
            offset += line.len();
        }
        let (yaml_end, body_start) = yaml_end.ok_or(FrontmatterError::Unterminated)?;

        let yaml = &text[first.len()..yaml_end];
        let meta = if yaml.trim().is_empty() {
            Mapping::new()
        } else {
            match serde_yaml::from_str::<Value>(yaml)? {
                Value::Mapping(m) => m,
                Value::Null => Mapping::new(),
                _ => return Err(FrontmatterError::NotAMapping),
            }
        };

        let rest = &text[body_start..];
        let body = rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest);

        Ok(Self {
            meta,
            body: body.to_string(),
        })
    }

    pub fn render(&self) -> Result<String, FrontmatterError> {
        let yaml = if self.meta.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(&self.meta)?
        };
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{}", self.body))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

/// Serialize `value` as a mapping and insert each of its keys into `meta`,
/// overwriting existing keys in place.
pub fn merge_into<T: Serialize>(value: &T, meta: &mut Mapping) -> Result<(), serde_yaml::Error> {
    if let Value::Mapping(fields) = serde_yaml::to_value(value)? {
        for (k, v) in fields {
            meta.insert(k, v);
        }
    }
    Ok(())
}

/// Deserialize a typed view out of a metadata block; unknown keys are ignored.
pub fn extract<T: DeserializeOwned>(meta: &Mapping) -> Result<T, serde_yaml::Error> {
    serde_yaml::from_value(Value::Mapping(meta.clone()))
}
