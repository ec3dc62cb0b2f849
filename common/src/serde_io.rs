use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file_format::FileFormat;
use crate::normalize_string::NormalizeString;

pub type Result<T> = anyhow::Result<T>;

pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> Result<String> {
    let text = match format {
        FileFormat::Yaml => serde_yml::to_string(value)?,
        FileFormat::Json => serde_json::to_string_pretty(value)?,
    };

    Ok(text.normalize())
}

pub fn deserialize<T: DeserializeOwned>(serialized: &str, format: FileFormat) -> Result<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        FileFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}

/// Reads `path`, picking the format from its extension.
pub fn read_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;

    deserialize(&text, format)
}

pub fn write_file<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    std::fs::write(path, serialize(value, format)?)?;

    Ok(())
}
