use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FileExtensionError {
    #[error("Failed to get file extension of {0}")]
    MissingFileExtension(String),
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
}

pub type FileFormatResult<T> = Result<T, FileExtensionError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn all() -> [Self; 2] {
        [Self::Yaml, Self::Json]
    }

    pub fn from_path(path: &Path) -> FileFormatResult<Self> {
        let display = path.display().to_string();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FileExtensionError::MissingFileExtension(display.clone()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(FileExtensionError::UnsupportedFileExtension(display))
        }
    }
}
