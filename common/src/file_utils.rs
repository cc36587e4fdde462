use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Expands a leading `~` to the current user home directory
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.as_ref().to_string_lossy().into_owned()).into_owned())
}

pub fn parse_yaml_from_file<P: AsRef<Path>, D: DeserializeOwned>(
    file: P,
) -> Result<D, anyhow::Error> {
    let file = open_file(&file)?;
    let parsed = serde_yaml::from_reader(file)?;
    Ok(parsed)
}

#[derive(Error, Debug)]
#[error("Unable to open {filename}")]
pub struct FileError {
    filename: String,
    source: std::io::Error,
}

impl FileError {
    fn new<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self {
            filename: path.as_ref().to_string_lossy().into(),
            source,
        }
    }
}

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File, FileError> {
    File::open(expand_tilde(&path)).map_err(|e| FileError::new(path, e))
}

pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, FileError> {
    std::fs::read(expand_tilde(&path)).map_err(|e| FileError::new(path, e))
}
