use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use crate::Error;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Number of assets to make room for up front.
    pub reserve: usize,
    /// Assets rendered per tick. Values below 1 are treated as 1.
    pub step: usize,
    /// Mip levels of the finished atlas. Values below 1 are treated as 1.
    pub mipmap_levels: u32,
    /// Writes the captured atlas, premultiplied alpha as rendered, to this
    /// PNG file when set.
    pub dump_path: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            reserve: 16,
            step: 1,
            mipmap_levels: 1,
            dump_path: None,
        }
    }
}

impl BuildOptions {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
