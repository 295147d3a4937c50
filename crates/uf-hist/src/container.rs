//! JSON histogram container: named objects plus named subdirectories.
//!
//! Subdirectories hold systematic variations and mirror the top-level names,
//! so `"JES__1up/truth"` is the varied counterpart of `"truth"`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

use crate::histogram::{Hist1D, Hist2D, HistObject};

/// One directory level of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistDirectory {
    /// Objects keyed by name.
    #[serde(default)]
    pub objects: BTreeMap<String, HistObject>,
}

/// A histogram container file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistFile {
    /// Top-level objects keyed by name.
    #[serde(default)]
    pub objects: BTreeMap<String, HistObject>,
    /// Subdirectories keyed by name.
    #[serde(default)]
    pub directories: BTreeMap<String, HistDirectory>,
}

impl HistFile {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a container from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
        })?;
        Self::from_slice(&bytes)
    }

    /// Parse and validate a container from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut file: HistFile = serde_json::from_slice(bytes)?;
        file.normalize()?;
        Ok(file)
    }

    // Keys are authoritative for names; shapes are checked once on load.
    fn normalize(&mut self) -> Result<()> {
        for (key, obj) in self.objects.iter_mut() {
            obj.set_name(key);
            obj.validate()?;
        }
        for dir in self.directories.values_mut() {
            for (key, obj) in dir.objects.iter_mut() {
                obj.set_name(key);
                obj.validate()?;
            }
        }
        Ok(())
    }

    /// Write the container as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Look up `"name"` or `"dir/name"`.
    pub fn get(&self, path: &str) -> Option<&HistObject> {
        match path.split_once('/') {
            Some((dir, name)) => self.directories.get(dir)?.objects.get(name),
            None => self.objects.get(path),
        }
    }

    /// Look up a 1-D histogram.
    pub fn get_1d(&self, path: &str) -> Result<&Hist1D> {
        let obj = self.get(path).ok_or_else(|| Error::MissingObject(path.to_string()))?;
        obj.as_1d().ok_or_else(|| {
            Error::Validation(format!("object '{path}' is a {}, expected TH1", obj.kind()))
        })
    }

    /// Look up a 2-D histogram.
    pub fn get_2d(&self, path: &str) -> Result<&Hist2D> {
        let obj = self.get(path).ok_or_else(|| Error::MissingObject(path.to_string()))?;
        obj.as_2d().ok_or_else(|| {
            Error::Validation(format!("object '{path}' is a {}, expected TH2", obj.kind()))
        })
    }

    /// Insert a top-level object under `name`, replacing any previous one.
    pub fn insert(&mut self, name: &str, obj: impl Into<HistObject>) {
        let mut obj = obj.into();
        obj.set_name(name);
        self.objects.insert(name.to_string(), obj);
    }

    /// Insert an object into directory `dir` (created on demand).
    pub fn insert_in(&mut self, dir: &str, name: &str, obj: impl Into<HistObject>) {
        let mut obj = obj.into();
        obj.set_name(name);
        self.directories.entry(dir.to_string()).or_default().objects.insert(name.to_string(), obj);
    }

    /// Total number of objects, subdirectories included.
    pub fn len(&self) -> usize {
        self.objects.len() + self.directories.values().map(|d| d.objects.len()).sum::<usize>()
    }

    /// True when the container holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
