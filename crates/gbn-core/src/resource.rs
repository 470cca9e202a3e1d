use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("invalid resource name {0:?}")]
    InvalidName(String),
    #[error("failed to read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Resolves a requested resource identifier to its bytes.
pub trait ResourceStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Bytes, ResourceError>;
}

/// In-memory resources, used by the simulator and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    resources: HashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.resources.insert(name.into(), data.into());
    }

    pub fn with(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }
}

impl ResourceStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Bytes, ResourceError> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(name.to_string()))
    }
}

/// Files below a root directory. Names are relative paths; absolute paths
/// and `..` components are refused.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ResourceError> {
        let relative = Path::new(name);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !plain {
            return Err(ResourceError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ResourceStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<Bytes, ResourceError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(ResourceError::NotFound(name.to_string()));
        }
        std::fs::read(&path)
            .map(Bytes::from)
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => ResourceError::NotFound(name.to_string()),
                _ => ResourceError::Io {
                    name: name.to_string(),
                    source,
                },
            })
    }
}
