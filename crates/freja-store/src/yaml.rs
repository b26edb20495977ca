// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Repository, StoreError};

/// One YAML document per entity under a directory; the file stem is the id.
pub struct YamlRepository<T> {
    dir: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> YamlRepository<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.yaml")))
    }
}

impl<T: Serialize + DeserializeOwned> Repository<T> for YamlRepository<T> {
    fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(id)?;
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(serde_yaml::from_str(&text)?))
    }

    fn save(&self, id: &str, entity: &T) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        std::fs::create_dir_all(&self.dir)?;
        let text = serde_yaml::to_string(entity)?;
        std::fs::write(&path, text)?;
        debug!(path = %path.display(), "entity saved");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
