// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid entity id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Storage abstraction the core consumes for threads, prompts, and other
/// persisted entities.  Content format is an implementation detail.
pub trait Repository<T> {
    fn get(&self, id: &str) -> Result<Option<T>, StoreError>;
    fn save(&self, id: &str, entity: &T) -> Result<(), StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
    /// Ids of every stored entity, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}
