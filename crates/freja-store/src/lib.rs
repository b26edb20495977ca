// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod records;
mod repository;
mod yaml;

pub use records::{PromptChain, ThreadRecord};
pub use repository::{Repository, StoreError};
pub use yaml::YamlRepository;
