/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parameters supplied to a store when it is [opened](super::pluggables::BackendStore::open).
//!
//! Loading these parameters from files or the environment is the caller's concern. The store only sees
//! the finished value, built with the builder pattern:
//!
//! ```ignore
//! let config =
//!     BackendConfig::builder()
//!     .data_path(Some("/var/lib/graph".into()))
//!     .read_only(false)
//!     .build();
//! ```

use std::{collections::BTreeMap, path::PathBuf};

use typed_builder::TypedBuilder;

/// Backend-specific connection and tuning parameters.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [BackendConfig]. Every setter is optional.

    Optional:
    - `.data_path(...)`
    - `.read_only(...)`
    - `.options(...)`
"))]
pub struct BackendConfig {
    #[builder(
        default,
        setter(doc = "Set where a persistent engine keeps its files. Ignored by in-memory engines. Optional.")
    )]
    pub data_path: Option<PathBuf>,
    #[builder(
        default = false,
        setter(doc = "Reject every state-mutating operation after open? Optional, defaults to false.")
    )]
    pub read_only: bool,
    #[builder(
        default,
        setter(doc = "Set engine-specific options, passed through uninterpreted. Optional.")
    )]
    pub options: BTreeMap<String, String>,
}

impl BackendConfig {
    /// Get the engine-specific option `key`, if set.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}
