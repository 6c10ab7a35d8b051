//! Plugin catalog generator, index lifecycle manager and search planner.
//!
//! The crate is split along the life of a catalog:
//!
//! - [`source`] fetches the upstream feeds and per-plugin statistics
//! - [`catalog`] merges them into one [`PluginRecord`] per plugin
//! - [`snapshot`] stores the result as an immutable, fingerprinted snapshot
//! - [`lifecycle`] builds a new index generation from a snapshot and swaps the
//!   alias over to it
//! - [`query`] and [`search`] turn [`SearchOptions`] into backend queries and
//!   shape the results
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pluginsite::backend::{Mapping, MemoryBackend};
//! use pluginsite::lifecycle::IndexManager;
//! use pluginsite::search::SearchService;
//! use pluginsite::{CatalogSnapshot, Lookups, SearchOptions};
//!
//! # async fn run(snapshot: CatalogSnapshot) -> pluginsite::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let manager = IndexManager::new(backend.clone(), Mapping::bundled()?, "plugins");
//! manager.refresh(Some(&snapshot)).await?;
//!
//! let search = SearchService::new(backend, "plugins", Lookups::bundled()?);
//! let page = search.search(&SearchOptions::default()).await?;
//! println!("{} plugins", page.total_items);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lookup;
pub mod query;
pub mod scheduler;
pub mod search;
pub mod snapshot;
pub mod source;

pub use catalog::CatalogBuilder;
pub use error::{Error, Result};
pub use lookup::Lookups;
pub use snapshot::{CatalogSnapshot, Fingerprints};

pub use pluginsite_core::{
    Category, Label, PluginRecord, SearchOptions, SearchResult, SortBy,
};
