//! Storage abstraction and implementations for learnpath.
//!
//! This crate provides a trait-based storage interface for curriculum
//! documents and progress records, with in-memory, JSON-file and (behind the
//! `sqlite` feature) SQLite backends, plus a read-through cache.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;
pub mod cache;

#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{check_version, CurriculumStore, ProgressStore, Storage, StorageError, Result};
pub use memory::MemoryStorage;
pub use json_storage::JsonStorage;
pub use cache::{CachedStorage, CacheStats};

#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
