//! Core library for normalizing 5etools-style compendium data into canonical entities.

pub mod batch;
pub mod classes;
pub mod config;
pub mod context;
pub mod copies;
pub mod entries;
pub mod error;
pub mod features;
pub mod file_utils;
pub mod items;
pub mod models;
pub mod modifications;
pub mod monsters;
pub mod races;
pub mod raw;
pub mod registry;
pub mod values;

pub use batch::{BatchOutput, BatchStats, Document, load_documents, verify_file, write_entities};
pub use config::ConvertConfig;
pub use context::ConversionContext;
pub use error::{DmkitError, Result};
pub use models::CanonicalEntity;
