//! # quarry-backends
//!
//! The data backends every tool call is served from.
//!
//! ## Overview
//!
//! Three implementations of [`DataBackend`](quarry_core::traits::DataBackend)
//! share one set of filter and analysis semantics:
//!
//! - [`LiveBackend`]: a restricted view over a [`CollectionStore`]
//! - [`UploadBackend`]: one uploaded sheet, with `_rowIndex` provenance
//! - [`DemoBackend`]: a generated 150-transaction ledger
//!
//! Uploaded files enter through [`parse_upload`] and are kept in an injected
//! [`UploadSessionStore`].

pub mod analysis;
pub mod demo;
pub mod detect;
pub mod filter;
pub mod live;
pub mod spreadsheet;
pub mod upload;

pub use demo::{DemoBackend, DemoDataset, DEMO_COLLECTION};
pub use detect::ColumnDetector;
pub use filter::{apply_filters, FieldMap};
pub use live::{CollectionStore, InMemoryCollectionStore, LiveBackend};
pub use spreadsheet::{parse_upload, IngestLimits, ParsedSheet};
pub use upload::{UploadBackend, UploadSession, UploadSessionStore, UPLOAD_COLLECTION};

// ── Tests ─────────────────────────────────────────────────────────────────────
