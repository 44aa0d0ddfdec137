//! Image loading.
//!
//! - [`BinaryImage`]: bytes read from disk or memory, with the source name
//!   used for the S-record module name.
//! - [`LoaderSource`]: lookup of the loader image for a flash family.
//! - [`FirstStageLoader`]: the loader prepared for the boot ROM.

pub mod binary;
pub mod loader;

pub use binary::BinaryImage;
pub use loader::{FirstStageLoader, LoaderDirectory, LoaderSource};
