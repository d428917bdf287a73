//! Tool catalog, built-in fallback list, and result normalization.

mod catalog;
mod fallback;
mod result;

pub use catalog::*;
pub use fallback::{fallback_catalog, fallback_tools};
pub use result::*;
