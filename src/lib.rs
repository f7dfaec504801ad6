//! Loader for the Vulkan API registry XML (`vk.xml`).
//!
//! [`Library`] parses the document into a fully-resolved graph of types,
//! enums, commands, extensions, and platforms, merging extension- and
//! feature-contributed enum values onto their target enums. Filtered views
//! over one parse are produced with [`Library::registry`], selecting by
//! platform, author, supported tag, and explicit allow/block lists.

mod cdecl;
mod parse;

pub mod error;
pub mod filter;
pub mod handle_info;
pub mod registry;
pub mod types;
pub mod xml;

pub use error::{Error, Result};
pub use filter::FilterOptions;
pub use handle_info::{HandleCreateCommand, HandleDestroyCommand, HandleInfo, HandleInfoMap};
pub use registry::Registry;

use std::path::Path;
use tracing::{debug, error_span};

/// A parsed registry document.
///
/// Owns the canonical, unfiltered graph. Filtering never mutates it, so any
/// number of differently-filtered [`Registry`] views can be derived from one
/// parse.
#[derive(Debug)]
pub struct Library {
    canonical: Registry,
}

impl Library {
    /// Loads and parses a registry file.
    pub fn new(path: impl AsRef<Path>) -> Result<Library> {
        let path = path.as_ref();
        let canonical = error_span!("registry", path = %path.display()).in_scope(|| {
            let root = xml::load(path)?;
            debug!("parsing registry");
            parse::build(root)
        })?;
        Ok(Library { canonical })
    }

    /// Parses a registry document held in memory.
    pub fn from_xml(input: &str) -> Result<Library> {
        let root = xml::from_string(input)?;
        Ok(Library {
            canonical: parse::build(root)?,
        })
    }

    /// The canonical, unfiltered registry.
    pub fn canonical(&self) -> &Registry {
        &self.canonical
    }

    /// Derives a filtered registry view. The view owns its maps (including
    /// the enum value maps), so filtering the same library again cannot
    /// contaminate it.
    pub fn registry(&self, options: &FilterOptions) -> Result<Registry> {
        filter::apply(&self.canonical, options)
    }
}
