//! Selection of a coherent registry subgraph by platform, author, supported
//! tag, and explicit allow/block lists.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{ExtensionId, Platform, Type, TypeId};
use crate::xml::Node;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Criteria for selecting a registry view.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Platform names to retain; the empty string is the core platform.
    /// [`None`] retains all platforms.
    pub platforms: Option<Vec<String>>,
    /// Author tags to retain. [`None`] retains all authors; an empty list
    /// retains none. The empty string admits core (extension-less) entities.
    pub authors: Option<Vec<String>>,
    /// Tag matched against each extension's `supported=` list.
    pub supported: String,
    /// Extensions force-included by name, overriding platform and author
    /// criteria.
    pub allowed_extensions: Vec<String>,
    /// Extensions force-excluded by name, overriding everything else.
    pub blocked_extensions: Vec<String>,
}

impl Default for FilterOptions {
    fn default() -> FilterOptions {
        FilterOptions {
            platforms: Some(vec![String::new()]),
            authors: Some(vec!["".into(), "KHR".into(), "EXT".into()]),
            supported: "vulkan".into(),
            allowed_extensions: Vec::new(),
            blocked_extensions: Vec::new(),
        }
    }
}

impl FilterOptions {
    /// Options retaining every platform, author, and extension.
    pub fn unfiltered() -> FilterOptions {
        FilterOptions {
            platforms: None,
            authors: None,
            ..FilterOptions::default()
        }
    }
}

pub(crate) fn apply(canonical: &Registry, options: &FilterOptions) -> Result<Registry> {
    let mut registry = canonical.clone();

    let platform_names: Vec<String> = match &options.platforms {
        Some(names) => names.clone(),
        None => std::iter::once(String::new())
            .chain(registry.platform_defs.iter().map(|def| def.name.to_string()))
            .collect(),
    };
    let authors = options.authors.as_deref();
    let include_core = authors
        .map(|list| list.iter().any(|author| author.is_empty()))
        .unwrap_or(true);

    let selected = select_extensions(&registry, options, &platform_names)?;
    debug!(selected = selected.len(), "extensions selected");

    registry.extensions.retain(|_, id| selected.contains(id));

    let keep = |extensions: &[ExtensionId]| {
        if extensions.is_empty() {
            include_core
        } else {
            extensions.iter().any(|id| selected.contains(id))
        }
    };

    let types = std::mem::take(&mut registry.types);
    registry.types = types
        .into_iter()
        .filter(|(_, id)| keep(registry.ty(*id).extensions()))
        .collect();

    let commands = std::mem::take(&mut registry.commands);
    registry.commands = commands
        .into_iter()
        .filter(|(_, id)| keep(&registry.command_node(*id).extensions))
        .collect();

    prune_survivors(&mut registry, &selected);
    project_platforms(&mut registry, &platform_names);
    registry.compute_api_version();

    Ok(registry)
}

fn select_extensions(
    registry: &Registry,
    options: &FilterOptions,
    platform_names: &[String],
) -> Result<HashSet<ExtensionId>> {
    let authors = options.authors.as_deref();
    let mut selected = HashSet::new();

    for (index, extension) in registry.extension_nodes.iter().enumerate() {
        let platform_ok = platform_names
            .iter()
            .any(|name| name.as_str() == extension.platform);
        let supported_ok = extension
            .supported
            .split(',')
            .any(|tag| tag == options.supported.as_str());
        let author_ok = authors
            .map(|list| list.iter().any(|author| author.as_str() == extension.author))
            .unwrap_or(true);
        if platform_ok && supported_ok && author_ok {
            selected.insert(ExtensionId(index as u32));
        }
    }

    for name in &options.allowed_extensions {
        match registry.extensions.get(name.as_str()) {
            Some(id) => {
                selected.insert(*id);
            }
            None => return Err(Error::FilterInconsistency(name.clone())),
        }
    }
    for name in &options.blocked_extensions {
        match registry.extensions.get(name.as_str()) {
            Some(id) => {
                selected.remove(id);
            }
            None => warn!(name = name.as_str(), "blocked extension is not in the registry"),
        }
    }

    Ok(selected)
}

/// Rewrites surviving structs and enums so they reference only surviving
/// entities: `structextends`/`extendedby` stay exact mirrors, and enum
/// values contributed by removed extensions are purged.
fn prune_survivors(registry: &mut Registry, selected: &HashSet<ExtensionId>) {
    let kept: HashSet<TypeId> = registry.types.values().copied().collect();
    let survivors: Vec<TypeId> = registry.types.values().copied().collect();

    for id in survivors {
        match registry.ty_mut(id) {
            Type::Struct(structure) => {
                structure.extendedby.retain(|target| kept.contains(target));
                structure
                    .structextends
                    .retain(|target| kept.contains(&target.id()));
            }
            Type::Enum(value) => {
                value.values.retain(|_, entry| {
                    entry.extensions().is_empty()
                        || entry.extensions().iter().any(|id| selected.contains(id))
                });
            }
            _ => (),
        }
    }
}

fn project_platforms(registry: &mut Registry, platform_names: &[String]) {
    let mut platforms = IndexMap::new();

    // The core platform goes first, when requested.
    if platform_names.iter().any(|name| name.is_empty()) {
        platforms.insert("", project_platform(registry, "", "", None));
    }
    for def in &registry.platform_defs {
        if platform_names.iter().any(|name| name.as_str() == def.name) {
            platforms.insert(
                def.name,
                project_platform(registry, def.name, def.protect, Some(def.xml)),
            );
        }
    }

    registry.platforms = platforms;
}

/// Computes one platform's view: the surviving extensions declaring it, and
/// the types and commands those extensions contribute. The core platform
/// additionally owns everything with no extension at all.
fn project_platform(
    registry: &Registry,
    name: &'static str,
    protect: &'static str,
    xml: Option<Node>,
) -> Platform {
    let extensions: IndexMap<&'static str, ExtensionId> = registry
        .extensions
        .iter()
        .filter(|(_, id)| registry.extension_node(**id).platform == name)
        .map(|(ext_name, id)| (*ext_name, *id))
        .collect();
    let extension_set: HashSet<ExtensionId> = extensions.values().copied().collect();

    let mut types = IndexMap::new();
    for (type_name, id) in &registry.types {
        let tagged = registry.ty(*id).extensions();
        if tagged.iter().any(|ext| extension_set.contains(ext)) {
            types.insert(*type_name, *id);
        }
    }
    let mut commands = IndexMap::new();
    for (command_name, id) in &registry.commands {
        let tagged = &registry.command_node(*id).extensions;
        if tagged.iter().any(|ext| extension_set.contains(ext)) {
            commands.insert(*command_name, *id);
        }
    }

    if name.is_empty() {
        for (type_name, id) in &registry.types {
            if registry.ty(*id).extensions().is_empty() {
                types.insert(*type_name, *id);
            }
        }
        for (command_name, id) in &registry.commands {
            if registry.command_node(*id).extensions.is_empty() {
                commands.insert(*command_name, *id);
            }
        }
    }

    Platform {
        name,
        protect,
        extensions,
        types,
        commands,
        xml,
    }
}
