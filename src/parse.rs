//! Builds the canonical registry graph from the document: catalog bootstrap,
//! command parsing, reference resolution, and the extension/feature merge.

use crate::cdecl;
use crate::error::{Error, Result};
use crate::registry::{PlatformDef, Registry};
use crate::types::{
    BaseType, Bitmask, Command, Define, Enum, EnumAlias, EnumEntry, EnumLiteral, EnumValue,
    Extension, ExtensionId, FunctionPointer, Handle, Owner, Struct, Type, TypeAlias, TypeId,
    TypeSlot,
};
use crate::xml::{self, Node};
use indexmap::IndexMap;
use tracing::{debug, info_span, trace, warn};

pub(crate) fn build(root: Node) -> Result<Registry> {
    let mut registry = Registry::default();

    parse_base_types(&mut registry, root)?;
    parse_enum_blocks(&mut registry, root)?;
    parse_types(&mut registry, root)?;
    parse_commands(&mut registry, root)?;

    resolve_references(&mut registry)?;
    mirror_struct_extends(&mut registry);
    derive_instance_commands(&mut registry);

    parse_extensions(&mut registry, root)?;
    parse_features(&mut registry, root)?;

    // Extensions and features introduce new cross-references, so the
    // resolution pass runs again before the graph is handed out.
    resolve_references(&mut registry)?;
    validate_enum_aliases(&registry)?;

    parse_platform_defs(&mut registry, root);
    registry.compute_api_version();

    Ok(registry)
}

fn insert_type(registry: &mut Registry, name: &'static str, ty: Type) -> TypeId {
    let id = registry.push_type(ty);
    registry.types.insert(name, id);
    id
}

fn parse_base_types(registry: &mut Registry, root: Node) -> Result<()> {
    // The synthetic `string` type stands for any null-terminated C string.
    insert_type(
        registry,
        "string",
        Type::Base(BaseType {
            name: "string",
            extensions: Vec::new(),
            xml: None,
        }),
    );

    for type_node in xml::path_iter(root, &["types", "type"]) {
        match xml::attribute(type_node, "category") {
            Some("basetype") => {
                let name = required_child_text(type_node, "name")?;
                if let Some(underlying) = xml::child_text(type_node, "type") {
                    insert_type(
                        registry,
                        name,
                        Type::Alias(TypeAlias {
                            name,
                            target: TypeSlot::Ref(underlying),
                            extensions: Vec::new(),
                        }),
                    );
                } else {
                    insert_type(
                        registry,
                        name,
                        Type::Base(BaseType {
                            name,
                            extensions: Vec::new(),
                            xml: Some(type_node),
                        }),
                    );
                }
            }
            Some(_) => (),
            None => {
                // Plain C and platform types carry no category.
                let name = required_attribute(type_node, "name")?;
                insert_type(
                    registry,
                    name,
                    Type::Base(BaseType {
                        name,
                        extensions: Vec::new(),
                        xml: Some(type_node),
                    }),
                );
            }
        }
    }

    Ok(())
}

fn parse_enum_blocks(registry: &mut Registry, root: Node) -> Result<()> {
    for enums_node in xml::children_named(root, "enums") {
        let _s = info_span!("enums", node = xml::node_span_field(&enums_node)).entered();
        trace!("encountered node");
        match xml::attribute(enums_node, "type") {
            Some("enum") | Some("bitmask") => {
                let value = parse_enum_block(enums_node)?;
                insert_type(registry, value.name, Type::Enum(value));
            }
            _ => {
                // A bare constants pool rather than an enum type.
                let pool = parse_enum_block(enums_node)?;
                for (name, entry) in pool.values {
                    registry.constants.insert(name, entry);
                }
            }
        }
    }

    Ok(())
}

fn parse_enum_block(node: Node) -> Result<Enum> {
    let name = required_attribute(node, "name")?;
    let mut is_bitmask = xml::attribute(node, "type") == Some("bitmask");
    let bitwidth = match xml::attribute(node, "bitwidth") {
        Some(width) => width
            .parse()
            .map_err(|_| Error::Schema(format!("bad bitwidth on enum `{name}`")))?,
        None => 32,
    };

    let mut values = IndexMap::new();
    for variant in xml::children_named(node, "enum") {
        let variant_name = required_attribute(variant, "name")?;
        let entry = if let Some(target) = xml::attribute(variant, "alias") {
            EnumEntry::Alias(EnumAlias {
                name: variant_name,
                target,
                extensions: Vec::new(),
            })
        } else {
            let value = if let Some(bitpos) = xml::attribute(variant, "bitpos") {
                is_bitmask = true;
                decode_bitpos(bitpos)
            } else if let Some(value) = xml::attribute(variant, "value") {
                decode_integer(value)
            } else {
                return Err(Error::Schema(format!(
                    "enum value `{variant_name}` has neither value, bitpos, nor alias"
                )));
            };
            EnumEntry::Value(EnumValue {
                name: variant_name,
                value,
                comment: xml::attribute(variant, "comment"),
                extensions: Vec::new(),
                xml: Some(variant),
            })
        };
        values.insert(variant_name, entry);
    }

    Ok(Enum {
        name,
        is_bitmask,
        bitwidth,
        values,
        extensions: Vec::new(),
        xml: node,
    })
}

/// Decodes a `value=` literal: `0x` prefixed values parse as hex, bare
/// integers as decimal. Anything else is kept raw.
fn decode_integer(value: &'static str) -> EnumLiteral {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    match parsed {
        Ok(parsed) => EnumLiteral::Int(parsed),
        Err(_) => EnumLiteral::Raw(value),
    }
}

fn decode_bitpos(bitpos: &'static str) -> EnumLiteral {
    let parsed = match bitpos.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => bitpos.parse(),
    };
    match parsed {
        // Computed in 64 bits so `bitwidth="64"` enums can use bit 63.
        Ok(shift) if shift < 64 => EnumLiteral::Int((1u64 << shift) as i64),
        _ => EnumLiteral::Raw(bitpos),
    }
}

fn parse_types(registry: &mut Registry, root: Node) -> Result<()> {
    for type_node in xml::path_iter(root, &["types", "type"]) {
        let Some(category) = xml::attribute(type_node, "category") else {
            continue;
        };
        let _s = info_span!("type", node = xml::node_span_field(&type_node)).entered();
        trace!("encountered node");

        if let Some(target) = xml::attribute(type_node, "alias") {
            let name = required_attribute(type_node, "name")?;
            let id = insert_type(
                registry,
                name,
                Type::Alias(TypeAlias {
                    name,
                    target: TypeSlot::Ref(target),
                    extensions: Vec::new(),
                }),
            );
            registry.aliases.insert(name, id);
            continue;
        }

        match category {
            // Handled by the base-type pass.
            "basetype" => (),
            "handle" => {
                let name = required_child_text(type_node, "name")?;
                insert_type(
                    registry,
                    name,
                    Type::Handle(Handle {
                        name,
                        is_dispatchable: xml::child_text(type_node, "type")
                            == Some("VK_DEFINE_HANDLE"),
                        parent: xml::attribute(type_node, "parent")
                            .filter(|parent| !parent.is_empty())
                            .map(TypeSlot::Ref),
                        extensions: Vec::new(),
                        xml: type_node,
                    }),
                );
            }
            "struct" => parse_struct(registry, type_node, false)?,
            "union" => parse_struct(registry, type_node, true)?,
            "funcpointer" => {
                let name = required_child_text(type_node, "name")?;
                insert_type(
                    registry,
                    name,
                    Type::FunctionPointer(FunctionPointer {
                        name,
                        requires: xml::attribute(type_node, "requires"),
                        extensions: Vec::new(),
                        xml: type_node,
                    }),
                );
            }
            "bitmask" => {
                let name = required_child_text(type_node, "name")?;
                let underlying = required_child_text(type_node, "type")?;
                let flags = xml::attribute(type_node, "requires")
                    .or_else(|| xml::attribute(type_node, "bitvalues"))
                    .map(TypeSlot::Ref);
                insert_type(
                    registry,
                    name,
                    Type::Bitmask(Bitmask {
                        name,
                        underlying,
                        flags,
                        extensions: Vec::new(),
                        xml: type_node,
                    }),
                );
            }
            "define" => {
                let (name, tail) = match xml::attribute(type_node, "name") {
                    Some(name) => (name, None),
                    None => {
                        let name_node = xml::find_child(type_node, "name").ok_or_else(|| {
                            Error::Schema(format!(
                                "define without a name: {}",
                                xml::node_span_field(&type_node)
                            ))
                        })?;
                        let name = name_node.text().ok_or_else(|| {
                            Error::Schema("define with an empty <name>".to_string())
                        })?;
                        let tail = name_node.next_sibling().and_then(|sibling| sibling.text());
                        (name, tail)
                    }
                };
                insert_type(
                    registry,
                    name,
                    Type::Define(Define {
                        name,
                        text: type_node.text(),
                        tail,
                        extensions: Vec::new(),
                        xml: type_node,
                    }),
                );
            }
            _ => debug!("ignored"),
        }
    }

    Ok(())
}

fn parse_struct(registry: &mut Registry, node: Node, is_union: bool) -> Result<()> {
    let name = required_attribute(node, "name")?;
    let mut members = Vec::new();
    for member_node in xml::children_named(node, "member") {
        members.push(cdecl::parse_field(registry, member_node, Owner::Struct(name))?);
    }
    let structextends = xml::attribute_comma_separated(node, "structextends")
        .into_iter()
        .map(TypeSlot::Ref)
        .collect();

    insert_type(
        registry,
        name,
        Type::Struct(Struct {
            name,
            is_union,
            members,
            structextends,
            extendedby: Vec::new(),
            extensions: Vec::new(),
            xml: node,
        }),
    );
    Ok(())
}

fn parse_commands(registry: &mut Registry, root: Node) -> Result<()> {
    let mut alias_entries = Vec::new();
    for command_node in xml::path_iter(root, &["commands", "command"]) {
        let _s = info_span!("command", node = xml::node_span_field(&command_node)).entered();
        trace!("encountered node");

        if let Some(target) = xml::attribute(command_node, "alias") {
            alias_entries.push((required_attribute(command_node, "name")?, target));
            continue;
        }

        let proto = xml::find_child(command_node, "proto").ok_or_else(|| {
            Error::Schema(format!(
                "command without a proto: {}",
                xml::node_span_field(&command_node)
            ))
        })?;
        let name = required_child_text(proto, "name")?;
        let return_type = TypeSlot::Ref(required_child_text(proto, "type")?);

        let mut parameters = Vec::new();
        for param_node in xml::children_named(command_node, "param") {
            parameters.push(cdecl::parse_field(registry, param_node, Owner::Command(name))?);
        }

        let id = registry.push_command(Command {
            name,
            return_type,
            parameters,
            successcodes: xml::attribute_comma_separated(command_node, "successcodes"),
            errorcodes: xml::attribute_comma_separated(command_node, "errorcodes"),
            extensions: Vec::new(),
            feature: None,
            is_instance: false,
            xml: command_node,
        });
        registry.commands.insert(name, id);
    }

    // Aliased command names bind to the canonical command.
    for (name, target) in alias_entries {
        match registry.commands.get(target).copied() {
            Some(id) => {
                registry.commands.insert(name, id);
            }
            None => warn!(name, target, "command alias targets an unknown command"),
        }
    }

    Ok(())
}

fn resolve_slot(types: &IndexMap<&'static str, TypeId>, slot: &mut TypeSlot) -> Result<()> {
    if let TypeSlot::Ref(name) = *slot {
        match types.get(name) {
            Some(id) => *slot = TypeSlot::Id(*id),
            None => return Err(Error::UnresolvedReference(name.to_string())),
        }
    }
    Ok(())
}

/// Rewrites every name reference reachable from a type, field, or command to
/// an arena id.
fn resolve_references(registry: &mut Registry) -> Result<()> {
    let Registry {
        type_nodes,
        command_nodes,
        types,
        ..
    } = registry;

    for node in type_nodes.iter_mut() {
        match node {
            Type::Alias(alias) => resolve_slot(types, &mut alias.target)?,
            Type::Handle(handle) => {
                if let Some(parent) = handle.parent.as_mut() {
                    resolve_slot(types, parent)?;
                }
            }
            Type::Bitmask(bitmask) => {
                if let Some(flags) = bitmask.flags.as_mut() {
                    resolve_slot(types, flags)?;
                }
            }
            Type::Struct(structure) => {
                for member in &mut structure.members {
                    resolve_slot(types, &mut member.ty)?;
                }
                for target in &mut structure.structextends {
                    resolve_slot(types, target)?;
                }
            }
            Type::Pointer(pointer) | Type::NextPointer(pointer) => {
                resolve_slot(types, &mut pointer.base)?
            }
            Type::FixedArray(array) => resolve_slot(types, &mut array.base)?,
            Type::DynamicArray(array) => resolve_slot(types, &mut array.base)?,
            Type::Base(_) | Type::Define(_) | Type::Enum(_) | Type::FunctionPointer(_) => (),
        }
    }

    for command in command_nodes.iter_mut() {
        resolve_slot(types, &mut command.return_type)?;
        for param in &mut command.parameters {
            resolve_slot(types, &mut param.ty)?;
        }
    }

    Ok(())
}

/// Inserts the `extendedby` back-edges so `structextends` and `extendedby`
/// are exact mirrors, guarding against duplicates caused by aliasing.
fn mirror_struct_extends(registry: &mut Registry) {
    let mut links = Vec::new();
    for (index, node) in registry.type_nodes.iter().enumerate() {
        if let Type::Struct(structure) = node {
            for target in &structure.structextends {
                links.push((TypeId(index as u32), target.id()));
            }
        }
    }

    for (struct_id, target_id) in links {
        if let Type::Struct(target) = registry.ty_mut(target_id) {
            if !target.extendedby.contains(&struct_id) {
                target.extendedby.push(struct_id);
            }
        } else {
            warn!(?target_id, "structextends targets a non-struct");
        }
    }
}

/// A command is instance-level when its first parameter's handle chain
/// climbs to `VkInstance`, or it is `vkCreateInstance` itself.
fn derive_instance_commands(registry: &mut Registry) {
    let flags: Vec<bool> = registry
        .command_nodes
        .iter()
        .map(|command| {
            command.name == "vkCreateInstance"
                || command
                    .parameters
                    .first()
                    .map(|param| {
                        let id = param.ty.id();
                        matches!(registry.ty(id), Type::Handle(_)) && registry.is_instance_handle(id)
                    })
                    .unwrap_or(false)
        })
        .collect();

    for (command, is_instance) in registry.command_nodes.iter_mut().zip(flags) {
        command.is_instance = is_instance;
    }
}

fn parse_extensions(registry: &mut Registry, root: Node) -> Result<()> {
    for extension_node in xml::path_iter(root, &["extensions", "extension"]) {
        let _s = info_span!("extension", node = xml::node_span_field(&extension_node)).entered();
        trace!("encountered node");

        let name = required_attribute(extension_node, "name")?;
        let Some(number_str) = xml::attribute(extension_node, "number") else {
            warn!(name, "extension without a number");
            continue;
        };
        // Unreleased extension slots are placeholders named after their
        // number.
        if name.contains("RESERVED") || name.ends_with(number_str) {
            debug!("skipping reserved extension");
            continue;
        }
        let number: i64 = number_str
            .parse()
            .map_err(|_| Error::Schema(format!("bad number on extension `{name}`")))?;

        let mut extension = Extension {
            name,
            number,
            ext_type: xml::attribute(extension_node, "type").unwrap_or(""),
            author: xml::attribute(extension_node, "author").unwrap_or(""),
            supported: xml::attribute(extension_node, "supported").unwrap_or(""),
            promotedto: xml::attribute(extension_node, "promotedto").unwrap_or(""),
            deprecatedby: xml::attribute(extension_node, "deprecatedby").unwrap_or(""),
            platform: xml::attribute(extension_node, "platform").unwrap_or(""),
            requires: xml::attribute_comma_separated(extension_node, "requires"),
            specialuse: xml::attribute_comma_separated(extension_node, "specialuse"),
            name_enum: None,
            spec_version_enum: None,
            types: Vec::new(),
            commands: Vec::new(),
            xml: extension_node,
        };

        for require_node in xml::children_named(extension_node, "require") {
            for type_node in xml::children_named(require_node, "type") {
                if let Some(type_name) = xml::attribute(type_node, "name") {
                    extension.types.push(type_name);
                }
            }
            for command_node in xml::children_named(require_node, "command") {
                if let Some(command_name) = xml::attribute(command_node, "name") {
                    extension.commands.push(command_name);
                }
            }
            for enum_node in xml::children_named(require_node, "enum") {
                let Some(enum_name) = xml::attribute(enum_node, "name") else {
                    continue;
                };
                if xml::attribute(enum_node, "value").is_some() {
                    if enum_name.ends_with("_EXTENSION_NAME") {
                        extension.name_enum = Some(enum_name);
                    } else if enum_name.ends_with("_SPEC_VERSION") {
                        extension.spec_version_enum = Some(enum_name);
                    }
                }
            }
        }

        let id = registry.push_extension(extension);
        registry.extensions.insert(name, id);

        attach_extension(registry, id);

        for require_node in xml::children_named(extension_node, "require") {
            for enum_node in xml::children_named(require_node, "enum") {
                if xml::attribute(enum_node, "extends").is_some() {
                    graft_enum_value(registry, enum_node, number, Some(id));
                }
            }
        }
    }

    Ok(())
}

/// Tags every contributed type and command with the extension, for
/// filtering.
fn attach_extension(registry: &mut Registry, id: ExtensionId) {
    let extension = registry.extension_node(id);
    let extension_name = extension.name;
    let types = extension.types.clone();
    let commands = extension.commands.clone();

    for type_name in types {
        match registry.types.get(type_name).copied() {
            Some(type_id) => {
                if let Some(extensions) = registry.ty_mut(type_id).extensions_mut() {
                    extensions.push(id);
                }
            }
            None => warn!(
                extension = extension_name,
                type_name, "extension requires an unknown type"
            ),
        }
    }

    for command_name in commands {
        match registry.commands.get(command_name).copied() {
            Some(command_id) => registry.command_node_mut(command_id).extensions.push(id),
            None => warn!(
                extension = extension_name,
                command_name, "extension requires an unknown command"
            ),
        }
    }
}

/// Grafts one `require/enum[@extends]` value onto its target enum, recording
/// the contributing extension for later filtering. Feature blocks pass no
/// source, so promoted values read as core.
fn graft_enum_value(
    registry: &mut Registry,
    node: Node,
    extnumber: i64,
    source: Option<ExtensionId>,
) {
    let Some(name) = xml::attribute(node, "name") else {
        warn!("enum extension without a name");
        return;
    };
    let Some(extends) = xml::attribute(node, "extends") else {
        return;
    };
    let Some(enum_id) = registry.type_id(extends) else {
        warn!(name, extends, "enum extension targets an unknown enum");
        return;
    };
    let Some(is_bitmask) = registry.ty(enum_id).as_enum().map(|e| e.is_bitmask) else {
        warn!(name, extends, "enum extension targets a non-enum");
        return;
    };

    let extensions = source.into_iter().collect();
    let entry = if let Some(target) = xml::attribute(node, "alias") {
        EnumEntry::Alias(EnumAlias {
            name,
            target,
            extensions,
        })
    } else {
        let value = if let Some(value) = xml::attribute(node, "value") {
            match value.parse() {
                Ok(parsed) => EnumLiteral::Int(parsed),
                Err(_) => {
                    warn!(name, value, "non-integer extension enum value");
                    EnumLiteral::Raw(value)
                }
            }
        } else if is_bitmask {
            let bitpos = xml::attribute(node, "bitpos").and_then(|b| b.parse::<u32>().ok());
            match bitpos {
                Some(shift) if shift < 64 => EnumLiteral::Int((1u64 << shift) as i64),
                _ => {
                    warn!(name, "bitmask extension value without a usable bitpos");
                    return;
                }
            }
        } else {
            let offset = xml::attribute(node, "offset").and_then(|o| o.parse::<i64>().ok());
            let Some(offset) = offset else {
                warn!(name, "enum extension without a usable offset");
                return;
            };
            EnumLiteral::Int(1_000_000_000 + (extnumber - 1) * 1000 + offset)
        };
        EnumEntry::Value(EnumValue {
            name,
            value,
            comment: xml::attribute(node, "comment"),
            extensions,
            xml: Some(node),
        })
    };

    if let Type::Enum(target) = registry.ty_mut(enum_id) {
        target.values.insert(name, entry);
    }
}

fn parse_features(registry: &mut Registry, root: Node) -> Result<()> {
    for feature_node in xml::children_named(root, "feature") {
        let _s = info_span!("feature", node = xml::node_span_field(&feature_node)).entered();
        trace!("encountered node");
        let feature_name = required_attribute(feature_node, "name")?;

        for require_node in xml::children_named(feature_node, "require") {
            for enum_node in xml::children_named(require_node, "enum") {
                if xml::attribute(enum_node, "extends").is_some() {
                    let extnumber = xml::attribute(enum_node, "extnumber")
                        .and_then(|number| number.parse().ok())
                        .unwrap_or(0);
                    graft_enum_value(registry, enum_node, extnumber, None);
                }
            }
            for command_node in xml::children_named(require_node, "command") {
                let Some(command_name) = xml::attribute(command_node, "name") else {
                    continue;
                };
                match registry.commands.get(command_name).copied() {
                    Some(id) => registry.command_node_mut(id).feature = Some(feature_name),
                    None => warn!(
                        feature = feature_name,
                        command_name, "feature requires an unknown command"
                    ),
                }
            }
        }
    }

    Ok(())
}

/// Every alias enumerand must point at a peer in the same enum once features
/// are merged.
fn validate_enum_aliases(registry: &Registry) -> Result<()> {
    for node in &registry.type_nodes {
        let Type::Enum(value) = node else { continue };
        for entry in value.values.values() {
            if let EnumEntry::Alias(alias) = entry {
                if !value.values.contains_key(alias.target) {
                    return Err(Error::UnresolvedReference(format!(
                        "{}::{}",
                        value.name, alias.target
                    )));
                }
            }
        }
    }
    Ok(())
}

fn parse_platform_defs(registry: &mut Registry, root: Node) {
    for platform_node in xml::path_iter(root, &["platforms", "platform"]) {
        let (Some(name), Some(protect)) = (
            xml::attribute(platform_node, "name"),
            xml::attribute(platform_node, "protect"),
        ) else {
            warn!("platform without name or protect");
            continue;
        };
        registry.platform_defs.push(PlatformDef {
            name,
            protect,
            xml: platform_node,
        });
    }
}

fn required_attribute(node: Node, name: &str) -> Result<&'static str> {
    xml::attribute(node, name).ok_or_else(|| {
        Error::Schema(format!(
            "missing `{name}` attribute: {}",
            xml::node_span_field(&node)
        ))
    })
}

fn required_child_text(node: Node, name: &str) -> Result<&'static str> {
    xml::child_text(node, name).ok_or_else(|| {
        Error::Schema(format!(
            "missing `<{name}>` child: {}",
            xml::node_span_field(&node)
        ))
    })
}
