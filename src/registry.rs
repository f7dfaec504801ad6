use crate::types::{
    ApiVersion, Command, CommandId, DynamicArray, EnumEntry, Extension, ExtensionId, Field,
    Platform, Type, TypeId, TypeSlot,
};
use crate::xml::Node;
use indexmap::IndexMap;
use tracing::warn;

/// A named platform declaration, before any filtering.
#[derive(Debug, Clone)]
pub(crate) struct PlatformDef {
    pub name: &'static str,
    pub protect: &'static str,
    pub xml: Node,
}

/// The fully-resolved registry graph.
///
/// All nodes live in arenas indexed by stable ids; the public maps bind names
/// to ids. Filtering clones the whole registry and prunes the clone, so the
/// canonical graph owned by [`crate::Library`] is never damaged and one parse
/// can serve many filtered views.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    pub(crate) type_nodes: Vec<Type>,
    pub(crate) command_nodes: Vec<Command>,
    pub(crate) extension_nodes: Vec<Extension>,
    /// Catalog types by name. Alias entries carry their own name and point at
    /// the canonical type.
    pub types: IndexMap<&'static str, TypeId>,
    /// Commands by name. An aliased command name binds to the canonical
    /// command, so `commands[k].name != k` exactly for alias entries.
    pub commands: IndexMap<&'static str, CommandId>,
    pub extensions: IndexMap<&'static str, ExtensionId>,
    /// Type alias entries, a subset of `types`.
    pub aliases: IndexMap<&'static str, TypeId>,
    /// The bare constants pool (`API Constants`).
    pub constants: IndexMap<&'static str, EnumEntry>,
    /// Per-platform views, populated after filtering.
    pub platforms: IndexMap<&'static str, Platform>,
    pub(crate) platform_defs: Vec<PlatformDef>,
    pub api_version: ApiVersion,
}

impl Registry {
    pub(crate) fn push_type(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.type_nodes.len() as u32);
        self.type_nodes.push(ty);
        id
    }

    pub(crate) fn push_command(&mut self, command: Command) -> CommandId {
        let id = CommandId(self.command_nodes.len() as u32);
        self.command_nodes.push(command);
        id
    }

    pub(crate) fn push_extension(&mut self, extension: Extension) -> ExtensionId {
        let id = ExtensionId(self.extension_nodes.len() as u32);
        self.extension_nodes.push(extension);
        id
    }

    pub fn ty(&self, id: TypeId) -> &Type {
        &self.type_nodes[id.0 as usize]
    }

    pub(crate) fn ty_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.type_nodes[id.0 as usize]
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.types.get(name).copied()
    }

    /// Looks up a catalog type by name.
    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.type_id(name).map(|id| self.ty(id))
    }

    pub fn command_node(&self, id: CommandId) -> &Command {
        &self.command_nodes[id.0 as usize]
    }

    pub(crate) fn command_node_mut(&mut self, id: CommandId) -> &mut Command {
        &mut self.command_nodes[id.0 as usize]
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.get(name).map(|id| self.command_node(*id))
    }

    pub fn extension_node(&self, id: ExtensionId) -> &Extension {
        &self.extension_nodes[id.0 as usize]
    }

    pub fn extension(&self, name: &str) -> Option<&Extension> {
        self.extensions.get(name).map(|id| self.extension_node(*id))
    }

    /// Renders a type as a readable chain, e.g.
    /// `ConstDynamicArray(VkDeviceQueueCreateInfo)`.
    pub fn type_name(&self, id: TypeId) -> String {
        let modifier = |kind: &str, is_const: bool, base: TypeSlot| {
            let is_const = if is_const { "Const" } else { "" };
            format!("{is_const}{kind}({})", self.slot_name(base))
        };
        match self.ty(id) {
            Type::Pointer(ptr) => modifier("Pointer", ptr.is_const, ptr.base),
            Type::NextPointer(ptr) => modifier("NextPointer", ptr.is_const, ptr.base),
            Type::FixedArray(array) => modifier("FixedArray", array.is_const, array.base),
            Type::DynamicArray(array) => modifier("DynamicArray", array.is_const, array.base),
            named => named.name().unwrap_or("<anonymous>").to_string(),
        }
    }

    fn slot_name(&self, slot: TypeSlot) -> String {
        match slot {
            TypeSlot::Ref(name) => name.to_string(),
            TypeSlot::Id(id) => self.type_name(id),
        }
    }

    /// Whether the handle dispatches at instance level: its parent chain
    /// climbs to `VkInstance`. `VkSwapchainKHR` is pinned as a device handle
    /// irrespective of its declared parent.
    pub fn is_instance_handle(&self, id: TypeId) -> bool {
        let Some(handle) = self.ty(id).as_handle() else {
            return false;
        };
        match handle.name {
            "VkDevice" => false,
            "VkInstance" => true,
            "VkSwapchainKHR" => false,
            _ => handle
                .parent
                .map(|parent| self.is_instance_handle(parent.id()))
                .unwrap_or(false),
        }
    }

    pub fn is_device_handle(&self, id: TypeId) -> bool {
        !self.is_instance_handle(id)
    }

    /// Whether the type is an alias chain bottoming out at a base type, e.g.
    /// `VkBool32` aliasing `uint32_t`.
    pub fn is_base_type_alias(&self, id: TypeId) -> bool {
        let mut current = id;
        loop {
            match self.ty(current) {
                Type::Alias(alias) => current = alias.target.id(),
                Type::Base(_) => return current != id,
                _ => return false,
            }
        }
    }

    /// Follows alias nodes to the canonical type.
    pub fn resolve_alias(&self, id: TypeId) -> TypeId {
        let mut current = id;
        while let Type::Alias(alias) = self.ty(current) {
            current = alias.target.id();
        }
        current
    }

    /// Projects a name map without its alias entries. Base-type aliases are
    /// kept unless `resolve_base_type_aliases` is set: downstream consumers
    /// usually want `VkBool32` to survive rather than collapse to `uint32_t`.
    pub fn resolve_aliases(
        &self,
        map: &IndexMap<&'static str, TypeId>,
        resolve_base_type_aliases: bool,
    ) -> IndexMap<&'static str, TypeId> {
        map.iter()
            .filter(|(_, id)| match self.ty(**id) {
                Type::Alias(_) => self.is_base_type_alias(**id) && !resolve_base_type_aliases,
                _ => true,
            })
            .map(|(name, id)| (*name, *id))
            .collect()
    }

    pub(crate) fn compute_api_version(&mut self) {
        let define = |registry: &Registry, name: &str| {
            registry.lookup(name).and_then(|ty| match ty {
                Type::Define(def) => Some(def.clone()),
                _ => None,
            })
        };

        let mut version = ApiVersion::default();
        if define(self, "VK_API_VERSION_1_2").is_some() {
            version.minor = 2;
        } else if define(self, "VK_API_VERSION_1_1").is_some() {
            version.minor = 1;
        }
        if let Some(header) = define(self, "VK_HEADER_VERSION") {
            match header.tail.map(|tail| tail.trim().parse::<u32>()) {
                Some(Ok(patch)) => version.patch = patch,
                _ => warn!("VK_HEADER_VERSION carries no patch number"),
            }
        }
        self.api_version = version;
    }
}

enum FieldScope<'a> {
    Struct(&'a crate::types::Struct),
    Command(&'a Command),
}

impl<'a> FieldScope<'a> {
    fn find(&self, name: &str) -> Option<&'a Field> {
        match self {
            FieldScope::Struct(structure) => structure.find_member(name),
            FieldScope::Command(command) => command.find_parameter(name),
        }
    }
}

/// The leading identifier chain of a length expression, e.g. `pImageCount`
/// or `pAllocateInfo->descriptorSetCount`. Pure constants and arithmetic
/// produce no match.
fn leading_identifier_chain(expr: &str) -> Option<&str> {
    let bytes = expr.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    for start in 0..bytes.len() {
        if !bytes[start].is_ascii_alphabetic() || (start > 0 && is_word(bytes[start - 1])) {
            continue;
        }
        let mut end = start + 1;
        loop {
            if end < bytes.len() && is_word(bytes[end]) {
                end += 1;
            } else if end + 1 < bytes.len() && bytes[end] == b'-' && bytes[end + 1] == b'>' {
                end += 2;
            } else {
                break;
            }
        }
        if end > start + 1 {
            return Some(&expr[start..end]);
        }
    }
    None
}

impl DynamicArray {
    /// Formats the `len=` expression as a navigable access.
    ///
    /// The leading identifier chain is located in the owning struct or
    /// command (descending through `->` into pointed-to structs), prefixed
    /// with `obj_expr` when given, and dereferenced when the length field is
    /// itself a pointer. Expressions with no resolvable field pass through
    /// unchanged.
    pub fn length_expr(&self, registry: &Registry, obj_expr: Option<&str>) -> String {
        let Some(chain) = leading_identifier_chain(self.length) else {
            return self.length.to_string();
        };

        let mut scope = match self.owner {
            crate::types::Owner::Struct(name) => {
                match registry.lookup(name).and_then(Type::as_struct) {
                    Some(structure) => FieldScope::Struct(structure),
                    None => return self.length.to_string(),
                }
            }
            crate::types::Owner::Command(name) => match registry.command(name) {
                Some(command) => FieldScope::Command(command),
                None => return self.length.to_string(),
            },
        };

        // The length may live inside another struct, e.g.
        // `pAllocateInfo->descriptorSetCount`.
        let parts: Vec<&str> = chain.split("->").collect();
        for part in &parts[..parts.len() - 1] {
            let Some(field) = scope.find(part) else {
                return self.length.to_string();
            };
            let Type::Pointer(pointer) = registry.ty(field.ty.id()) else {
                warn!(chain, part = *part, "length chain does not traverse a struct pointer");
                return self.length.to_string();
            };
            let Type::Struct(inner) = registry.ty(pointer.base.id()) else {
                warn!(chain, part = *part, "length chain does not traverse a struct pointer");
                return self.length.to_string();
            };
            scope = FieldScope::Struct(inner);
        }

        let Some(length_field) = scope.find(parts[parts.len() - 1]) else {
            // The length can be a constant rather than a field name.
            return self.length.to_string();
        };

        let mut field_expr = chain.to_string();
        if let Some(obj_expr) = obj_expr {
            field_expr = format!("{obj_expr}.{chain}");
        }
        if matches!(registry.ty(length_field.ty.id()), Type::Pointer(_)) {
            field_expr = format!("*{field_expr}");
        }

        self.length.replace(chain, &field_expr)
    }
}
