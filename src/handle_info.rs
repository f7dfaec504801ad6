//! Handle lineage and create/destroy command classification.
//!
//! Built on top of a filtered registry, this maps every handle type to the
//! commands that create and destroy it, its parent handle, and (for pooled
//! handles such as `VkDescriptorSet`) the pool it is allocated from.

use crate::registry::Registry;
use crate::types::{CommandId, EnumEntry, Field, Type, TypeId};
use indexmap::IndexMap;
use tracing::warn;

/// A command that produces handles.
#[derive(Debug, Clone)]
pub struct HandleCreateCommand {
    pub command: CommandId,
    /// Parameter index of the parent handle, e.g. `device` in
    /// `vkCreateImage`. Absent only for `vkCreateInstance`.
    pub parent_param: Option<usize>,
    /// The `*CreateInfo` struct type, when the command takes one.
    pub create_info: Option<TypeId>,
    pub create_info_param: Option<usize>,
    /// Member index within `create_info` holding the pool handle, for pool
    /// allocations.
    pub pool_member: Option<usize>,
    /// Parameter index of the output handle(s).
    pub handle_param: usize,
    /// A `vkCreate*`-style command: fresh handles outside any pool.
    pub is_create: bool,
    /// Allocates handles out of a pool, e.g. `vkAllocateDescriptorSets`.
    pub is_pool_allocate: bool,
    /// Returns existing handles rather than creating them, e.g.
    /// `vkGetDeviceQueue`.
    pub is_get: bool,
}

/// A command that destroys handles (or resets a pool of them).
#[derive(Debug, Clone)]
pub struct HandleDestroyCommand {
    pub command: CommandId,
    pub parent_param: Option<usize>,
    /// Parameter index of the containing pool, e.g. `descriptorPool` in
    /// `vkFreeDescriptorSets`.
    pub pool_param: Option<usize>,
    pub handle_param: Option<usize>,
}

/// Everything known about one handle type's lifecycle.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub handle: TypeId,
    pub parent: Option<TypeId>,
    /// The pool this handle is allocated from, if any.
    pub pool: Option<TypeId>,
    /// For pool handles, the handle type of the pool's elements.
    pub pool_elem: Option<TypeId>,
    pub create_cmds: Vec<HandleCreateCommand>,
    pub destroy_cmd: Option<HandleDestroyCommand>,
    /// The command destroying every pooled handle of this type at once, e.g.
    /// `vkResetDescriptorPool` for `VkDescriptorSet`.
    pub reset_pool_cmd: Option<HandleDestroyCommand>,
    /// The `VkObjectType` enumerand for this handle type.
    pub object_type: Option<&'static str>,
}

/// Per-handle lifecycle information for a registry.
#[derive(Debug)]
pub struct HandleInfoMap {
    infos: IndexMap<&'static str, HandleInfo>,
}

/// The handle-producing commands that don't follow the `vkCreate*` /
/// `vkAllocate*` naming.
const GETTER_CREATE_COMMANDS: [&str; 5] = [
    "vkEnumeratePhysicalDevices",
    "vkGetDeviceQueue",
    "vkGetDeviceQueue2",
    "vkGetSwapchainImagesKHR",
    "vkGetDisplayPlaneSupportedDisplaysKHR",
];

/// Decomposes a pointer or dynamic-array parameter into its pointee and
/// constness.
fn pointer_base(registry: &Registry, field: &Field) -> Option<(TypeId, bool)> {
    match registry.ty(field.ty.id()) {
        Type::Pointer(pointer) => Some((pointer.base.id(), pointer.is_const)),
        Type::DynamicArray(array) => Some((array.base.id(), array.is_const)),
        _ => None,
    }
}

impl HandleInfoMap {
    pub fn new(registry: &Registry) -> HandleInfoMap {
        let mut map = HandleInfoMap {
            infos: IndexMap::new(),
        };

        for (name, id) in &registry.commands {
            if registry.command_node(*id).name != *name {
                continue; // alias
            }
            if name.starts_with("vkCreate") || name.starts_with("vkAllocate") {
                map.add_create_command(registry, name);
            }
        }
        for name in GETTER_CREATE_COMMANDS {
            if registry.commands.contains_key(name) {
                map.add_create_command(registry, name);
            }
        }

        for (name, id) in &registry.types {
            let node = registry.ty(*id);
            if node.name() != Some(*name) {
                continue; // alias
            }
            if let Type::Handle(handle) = node {
                if !map.infos.contains_key(handle.name) {
                    warn!(
                        handle = handle.name,
                        "could not find a create command, recording a minimal entry"
                    );
                    map.infos.insert(
                        handle.name,
                        HandleInfo {
                            handle: *id,
                            parent: handle.parent.map(|parent| parent.id()),
                            pool: None,
                            pool_elem: None,
                            create_cmds: Vec::new(),
                            destroy_cmd: None,
                            reset_pool_cmd: None,
                            object_type: None,
                        },
                    );
                }
            }
        }

        for (name, id) in &registry.commands {
            if registry.command_node(*id).name != *name {
                continue;
            }
            if name.starts_with("vkDestroy") {
                map.add_destroy_command(registry, name);
            } else if name.starts_with("vkFree") {
                map.add_free_command(registry, name);
            }
        }

        if registry.commands.contains_key("vkResetDescriptorPool") {
            map.add_reset_pool_command(registry, "vkResetDescriptorPool");
        }

        map.assign_object_types(registry);

        // Back-link pools to the handle type they contain.
        let links: Vec<(&'static str, TypeId)> = map
            .infos
            .values()
            .filter_map(|info| {
                let pool = info.pool?;
                registry.ty(pool).name().map(|name| (name, info.handle))
            })
            .collect();
        for (pool_name, handle) in links {
            if let Some(pool_info) = map.infos.get_mut(pool_name) {
                pool_info.pool_elem = Some(handle);
            }
        }

        map
    }

    pub fn handle_info(&self, name: &str) -> Option<&HandleInfo> {
        self.infos.get(name)
    }

    pub fn infos(&self) -> impl Iterator<Item = (&'static str, &HandleInfo)> {
        self.infos.iter().map(|(name, info)| (*name, info))
    }

    fn add_create_command(&mut self, registry: &Registry, name: &str) {
        let Some(command_id) = registry.commands.get(name).copied() else {
            return;
        };
        let command = registry.command_node(command_id);
        let alloc_callbacks = registry.type_id("VkAllocationCallbacks");

        let mut parent_param = None;
        let mut create_info_param = None;
        let mut handle_param = None;
        for (index, param) in command.parameters.iter().enumerate() {
            if matches!(registry.ty(param.ty.id()), Type::Handle(_)) && parent_param.is_none() {
                parent_param = Some(index);
            }
            let Some((base, is_const)) = pointer_base(registry, param) else {
                continue;
            };
            match registry.ty(base) {
                Type::Struct(_) if is_const && Some(base) != alloc_callbacks => {
                    if create_info_param.is_some() {
                        warn!(command = name, "multiple create-info parameters, skipping");
                        return;
                    }
                    create_info_param = Some(index);
                }
                Type::Handle(_) if !is_const => {
                    if handle_param.is_some() {
                        warn!(command = name, "multiple output handle parameters, skipping");
                        return;
                    }
                    handle_param = Some(index);
                }
                _ => (),
            }
        }

        let Some(handle_param) = handle_param else {
            warn!(command = name, "no handle parameter found, skipping");
            return;
        };
        if parent_param.is_none() && name != "vkCreateInstance" {
            warn!(command = name, "create command has no parent handle");
        }

        let parent = parent_param.map(|index| command.parameters[index].ty.id());
        let create_info = create_info_param
            .and_then(|index| pointer_base(registry, &command.parameters[index]))
            .map(|(base, _)| base);

        let mut pool_member = None;
        let mut pool = None;
        let mut is_create = name.starts_with("vkCreate");
        let mut is_pool_allocate = false;
        if name.starts_with("vkAllocate") {
            let Some(info_struct) = create_info.and_then(|id| registry.ty(id).as_struct()) else {
                warn!(command = name, "allocate command without a create info, skipping");
                return;
            };
            for (index, member) in info_struct.members.iter().enumerate() {
                if matches!(registry.ty(member.ty.id()), Type::Handle(_)) {
                    if pool_member.is_some() {
                        warn!(command = name, "multiple pool members, skipping");
                        return;
                    }
                    pool_member = Some(index);
                    pool = Some(member.ty.id());
                }
            }
            if pool_member.is_some() {
                is_pool_allocate = true;
            } else {
                // vkAllocateMemory creates rather than pool-allocates.
                is_create = true;
            }
        }
        let is_get = !(is_create || is_pool_allocate);

        let Some((handle, _)) = pointer_base(registry, &command.parameters[handle_param]) else {
            return;
        };
        let Some(handle_name) = registry.ty(handle).name() else {
            return;
        };

        let create_cmd = HandleCreateCommand {
            command: command_id,
            parent_param,
            create_info,
            create_info_param,
            pool_member,
            handle_param,
            is_create,
            is_pool_allocate,
            is_get,
        };

        match self.infos.get_mut(handle_name) {
            Some(info) => {
                if info.handle != handle || info.parent != parent || info.pool != pool {
                    warn!(handle = handle_name, "inconsistent lineage across create commands");
                }
                info.create_cmds.push(create_cmd);
            }
            None => {
                self.infos.insert(
                    handle_name,
                    HandleInfo {
                        handle,
                        parent,
                        pool,
                        pool_elem: None,
                        create_cmds: vec![create_cmd],
                        destroy_cmd: None,
                        reset_pool_cmd: None,
                        object_type: None,
                    },
                );
            }
        }
    }

    fn add_destroy_command(&mut self, registry: &Registry, name: &str) {
        let Some(command_id) = registry.commands.get(name).copied() else {
            return;
        };
        let params = &registry.command_node(command_id).parameters;
        if !(2..=3).contains(&params.len()) {
            warn!(command = name, "unexpected destroy command shape, skipping");
            return;
        }

        let (parent_param, handle_index) = if params.len() == 3 {
            if !matches!(registry.ty(params[0].ty.id()), Type::Handle(_)) {
                warn!(command = name, "destroy command without a parent handle, skipping");
                return;
            }
            (Some(0), 1)
        } else {
            (None, 0)
        };

        let handle = params[handle_index].ty.id();
        let Type::Handle(handle_node) = registry.ty(handle) else {
            warn!(command = name, "destroy command without a handle parameter, skipping");
            return;
        };
        let allocator_ok = pointer_base(registry, &params[handle_index + 1])
            .map(|(base, _)| matches!(registry.ty(base), Type::Struct(_)))
            .unwrap_or(false);
        if !allocator_ok {
            warn!(command = name, "destroy command without allocation callbacks, skipping");
            return;
        }

        let Some(info) = self.infos.get_mut(handle_node.name) else {
            warn!(command = name, handle = handle_node.name, "destroyed handle is unknown");
            return;
        };
        if info.destroy_cmd.is_some() {
            warn!(handle = handle_node.name, "handle already has a destroy command");
            return;
        }
        info.destroy_cmd = Some(HandleDestroyCommand {
            command: command_id,
            parent_param,
            pool_param: None,
            handle_param: Some(handle_index),
        });
    }

    fn add_free_command(&mut self, registry: &Registry, name: &str) {
        // vkFreeMemory follows the destroy shape, not the pool-free shape.
        if name == "vkFreeMemory" {
            self.add_destroy_command(registry, name);
            return;
        }

        let Some(command_id) = registry.commands.get(name).copied() else {
            return;
        };
        let params = &registry.command_node(command_id).parameters;
        if params.len() != 4 {
            warn!(command = name, "unexpected free command shape, skipping");
            return;
        }
        if !matches!(registry.ty(params[0].ty.id()), Type::Handle(_))
            || !matches!(registry.ty(params[1].ty.id()), Type::Handle(_))
        {
            warn!(command = name, "free command without parent and pool, skipping");
            return;
        }
        if registry.ty(params[2].ty.id()).name() != Some("uint32_t") {
            warn!(command = name, "free command without a count, skipping");
            return;
        }
        let Type::DynamicArray(array) = registry.ty(params[3].ty.id()) else {
            warn!(command = name, "free command without a handle array, skipping");
            return;
        };
        let Type::Handle(handle) = registry.ty(array.base.id()) else {
            warn!(command = name, "freed array does not hold handles, skipping");
            return;
        };

        let Some(info) = self.infos.get_mut(handle.name) else {
            warn!(command = name, handle = handle.name, "freed handle is unknown");
            return;
        };
        if info.destroy_cmd.is_some() {
            warn!(handle = handle.name, "handle already has a destroy command");
            return;
        }
        info.destroy_cmd = Some(HandleDestroyCommand {
            command: command_id,
            parent_param: Some(0),
            pool_param: Some(1),
            handle_param: Some(3),
        });
    }

    fn add_reset_pool_command(&mut self, registry: &Registry, name: &str) {
        let Some(command_id) = registry.commands.get(name).copied() else {
            return;
        };
        let params = &registry.command_node(command_id).parameters;
        if params.len() < 2 {
            warn!(command = name, "unexpected reset command shape, skipping");
            return;
        }
        if !matches!(registry.ty(params[0].ty.id()), Type::Handle(_)) {
            warn!(command = name, "reset command without a parent handle, skipping");
            return;
        }
        let pool = params[1].ty.id();
        if !matches!(registry.ty(pool), Type::Handle(_)) {
            return;
        }

        let Some(elem_key) = self
            .infos
            .iter()
            .find(|(_, info)| info.pool == Some(pool))
            .map(|(key, _)| *key)
        else {
            return;
        };
        let Some(info) = self.infos.get_mut(elem_key) else {
            return;
        };
        if info.reset_pool_cmd.is_some() {
            warn!(handle = elem_key, "handle already has a reset command");
            return;
        }
        info.reset_pool_cmd = Some(HandleDestroyCommand {
            command: command_id,
            parent_param: Some(0),
            pool_param: Some(1),
            handle_param: None,
        });
    }

    /// Maps `VkObjectType` values onto handles, preferring the enumerand's
    /// comment (which spells the handle name) and falling back to deriving
    /// the name from the enumerand itself.
    fn assign_object_types(&mut self, registry: &Registry) {
        let Some(object_type) = registry.lookup("VkObjectType").and_then(Type::as_enum) else {
            return;
        };
        for entry in object_type.values.values() {
            let EnumEntry::Value(value) = entry else {
                continue;
            };
            if value.name == "VK_OBJECT_TYPE_UNKNOWN" {
                continue;
            }
            let handle_name = match value.comment {
                Some(comment) if self.infos.contains_key(comment) => comment.to_string(),
                _ => object_type_to_handle_name(value.name),
            };
            match self.infos.get_mut(handle_name.as_str()) {
                Some(info) => info.object_type = Some(value.name),
                None => warn!(value = value.name, "no handle for object type value"),
            }
        }

        for (name, info) in &self.infos {
            if info.object_type.is_none() {
                warn!(handle = *name, "no VkObjectType value found");
            }
        }
    }

    /// Finds the handle type created by a command, together with the
    /// matching create record. `None` when the command creates nothing.
    pub fn command_handle_created(
        &self,
        registry: &Registry,
        command: &str,
    ) -> Option<(&HandleInfo, &HandleCreateCommand)> {
        let command_id = registry.commands.get(command).copied()?;
        let node = registry.command_node(command_id);
        for (index, param) in node.parameters.iter().enumerate() {
            let Some((base, is_const)) = pointer_base(registry, param) else {
                continue;
            };
            if is_const {
                continue;
            }
            let Some(info) = registry.ty(base).name().and_then(|name| self.infos.get(name))
            else {
                continue;
            };
            for create_cmd in &info.create_cmds {
                if create_cmd.command == command_id && create_cmd.handle_param == index {
                    return Some((info, create_cmd));
                }
            }
        }
        None
    }

    pub fn is_create_command(&self, registry: &Registry, command: &str) -> bool {
        self.command_handle_created(registry, command)
            .map(|(_, create_cmd)| create_cmd.is_create)
            .unwrap_or(false)
    }

    pub fn is_pool_allocate_command(&self, registry: &Registry, command: &str) -> bool {
        self.command_handle_created(registry, command)
            .map(|(_, create_cmd)| create_cmd.is_pool_allocate)
            .unwrap_or(false)
    }

    pub fn is_get_command(&self, registry: &Registry, command: &str) -> bool {
        self.command_handle_created(registry, command)
            .map(|(_, create_cmd)| create_cmd.is_get)
            .unwrap_or(false)
    }

    /// Finds the handle type destroyed by a command.
    pub fn command_handle_destroyed(
        &self,
        registry: &Registry,
        command: &str,
    ) -> Option<&HandleInfo> {
        let command_id = registry.commands.get(command).copied()?;
        let node = registry.command_node(command_id);
        for param in &node.parameters {
            let mut ty = param.ty.id();
            if let Type::DynamicArray(array) = registry.ty(ty) {
                ty = array.base.id();
            }
            let Type::Handle(handle) = registry.ty(ty) else {
                continue;
            };
            let Some(info) = self.infos.get(handle.name) else {
                continue;
            };
            if info.destroy_cmd.as_ref().map(|destroy| destroy.command) == Some(command_id) {
                return Some(info);
            }
        }
        None
    }

    pub fn is_destroy_command(&self, registry: &Registry, command: &str) -> bool {
        self.command_handle_destroyed(registry, command).is_some()
    }

    /// Finds the pool and element handle types affected by a pool-reset
    /// command, e.g. (`VkDescriptorPool`, `VkDescriptorSet`) for
    /// `vkResetDescriptorPool`.
    pub fn command_pool_reset(
        &self,
        registry: &Registry,
        command: &str,
    ) -> Option<(&HandleInfo, &HandleInfo)> {
        let command_id = registry.commands.get(command).copied()?;
        let node = registry.command_node(command_id);
        for param in &node.parameters {
            let Some(pool_info) = registry
                .ty(param.ty.id())
                .name()
                .and_then(|name| self.infos.get(name))
            else {
                continue;
            };
            let Some(elem) = pool_info.pool_elem else {
                continue;
            };
            let Some(elem_info) = registry.ty(elem).name().and_then(|name| self.infos.get(name))
            else {
                continue;
            };
            if elem_info
                .reset_pool_cmd
                .as_ref()
                .map(|reset| reset.command)
                == Some(command_id)
            {
                return Some((pool_info, elem_info));
            }
        }
        None
    }

    pub fn is_reset_pool_command(&self, registry: &Registry, command: &str) -> bool {
        self.command_pool_reset(registry, command).is_some()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Derives a handle type name from a `VkObjectType` enumerand, e.g.
/// `VK_OBJECT_TYPE_COMMAND_POOL` becomes `VkCommandPool`.
fn object_type_to_handle_name(value_name: &str) -> String {
    let stripped = value_name
        .strip_prefix("VK_OBJECT_TYPE_")
        .unwrap_or(value_name);
    let mut words: Vec<String> = stripped.split('_').map(capitalize).collect();
    if let Some(last) = words.last_mut() {
        let upper = last.to_uppercase();
        if upper == "EXT" || upper == "KHR" {
            *last = upper;
        }
    }
    format!("Vk{}", words.concat())
}
