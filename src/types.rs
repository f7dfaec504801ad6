use crate::xml::Node;
use indexmap::IndexMap;
use tracing::warn;

/// Stable index of a type node in the registry arena.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeId(pub(crate) u32);

/// Stable index of a command in the registry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct CommandId(pub(crate) u32);

/// Stable index of an extension in the registry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ExtensionId(pub(crate) u32);

/// A link to another type node.
///
/// Entries are created out of declaration order, so links start out as plain
/// names and are rewritten to arena ids by the resolution sweep. After a
/// successful load no `Ref` remains reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSlot {
    Ref(&'static str),
    Id(TypeId),
}

impl TypeSlot {
    pub fn id(&self) -> TypeId {
        match self {
            TypeSlot::Id(id) => *id,
            TypeSlot::Ref(name) => panic!("type reference `{name}` was never resolved"),
        }
    }
}

/// A type node: either a named catalog entry or an anonymous modifier level
/// wrapping another node.
#[derive(Debug, Clone)]
pub enum Type {
    Base(BaseType),
    Alias(TypeAlias),
    Define(Define),
    Handle(Handle),
    Enum(Enum),
    Bitmask(Bitmask),
    FunctionPointer(FunctionPointer),
    Struct(Struct),
    Pointer(Pointer),
    NextPointer(Pointer),
    FixedArray(FixedArray),
    DynamicArray(DynamicArray),
}

impl Type {
    /// The catalog name of this node. Modifier levels are anonymous.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Type::Base(ty) => Some(ty.name),
            Type::Alias(ty) => Some(ty.name),
            Type::Define(ty) => Some(ty.name),
            Type::Handle(ty) => Some(ty.name),
            Type::Enum(ty) => Some(ty.name),
            Type::Bitmask(ty) => Some(ty.name),
            Type::FunctionPointer(ty) => Some(ty.name),
            Type::Struct(ty) => Some(ty.name),
            Type::Pointer(_) | Type::NextPointer(_) | Type::FixedArray(_) | Type::DynamicArray(_) => {
                None
            }
        }
    }

    /// The XML element this node came from. Absent for modifier levels,
    /// aliases, and the synthetic `string` base type.
    pub fn xml(&self) -> Option<Node> {
        match self {
            Type::Base(ty) => ty.xml,
            Type::Define(ty) => Some(ty.xml),
            Type::Handle(ty) => Some(ty.xml),
            Type::Enum(ty) => Some(ty.xml),
            Type::Bitmask(ty) => Some(ty.xml),
            Type::FunctionPointer(ty) => Some(ty.xml),
            Type::Struct(ty) => Some(ty.xml),
            Type::Alias(_)
            | Type::Pointer(_)
            | Type::NextPointer(_)
            | Type::FixedArray(_)
            | Type::DynamicArray(_) => None,
        }
    }

    /// Extensions that listed this type in a `require` block.
    pub fn extensions(&self) -> &[ExtensionId] {
        match self {
            Type::Base(ty) => &ty.extensions,
            Type::Alias(ty) => &ty.extensions,
            Type::Define(ty) => &ty.extensions,
            Type::Handle(ty) => &ty.extensions,
            Type::Enum(ty) => &ty.extensions,
            Type::Bitmask(ty) => &ty.extensions,
            Type::FunctionPointer(ty) => &ty.extensions,
            Type::Struct(ty) => &ty.extensions,
            Type::Pointer(_) | Type::NextPointer(_) | Type::FixedArray(_) | Type::DynamicArray(_) => {
                &[]
            }
        }
    }

    pub(crate) fn extensions_mut(&mut self) -> Option<&mut Vec<ExtensionId>> {
        match self {
            Type::Base(ty) => Some(&mut ty.extensions),
            Type::Alias(ty) => Some(&mut ty.extensions),
            Type::Define(ty) => Some(&mut ty.extensions),
            Type::Handle(ty) => Some(&mut ty.extensions),
            Type::Enum(ty) => Some(&mut ty.extensions),
            Type::Bitmask(ty) => Some(&mut ty.extensions),
            Type::FunctionPointer(ty) => Some(&mut ty.extensions),
            Type::Struct(ty) => Some(&mut ty.extensions),
            Type::Pointer(_) | Type::NextPointer(_) | Type::FixedArray(_) | Type::DynamicArray(_) => {
                None
            }
        }
    }

    pub fn as_alias(&self) -> Option<&TypeAlias> {
        match self {
            Type::Alias(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Type::Handle(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Enum> {
        match self {
            Type::Enum(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Type::Struct(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_dynamic_array(&self) -> Option<&DynamicArray> {
        match self {
            Type::DynamicArray(ty) => Some(ty),
            _ => None,
        }
    }
}

/// A pre-defined scalar type: C types such as `uint32_t` and `float`,
/// platform types, and the synthetic `string` standing for a null-terminated
/// C string.
#[derive(Debug, Clone)]
pub struct BaseType {
    pub name: &'static str,
    pub extensions: Vec<ExtensionId>,
    pub xml: Option<Node>,
}

/// A secondary name for another type, produced by promotion or
/// backwards-compat renames.
#[derive(Debug, Clone)]
pub struct TypeAlias {
    pub name: &'static str,
    pub target: TypeSlot,
    pub extensions: Vec<ExtensionId>,
}

/// A preprocessor define. Only consulted for version information.
#[derive(Debug, Clone)]
pub struct Define {
    pub name: &'static str,
    pub text: Option<&'static str>,
    /// Text following the `<name>` element, e.g. the number in
    /// `#define <name>VK_HEADER_VERSION</name> 178`.
    pub tail: Option<&'static str>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

/// An opaque Vulkan object handle.
#[derive(Debug, Clone)]
pub struct Handle {
    pub name: &'static str,
    pub is_dispatchable: bool,
    pub parent: Option<TypeSlot>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

/// The integer value of an enumerand. Values that fail integer decoding keep
/// their raw source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumLiteral {
    Int(i64),
    Raw(&'static str),
}

impl EnumLiteral {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EnumLiteral::Int(value) => Some(*value),
            EnumLiteral::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumValue {
    pub name: &'static str,
    pub value: EnumLiteral,
    pub comment: Option<&'static str>,
    /// Extensions that contributed this value. Empty for values intrinsic to
    /// the enum declaration or grafted by a core feature block.
    pub extensions: Vec<ExtensionId>,
    pub xml: Option<Node>,
}

/// An alias enumerand pointing at a peer in the same enum.
#[derive(Debug, Clone)]
pub struct EnumAlias {
    pub name: &'static str,
    pub target: &'static str,
    pub extensions: Vec<ExtensionId>,
}

#[derive(Debug, Clone)]
pub enum EnumEntry {
    Value(EnumValue),
    Alias(EnumAlias),
}

impl EnumEntry {
    pub fn name(&self) -> &'static str {
        match self {
            EnumEntry::Value(value) => value.name,
            EnumEntry::Alias(alias) => alias.name,
        }
    }

    pub fn extensions(&self) -> &[ExtensionId] {
        match self {
            EnumEntry::Value(value) => &value.extensions,
            EnumEntry::Alias(alias) => &alias.extensions,
        }
    }

    pub fn as_value(&self) -> Option<&EnumValue> {
        match self {
            EnumEntry::Value(value) => Some(value),
            EnumEntry::Alias(_) => None,
        }
    }
}

/// A C enum type, including the flag-bits enums backing bitmasks.
#[derive(Debug, Clone)]
pub struct Enum {
    pub name: &'static str,
    pub is_bitmask: bool,
    pub bitwidth: u32,
    pub values: IndexMap<&'static str, EnumEntry>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

impl Enum {
    /// Follows alias entries to the concrete value named `name`, if any.
    pub fn resolve_value(&self, name: &str) -> Option<&EnumValue> {
        let mut current = self.values.get(name)?;
        // The alias graph is a DAG; the hop cap only guards against a
        // malformed registry.
        for _ in 0..self.values.len() {
            match current {
                EnumEntry::Value(value) => return Some(value),
                EnumEntry::Alias(alias) => current = self.values.get(alias.target)?,
            }
        }
        None
    }

    /// Returns a name-to-integer map of all values, resolving alias entries.
    pub fn integer_values(&self) -> IndexMap<&'static str, i64> {
        let mut values = IndexMap::new();
        for entry in self.values.values() {
            let resolved = match entry {
                EnumEntry::Value(value) => Some(value),
                EnumEntry::Alias(alias) => self.resolve_value(alias.target),
            };
            match resolved.map(|value| &value.value) {
                Some(EnumLiteral::Int(value)) => {
                    values.insert(entry.name(), *value);
                }
                Some(EnumLiteral::Raw(raw)) => {
                    warn!(name = entry.name(), raw = *raw, "skipping non-integer enum value");
                }
                None => warn!(name = entry.name(), "dangling enum value alias"),
            }
        }
        values
    }

    /// The value map with alias entries stripped.
    pub fn unique_values(&self) -> IndexMap<&'static str, &EnumValue> {
        self.values
            .values()
            .filter_map(|entry| entry.as_value())
            .map(|value| (value.name, value))
            .collect()
    }
}

/// A flags type. `flags` points at the enum defining its legal bits; absent
/// for placeholder flag types with no defined values.
#[derive(Debug, Clone)]
pub struct Bitmask {
    pub name: &'static str,
    /// Underlying C type, `VkFlags` or `VkFlags64`.
    pub underlying: &'static str,
    pub flags: Option<TypeSlot>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

#[derive(Debug, Clone)]
pub struct FunctionPointer {
    pub name: &'static str,
    pub requires: Option<&'static str>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

/// A struct or union member, or a command parameter.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub ty: TypeSlot,
    pub is_optional: bool,
    /// Set when the outermost modifier is a non-const pointer or dynamic
    /// array.
    pub is_output: bool,
    /// Bit-field width, for packed struct members.
    pub bit_size: Option<u32>,
    /// Allowed literal values, from the `values=` attribute.
    pub values: Vec<&'static str>,
    pub xml: Node,
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub name: &'static str,
    pub is_union: bool,
    pub members: Vec<Field>,
    /// Structs this struct can extend through a `pNext` chain.
    pub structextends: Vec<TypeSlot>,
    /// Mirror of `structextends`: structs that can extend this one.
    pub extendedby: Vec<TypeId>,
    pub extensions: Vec<ExtensionId>,
    pub xml: Node,
}

impl Struct {
    pub fn find_member(&self, name: &str) -> Option<&Field> {
        self.members.iter().find(|member| member.name == name)
    }
}

/// A pointer modifier level. Also the shape of `NextPointer`, the `pNext`
/// chain head.
#[derive(Debug, Clone)]
pub struct Pointer {
    pub base: TypeSlot,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLength {
    Literal(u64),
    /// A named constant, e.g. `VK_UUID_SIZE`.
    Named(&'static str),
}

#[derive(Debug, Clone)]
pub struct FixedArray {
    pub base: TypeSlot,
    pub is_const: bool,
    pub length: ArrayLength,
}

/// The struct or command a dynamic array's length expression is evaluated
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Struct(&'static str),
    Command(&'static str),
}

/// An array whose length is given by a `len=`/`altlen=` expression over the
/// owning struct's members or command's parameters.
#[derive(Debug, Clone)]
pub struct DynamicArray {
    pub base: TypeSlot,
    pub is_const: bool,
    pub length: &'static str,
    pub owner: Owner,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub return_type: TypeSlot,
    pub parameters: Vec<Field>,
    pub successcodes: Vec<&'static str>,
    pub errorcodes: Vec<&'static str>,
    pub extensions: Vec<ExtensionId>,
    /// The core version that introduced this command, e.g. `VK_VERSION_1_2`.
    pub feature: Option<&'static str>,
    /// Whether this command dispatches on an instance-level handle.
    pub is_instance: bool,
    pub xml: Node,
}

impl Command {
    pub fn find_parameter(&self, name: &str) -> Option<&Field> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub name: &'static str,
    pub number: i64,
    /// The `type=` attribute: `instance`, `device`, or empty.
    pub ext_type: &'static str,
    pub author: &'static str,
    pub supported: &'static str,
    pub promotedto: &'static str,
    pub deprecatedby: &'static str,
    /// Declared platform name; empty for cross-platform extensions.
    pub platform: &'static str,
    pub requires: Vec<&'static str>,
    pub specialuse: Vec<&'static str>,
    /// The `*_EXTENSION_NAME` enumerand, when declared.
    pub name_enum: Option<&'static str>,
    /// The `*_SPEC_VERSION` enumerand, when declared.
    pub spec_version_enum: Option<&'static str>,
    /// Types this extension contributes.
    pub types: Vec<&'static str>,
    /// Commands this extension contributes.
    pub commands: Vec<&'static str>,
    pub xml: Node,
}

/// An OS or windowing-system target gated by a preprocessor macro. The
/// per-platform views are populated after filtering.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: &'static str,
    /// The preprocessor guard macro, e.g. `VK_USE_PLATFORM_GGP`.
    pub protect: &'static str,
    pub extensions: IndexMap<&'static str, ExtensionId>,
    pub types: IndexMap<&'static str, TypeId>,
    pub commands: IndexMap<&'static str, CommandId>,
    /// Absent for the synthetic core platform.
    pub xml: Option<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Default for ApiVersion {
    fn default() -> ApiVersion {
        ApiVersion {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }
}
