//! Decoding of the C declarator fragments embedded in member and parameter
//! elements.
//!
//! A member element interleaves markup and free text, e.g.
//! `<member>const <type>void</type>* <name>pNext</name></member>`. The free
//! text carries the type modifiers: pointers, const qualifiers, fixed array
//! bounds, and bit-field widths.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{ArrayLength, DynamicArray, Field, FixedArray, Owner, Pointer, Type, TypeSlot};
use crate::xml::{self, Node};
use roxmltree::NodeType;

/// One declarator level, outermost first.
#[derive(Debug, Default)]
struct PointerLevel {
    is_const: bool,
    fixed_length: Option<&'static str>,
    dynamic_length: Option<&'static str>,
}

impl PointerLevel {
    fn is_fixed_array(&self) -> bool {
        self.fixed_length.is_some()
    }
}

/// Concatenates the declarator text of `node`: its text children plus the
/// text of embedded elements other than the primary `<type>`, the `<name>`,
/// and comments. Array bounds given as `<enum>` references are picked up
/// here.
fn declarator_text(node: Node) -> String {
    let mut text = String::new();
    for child in node.children() {
        match child.node_type() {
            NodeType::Text => text.push_str(child.text().unwrap_or("")),
            NodeType::Element => {
                let tag = child.tag_name().name();
                if tag != "type" && tag != "name" && tag != "comment" {
                    text.push_str(child.text().unwrap_or(""));
                }
            }
            _ => (),
        }
    }
    text
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    match rest.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => None,
        _ => Some(rest.trim_start()),
    }
}

/// Walks the declarator token stream. A sliding const flag applies to the
/// next pointer or array level.
fn parse_declarator(text: &str) -> Result<(Vec<PointerLevel>, Option<u32>)> {
    let mut rest = text.trim();
    let mut is_const = false;
    let mut levels: Vec<PointerLevel> = Vec::new();
    let mut bits = None;

    while !rest.is_empty() {
        if let Some(after) = strip_keyword(rest, "struct") {
            rest = after;
        } else if let Some(after) = strip_keyword(rest, "const") {
            is_const = true;
            rest = after;
        } else if let Some(after) = rest.strip_prefix('*') {
            levels.push(PointerLevel {
                is_const,
                ..Default::default()
            });
            is_const = false;
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(|| {
                Error::Schema(format!("unterminated array bound in declarator `{text}`"))
            })?;
            let length = after[..end].trim();
            levels.push(PointerLevel {
                is_const,
                fixed_length: Some(leak(length)),
                ..Default::default()
            });
            rest = after[end + 1..].trim_start();
        } else if let Some(after) = rest.strip_prefix(':') {
            let after = after.trim_start();
            let digits = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            if digits == 0 {
                return Err(Error::Schema(format!(
                    "bit-field width is not an integer in declarator `{text}`"
                )));
            }
            bits = Some(after[..digits].parse::<u32>().map_err(|_| {
                Error::Schema(format!("bit-field width overflow in declarator `{text}`"))
            })?);
            rest = after[digits..].trim_start();
        } else {
            return Err(Error::Schema(format!(
                "undecodable declarator `{text}` at `{rest}`"
            )));
        }
    }

    Ok((levels, bits))
}

fn leak(s: &str) -> &'static str {
    Box::leak(s.to_owned().into_boxed_str())
}

/// Parses a `<member>` or `<param>` element into a [`Field`], pushing any
/// modifier levels into the registry arena.
pub(crate) fn parse_field(registry: &mut Registry, node: Node, owner: Owner) -> Result<Field> {
    let name = xml::child_text(node, "name").ok_or_else(|| {
        Error::Schema(format!("member without a <name>: {}", xml::node_span_field(&node)))
    })?;
    let base_name = xml::child_text(node, "type").ok_or_else(|| {
        Error::Schema(format!("member without a <type>: {}", xml::node_span_field(&node)))
    })?;

    let (mut levels, bits) = parse_declarator(&declarator_text(node))?;

    // `altlen` holds the real expression when `len` is a legacy spelling.
    let dynamic_lengths = match xml::attribute(node, "altlen") {
        Some(_) => xml::attribute_comma_separated(node, "altlen"),
        None => xml::attribute_comma_separated(node, "len"),
    };
    for (index, &length) in dynamic_lengths.iter().enumerate() {
        let level = levels.get_mut(index).ok_or_else(|| {
            Error::Schema(format!("`len` exceeds pointer depth on `{name}`"))
        })?;
        if level.is_fixed_array() {
            return Err(Error::Schema(format!(
                "`len` applied to fixed array on `{name}`"
            )));
        }
        level.dynamic_length = Some(length);
    }

    // Wrap the base type innermost-first.
    let mut ty = TypeSlot::Ref(base_name);
    let mut is_void_base = base_name == "void";
    for level in levels.iter().rev() {
        // A null-terminated level collapses whatever it wraps into the
        // synthetic `string` base type.
        if level.dynamic_length == Some("null-terminated") {
            ty = TypeSlot::Ref("string");
            is_void_base = false;
            continue;
        }
        ty = if let Some(length) = level.fixed_length {
            let length = match length.parse::<u64>() {
                Ok(literal) => ArrayLength::Literal(literal),
                Err(_) => ArrayLength::Named(length),
            };
            TypeSlot::Id(registry.push_type(Type::FixedArray(FixedArray {
                base: ty,
                is_const: level.is_const,
                length,
            })))
        } else if let Some(length) = level.dynamic_length {
            TypeSlot::Id(registry.push_type(Type::DynamicArray(DynamicArray {
                base: ty,
                is_const: level.is_const,
                length,
                owner,
            })))
        } else if is_void_base && name == "pNext" {
            TypeSlot::Id(registry.push_type(Type::NextPointer(Pointer {
                base: ty,
                is_const: level.is_const,
            })))
        } else {
            TypeSlot::Id(registry.push_type(Type::Pointer(Pointer {
                base: ty,
                is_const: level.is_const,
            })))
        };
        is_void_base = false;
    }

    let is_output = levels
        .first()
        .map(|outer| !outer.is_fixed_array() && !outer.is_const)
        .unwrap_or(false);

    Ok(Field {
        name,
        ty,
        is_optional: xml::attribute(node, "optional") == Some("true"),
        is_output,
        bit_size: bits,
        values: xml::attribute_comma_separated(node, "values"),
        xml: node,
    })
}
