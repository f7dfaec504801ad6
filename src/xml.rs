use crate::error::Result;
use std::{fmt::Write, fs, path::Path};

/// A node with both lifetimes pinned to `'static`.
///
/// The input string and the parsed document are leaked on load, so nodes can
/// be stored in the registry graph as plain `Copy` values without tying the
/// graph to a document lifetime.
pub type Node = roxmltree::Node<'static, 'static>;

/// Reads and parses the registry document, returning its root element.
pub fn load(path: impl AsRef<Path>) -> Result<Node> {
    // We leak the input string here for convenience, to avoid explicit
    // lifetimes.
    let input = Box::leak(fs::read_to_string(path)?.into_boxed_str());
    parse(input)
}

/// Parses an already-loaded registry document, returning its root element.
pub fn from_string(input: &str) -> Result<Node> {
    parse(Box::leak(input.to_owned().into_boxed_str()))
}

fn parse(input: &'static str) -> Result<Node> {
    let doc = Box::leak(Box::new(roxmltree::Document::parse(input)?));
    Ok(doc.root_element())
}

/// Retrieves the value of the `node`'s attribute named `name`.
pub fn attribute(node: Node, name: &str) -> Option<&'static str> {
    node.attribute(name)
}

/// Retrieves the ','-separated values of the `node`'s attribute named `name`.
pub fn attribute_comma_separated(node: Node, name: &str) -> Vec<&'static str> {
    attribute(node, name)
        .map(|value| value.split(',').filter(|part| !part.is_empty()).collect())
        .unwrap_or_default()
}

/// Returns the next child element of `node` named `name`.
pub fn find_child(node: Node, name: &str) -> Option<Node> {
    node.children().find(|child| child.has_tag_name(name))
}

/// Retrieves the text inside the next child element of `node` named `name`.
pub fn child_text(node: Node, name: &str) -> Option<&'static str> {
    find_child(node, name).and_then(|child| child.text())
}

/// Returns all child elements of `node` named `name` that match the target
/// API.
pub fn children_named(node: Node, name: &'static str) -> impl Iterator<Item = Node> {
    node.children()
        .filter(move |child| child.has_tag_name(name))
        .filter(|child| api_matches(*child))
}

/// Walks a `findall`-style element path from `node`, e.g.
/// `["commands", "command"]`.
pub fn path_iter(node: Node, path: &'static [&'static str]) -> Box<dyn Iterator<Item = Node>> {
    let mut iter: Box<dyn Iterator<Item = Node>> = Box::new(std::iter::once(node));
    for &name in path {
        iter = Box::new(iter.flat_map(move |parent| children_named(parent, name)));
    }
    iter
}

/// Returns [`true`] when the `node`'s "api" attribute is absent or lists the
/// `vulkan` API. Entries gated to other dialects (e.g. `vulkansc`) are
/// skipped everywhere this is applied.
pub fn api_matches(node: Node) -> bool {
    node.attribute("api")
        .map(|values| values.split(',').any(|value| value == "vulkan"))
        .unwrap_or(true)
}

/// Returns a "pseudo-XML" representation of the node, for use in tracing
/// spans.
pub fn node_span_field(node: &Node) -> String {
    let mut output = format!("<{}", node.tag_name().name());
    for attr in node.attributes() {
        write!(output, " {}='{}'", attr.name(), attr.value()).unwrap();
    }

    output + ">"
}
