//! Accessors for KDL child-node values.
//!
//! Settings are written as child nodes with a single argument, e.g.
//! `domain "example.org"`. Each helper looks up the first child node with the
//! given name and converts its first positional argument.

use ::kdl::{KdlNode, KdlValue};

use crate::ConfigError;

/// Find a direct child node by name
pub fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// First positional argument of a node
pub fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// All positional arguments of a node
pub fn args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// String value of child `name`
pub fn get_string_entry(node: &KdlNode, name: &str) -> Result<Option<String>, ConfigError> {
    let Some(value) = child(node, name).and_then(first_arg) else {
        return Ok(None);
    };

    value
        .as_string()
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| type_error(name, "a string", value))
}

/// Boolean value of child `name`
///
/// A bare child node (`enabled`) counts as `true`.
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(child) = child(node, name) else {
        return Ok(None);
    };

    match first_arg(child) {
        None => Ok(Some(true)),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| type_error(name, "a boolean (#true / #false)", value)),
    }
}

/// Non-negative integer value of child `name`
pub fn get_u64_entry(node: &KdlNode, name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(value) = child(node, name).and_then(first_arg) else {
        return Ok(None);
    };

    value
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| type_error(name, "a non-negative integer", value))
}

/// All string arguments of child `name`
pub fn get_string_list(node: &KdlNode, name: &str) -> Result<Vec<String>, ConfigError> {
    let Some(child) = child(node, name) else {
        return Ok(Vec::new());
    };

    args(child)
        .map(|value| {
            value
                .as_string()
                .map(ToString::to_string)
                .ok_or_else(|| type_error(name, "a list of strings", value))
        })
        .collect()
}

fn type_error(name: &str, expected: &str, found: &KdlValue) -> ConfigError {
    ConfigError::Invalid(format!("'{}' must be {}, found {}", name, expected, found))
}
