//! KDL parsing for the `acme` block.

mod acme;
mod helpers;

use ::kdl::KdlDocument;
use tracing::trace;

use crate::{AcmeConfig, ConfigError};

/// Parse a whole document; exactly one top-level `acme` node is expected
pub fn parse_document(doc: &KdlDocument) -> Result<AcmeConfig, ConfigError> {
    let mut acme_nodes = doc.nodes().iter().filter(|n| n.name().value() == "acme");

    let node = acme_nodes.next().ok_or_else(|| {
        ConfigError::Invalid("missing top-level 'acme { ... }' block".to_string())
    })?;

    if acme_nodes.next().is_some() {
        return Err(ConfigError::Invalid(
            "only one 'acme' block is supported".to_string(),
        ));
    }

    for other in doc.nodes().iter().filter(|n| n.name().value() != "acme") {
        trace!(node = %other.name().value(), "Ignoring unknown top-level node");
    }

    acme::parse_acme_config(node)
}
