//! `pojoize parse`: parse component metadata and print it back.

use crate::output::StyledOutput;
use anyhow::Context;
use pojo_metadata::{components, instances, parse, parse_header};
use std::path::Path;

/// Canonical text (or JSON) for a metadata description
///
/// With `header`, the text is a whole `iPOJO-Components` value: instances
/// are decoded and reported alongside the component types.
pub fn render(text: &str, header: bool, json: bool) -> anyhow::Result<String> {
    if !header {
        let element = parse(text).context("invalid metadata")?;
        return Ok(if json {
            serde_json::to_string_pretty(&element)?
        } else {
            element.to_manifest_string()
        });
    }

    let root = parse_header(text).context("invalid metadata header")?;
    let types = components(&root);
    let configured = instances(&root).context("invalid instance declaration")?;
    if json {
        let value = serde_json::json!({
            "components": types,
            "instances": configured,
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut lines: Vec<String> = root
        .elements()
        .iter()
        .map(|e| e.to_manifest_string())
        .collect();
    lines.push(format!(
        "{} component type(s), {} instance(s)",
        types.len(),
        configured.len()
    ));
    Ok(lines.join("\n"))
}

pub fn execute(
    text: Option<String>,
    file: Option<&Path>,
    header: bool,
    json: bool,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        (None, None) => anyhow::bail!("give metadata text or --file"),
    };
    out.line(&render(&text, header, json)?);
    Ok(())
}
