//! `pojoize manipulate`: manipulate a single class file.

use crate::output::StyledOutput;
use anyhow::Context;
use pojo_manipulator::{ManipulatedClass, ManipulationConfig, Manipulator};
use std::path::Path;

/// Manipulate `input` into `output`, optionally writing the `Manipulation`
/// element to `metadata_out`
pub fn manipulate_file(
    input: &Path,
    output: &Path,
    metadata_out: Option<&Path>,
    config: &ManipulationConfig,
) -> anyhow::Result<ManipulatedClass> {
    let bytes = std::fs::read(input).with_context(|| format!("cannot read {}", input.display()))?;
    let manipulated = Manipulator::new(config)
        .manipulate(&bytes)
        .with_context(|| format!("cannot manipulate {}", input.display()))?;

    std::fs::write(output, &manipulated.bytes)
        .with_context(|| format!("cannot write {}", output.display()))?;
    if let Some(path) = metadata_out {
        std::fs::write(path, manipulated.metadata.to_manifest_string())
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(manipulated)
}

pub fn execute(
    input: &Path,
    output: &Path,
    metadata_out: Option<&Path>,
    config: &ManipulationConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let manipulated = manipulate_file(input, output, metadata_out, config)?;
    out.success("Manipulated ");
    out.plain(&manipulated.class_name.replace('/', "."));
    out.line(&format!(
        " ({} field(s) intercepted) -> {}",
        manipulated.fields.len(),
        output.display()
    ));
    if metadata_out.is_none() {
        out.line(&manipulated.metadata.to_manifest_string());
    }
    Ok(())
}
