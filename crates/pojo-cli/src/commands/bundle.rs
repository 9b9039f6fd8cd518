//! `pojoize bundle`: manipulate every component class of a bundle archive
//! and update its manifest.

use crate::archive::{read_archive, write_archive, ArchiveEntry};
use crate::manifest::{Manifest, MANIFEST_PATH};
use crate::output::StyledOutput;
use anyhow::{bail, Context};
use pojo_manipulator::{
    merge_import_header, missing_fields, BundleAnalysis, ClassScanner, ManipulatedClass,
    ManipulationError, Manipulator, ManipulatorConfig,
};
use pojo_metadata::{components, instances, parse_header, Element};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Header holding the component metadata
pub const COMPONENTS_HEADER: &str = "iPOJO-Components";

const CREATED_BY: &str = concat!("pojoize ", env!("CARGO_PKG_VERSION"));

/// What a bundle run did
#[derive(Debug, Clone, Default)]
pub struct BundleReport {
    /// Component types found in the metadata
    pub components: usize,
    /// Instances declared in the metadata
    pub instances: usize,
    /// Binary names of the classes manipulated
    pub manipulated: Vec<String>,
    /// Binary names of classes that were already manipulated
    pub skipped: Vec<String>,
    /// Resulting `Import-Package` value
    pub imports: String,
    /// `Bundle-Activator` set by this run
    pub activator: Option<String>,
}

/// Archive path of a component class name
///
/// Takes the dotted form (`org.example.Hello`) or the binary form
/// (`org/example/Hello`), either one with or without a `.class` suffix.
fn class_entry(class_name: &str) -> String {
    let name = class_name.strip_suffix(".class").unwrap_or(class_name);
    format!("{}.class", name.replace('.', "/"))
}

fn component_class(component: &Element) -> Option<&str> {
    component
        .attribute("className")
        .or_else(|| component.attribute("classname"))
}

/// Manipulate the bundle at `input` and write the result to `output`
///
/// Metadata comes from `metadata` when given, else from the manifest's
/// `iPOJO-Components` header.
pub fn pojoize(
    input: &Path,
    output: &Path,
    metadata: Option<&str>,
    config: &ManipulatorConfig,
) -> anyhow::Result<BundleReport> {
    let mut entries = read_archive(input)?;
    let mut manifest = match entries.iter().find(|e| e.name == MANIFEST_PATH) {
        Some(entry) => Manifest::parse(&entry.data).context("invalid bundle manifest")?,
        None => {
            warn!(bundle = %input.display(), "bundle has no manifest, creating one");
            Manifest::new()
        }
    };

    let text = match metadata {
        Some(text) => text.to_string(),
        None => match manifest.get(COMPONENTS_HEADER) {
            Some(text) => text.to_string(),
            None => bail!(
                "no component metadata: pass --metadata or set the {} header",
                COMPONENTS_HEADER
            ),
        },
    };
    let root = parse_header(&text).context("invalid component metadata")?;
    let declared = instances(&root).context("invalid instance declaration")?;

    let mut report = BundleReport {
        components: components(&root).len(),
        instances: declared.len(),
        ..BundleReport::default()
    };

    // class entry -> manipulation result, one per class even when several
    // component types share it
    let mut results: FxHashMap<String, Option<ManipulatedClass>> = FxHashMap::default();
    let manipulator = Manipulator::new(&config.manipulation);
    let mut updated = Element::new(root.name());

    for element in root.elements() {
        let mut element = element.clone();
        let class_name = component_class(&element)
            .filter(|_| element.name() != "instance")
            .map(str::to_string);
        let Some(class_name) = class_name else {
            updated.add_element(element);
            continue;
        };

        let path = class_entry(&class_name);
        if !results.contains_key(&path) {
            let entry = entries
                .iter()
                .find(|e| e.name == path)
                .with_context(|| {
                    format!(
                        "component class {} is not in the bundle (no entry {})",
                        class_name, path
                    )
                })?;
            let result = match manipulator.manipulate(&entry.data) {
                Ok(manipulated) => Some(manipulated),
                Err(ManipulationError::AlreadyManipulated(_)) => {
                    warn!(class = %class_name, "class is already manipulated, keeping it");
                    report.skipped.push(class_name.clone());
                    None
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("cannot manipulate {}", class_name))
                }
            };
            results.insert(path.clone(), result);
        }

        if let Some(Some(manipulated)) = results.get(&path) {
            let missing = missing_fields(&element, &manipulated.fields);
            if !missing.is_empty() {
                bail!(
                    "component {} refers to field(s) {} that {} does not declare",
                    class_name,
                    missing.join(", "),
                    class_name
                );
            }
            element.add_element(manipulated.metadata.clone());
        }
        updated.add_element(element);
    }

    for entry in entries.iter_mut() {
        if let Some(Some(manipulated)) = results.get(&entry.name) {
            entry.data = manipulated.bytes.clone();
            report.manipulated.push(manipulated.class_name.clone());
            debug!(entry = %entry.name, "replaced class");
        }
    }

    let analysis = analyze(&entries, config);
    let generated = analysis.import_header(&updated.namespaces());
    report.imports = merge_import_header(manifest.get("Import-Package"), &generated);
    if !report.imports.is_empty() {
        manifest.set("Import-Package", report.imports.clone());
    }

    if manifest.get("Bundle-Activator").is_none() {
        if let Some(activator) = analysis.bundle_activator() {
            manifest.set("Bundle-Activator", activator);
            report.activator = Some(activator.to_string());
        }
    }

    let header = updated
        .elements()
        .iter()
        .map(Element::to_manifest_string)
        .collect::<Vec<_>>()
        .join(" ");
    manifest.set(COMPONENTS_HEADER, header);
    let created_by = match manifest.get("Created-By") {
        Some(previous) if !previous.contains(CREATED_BY) => {
            format!("{} & {}", previous, CREATED_BY)
        }
        Some(previous) => previous.to_string(),
        None => CREATED_BY.to_string(),
    };
    manifest.set("Created-By", created_by);

    let manifest_bytes = manifest.to_bytes();
    match entries.iter_mut().find(|e| e.name == MANIFEST_PATH) {
        Some(entry) => entry.data = manifest_bytes,
        None => entries.push(ArchiveEntry::file(MANIFEST_PATH, manifest_bytes)),
    }
    write_archive(output, &entries)?;

    info!(
        bundle = %output.display(),
        manipulated = report.manipulated.len(),
        "wrote bundle"
    );
    Ok(report)
}

/// Scan every class entry; entries that are not class files are skipped
fn analyze(entries: &[ArchiveEntry], config: &ManipulatorConfig) -> BundleAnalysis {
    let scanner = ClassScanner::new(&config.scan);
    let mut analysis = BundleAnalysis::with_config(&config.scan);
    for entry in entries.iter().filter(|e| e.is_class()) {
        match scanner.scan(&entry.name, &entry.data) {
            Ok(references) => analysis.add(&entry.name, &references),
            Err(e) => warn!(entry = %entry.name, "skipping entry: {}", e),
        }
    }
    analysis
}

pub fn execute(
    input: &Path,
    output: &Path,
    metadata: Option<&str>,
    config: &ManipulatorConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let report = pojoize(input, output, metadata, config)?;

    out.success("Bundle written: ");
    out.line(&output.display().to_string());
    out.line(&format!(
        "  {} component type(s), {} instance(s)",
        report.components, report.instances
    ));
    for class in &report.manipulated {
        out.info("  manipulated ");
        out.line(&class.replace('/', "."));
    }
    for class in &report.skipped {
        out.warning("  already manipulated ");
        out.line(class);
    }
    if let Some(activator) = &report.activator {
        out.info("  Bundle-Activator: ");
        out.line(activator);
    }
    if !report.imports.is_empty() {
        out.info("  Import-Package: ");
        out.line(&report.imports);
    }
    out.flush();
    Ok(())
}
