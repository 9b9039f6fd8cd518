//! Bundle-wide package analysis
//!
//! Collects the [`ReferenceSet`] of every class in a bundle and derives the
//! `Import-Package` and `Bundle-Activator` headers from them.

use crate::config::ScanConfig;
use crate::scanner::{package_of, ReferenceSet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Package of the default (unnamed) package in scan results
pub const DEFAULT_PACKAGE: &str = ".";

/// Aggregated references of all classes in a bundle
#[derive(Debug, Clone, Serialize)]
pub struct BundleAnalysis {
    contained: BTreeSet<String>,
    referred: BTreeSet<String>,
    uses: BTreeMap<String, BTreeSet<String>>,
    activators: Vec<String>,
    /// Package of the activator marker type, unless excluded
    #[serde(skip)]
    marker_package: Option<String>,
}

impl Default for BundleAnalysis {
    fn default() -> Self {
        Self::with_config(&ScanConfig::default())
    }
}

impl BundleAnalysis {
    /// Create an empty analysis with the default scan settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty analysis for classes scanned with `config`
    ///
    /// Activator classes refer to the marker's package even though the
    /// scanner reports the marker separately from other references.
    pub fn with_config(config: &ScanConfig) -> Self {
        let marker_package = Some(package_of(&config.activator_type))
            .filter(|package| package != DEFAULT_PACKAGE && !config.is_excluded(package));
        Self {
            contained: BTreeSet::new(),
            referred: BTreeSet::new(),
            uses: BTreeMap::new(),
            activators: Vec::new(),
            marker_package,
        }
    }

    /// Record the references of the class at `path`
    pub fn add(&mut self, path: &str, references: &ReferenceSet) {
        let package = package_of(path);
        let marker = references
            .activator()
            .and(self.marker_package.clone());
        for referred in references.packages().iter().cloned().chain(marker) {
            if referred != package {
                self.uses
                    .entry(package.clone())
                    .or_default()
                    .insert(referred.clone());
            }
            self.referred.insert(referred);
        }
        if let Some(activator) = references.activator() {
            self.activators.push(activator.to_string());
        }
        self.contained.insert(package);
    }

    /// Packages holding at least one class of the bundle
    pub fn contained_packages(&self) -> &BTreeSet<String> {
        &self.contained
    }

    /// Every package referenced by a class of the bundle
    pub fn referred_packages(&self) -> &BTreeSet<String> {
        &self.referred
    }

    /// Packages referenced from classes of `package`
    pub fn uses(&self, package: &str) -> Option<&BTreeSet<String>> {
        self.uses.get(package)
    }

    /// Classes implementing the activator marker, in the order added
    pub fn activator_candidates(&self) -> &[String] {
        &self.activators
    }

    /// Referred packages the bundle does not contain itself
    pub fn imported_packages(&self) -> impl Iterator<Item = &str> + '_ {
        self.referred
            .iter()
            .filter(|p| *p != DEFAULT_PACKAGE && !self.contained.contains(*p))
            .map(String::as_str)
    }

    /// The bundle activator, when exactly one class implements the marker
    pub fn bundle_activator(&self) -> Option<&str> {
        match self.activators.as_slice() {
            [] => None,
            [only] => Some(only),
            several => {
                warn!(
                    candidates = ?several,
                    "several activator classes found, no Bundle-Activator set"
                );
                None
            }
        }
    }

    /// `Import-Package` value: imported packages plus the handler package of
    /// every metadata namespace, sorted and without duplicates
    pub fn import_header<S: AsRef<str>>(&self, namespaces: &[S]) -> String {
        let mut packages: BTreeSet<&str> = self.imported_packages().collect();
        packages.extend(namespaces.iter().filter_map(|ns| handler_package(ns.as_ref())));
        packages.into_iter().collect::<Vec<_>>().join(",")
    }
}

/// Package providing the handler of a namespace: the namespace up to its
/// last `.`, `None` when it has no `.`
pub fn handler_package(namespace: &str) -> Option<&str> {
    namespace
        .rsplit_once('.')
        .map(|(package, _)| package)
        .filter(|package| !package.is_empty())
}

/// Merge generated packages into an existing `Import-Package` value
///
/// Existing clauses are kept verbatim (with their attributes); packages they
/// already name are not added again.
pub fn merge_import_header(existing: Option<&str>, generated: &str) -> String {
    let mut clauses: Vec<String> = existing
        .map(split_clauses)
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let declared: BTreeSet<String> = clauses
        .iter()
        .flat_map(|clause| clause_names(clause))
        .collect();

    for package in generated.split(',').map(str::trim) {
        if !package.is_empty() && !declared.contains(package) {
            clauses.push(package.to_string());
        }
    }
    clauses.join(",")
}

/// Split a header on top-level commas (commas inside quotes are kept)
fn split_clauses(header: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                clauses.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    clauses.push(&header[start..]);
    clauses
}

/// Package names of one clause: the leading `;`-separated parts that are not
/// attributes or directives
fn clause_names(clause: &str) -> Vec<String> {
    clause
        .split(';')
        .map(str::trim)
        .take_while(|part| !part.contains('='))
        .map(str::to_string)
        .collect()
}
