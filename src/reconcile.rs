//! Search-result reconciliation against the installed set.

use std::collections::HashSet;

use crate::types::Package;

/// Set every package's `installed` flag by membership in `installed`.
///
/// Packages whose name is absent from the lookup are marked not installed,
/// so an empty lookup clears every flag.
pub fn reconcile(mut packages: Vec<Package>, installed: &HashSet<String>) -> Vec<Package> {
    for package in &mut packages {
        package.installed = installed.contains(&package.name);
    }
    packages
}

/// Names in first-seen order with duplicates folded, so each name is probed
/// once per pass.
pub fn unique_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}
