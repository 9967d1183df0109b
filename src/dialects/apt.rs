//! Debian-style backend: apt-get, apt-cache and dpkg.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{Dialect, is_name_token};
use crate::command::{CommandSpec, InstalledProbe, ProbeHit};
use crate::types::{BackendKind, Package, ParseContext};

/// Marker apt prints after installed entries (`[installed]`,
/// `[installed,automatic]`, `[installed,local]`, ...)
const INSTALLED_MARKER: &str = "[installed";

/// Numeric-looking version text: digits, dots, dashes and colons.
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[\d.\-:]*\d+|\d").expect("static regex is valid"));

#[derive(Debug, Clone, Copy, Default)]
pub struct Apt;

impl Dialect for Apt {
    fn kind(&self) -> BackendKind {
        BackendKind::Apt
    }

    fn search(&self, query: &str) -> CommandSpec {
        CommandSpec::new("apt-cache").args(["search", query]).tolerant()
    }

    fn list_installed(&self) -> CommandSpec {
        CommandSpec::new("apt").args(["list", "--installed"])
    }

    fn probe_installed(&self, name: &str) -> InstalledProbe {
        InstalledProbe {
            package: name.to_string(),
            spec: CommandSpec::new("dpkg").args(["-l", name]),
            hit: ProbeHit::RowPrefix("ii"),
        }
    }

    fn check_uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("apt-get")
            .args(["--simulate", "remove"])
            .args(names.iter().cloned())
            .tolerant()
    }

    fn install(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("apt-get")
            .args(["install", "-y"])
            .args(names.iter().cloned())
            .privileged()
    }

    fn uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("apt-get")
            .args(["remove", "-y"])
            .args(names.iter().cloned())
            .privileged()
    }

    fn parse(&self, raw: &str, context: ParseContext) -> Vec<Package> {
        match context {
            ParseContext::Search => parse_search(raw),
            ParseContext::Installed => parse_installed(raw),
        }
    }
}

/// `apt-cache search` prints `name - description`, one per line.
fn parse_search(raw: &str) -> Vec<Package> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = line.split_once(" - ").and_then(|(name, description)| {
                let name = name.trim();
                is_name_token(name).then(|| Package::with_description(name, description.trim()))
            });
            if parsed.is_none() {
                debug!("apt search: skipping line {:?}", line);
            }
            parsed
        })
        .collect()
}

/// `apt list --installed` prints `name/suite,now version arch [installed,...]`
/// after a `Listing...` banner.
fn parse_installed(raw: &str) -> Vec<Package> {
    raw.lines()
        .filter(|line| line.contains(INSTALLED_MARKER))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name_suite = fields.next()?;
            let name = name_suite.split('/').next().unwrap_or_default();
            if !is_name_token(name) {
                debug!("apt installed: skipping line {:?}", line);
                return None;
            }
            let version = fields
                .next()
                .and_then(|field| VERSION_RE.find(field))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some(Package::with_version(name, version))
        })
        .collect()
}
