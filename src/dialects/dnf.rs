//! RedHat-style backend: dnf.
//!
//! dnf output is whitespace-separated columns with `name.arch` in front, mixed
//! with metadata banners ("Last metadata expiration check: ...") and section
//! headers ("Installed Packages", "=== Name Matched: vim ==="). A line only
//! counts as a package row when its first token carries a known architecture
//! suffix, or in search output when it uses the `name : summary` form.

use tracing::debug;

use super::{Dialect, is_name_token};
use crate::command::{CommandSpec, InstalledProbe, ProbeHit};
use crate::types::{BackendKind, Package, ParseContext};

/// Architecture suffixes dnf appends to package names.
const KNOWN_ARCHES: &[&str] = &[
    "x86_64", "noarch", "i686", "i386", "aarch64", "armv7hl", "ppc64le", "s390x", "riscv64",
    "src",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Dnf;

impl Dialect for Dnf {
    fn kind(&self) -> BackendKind {
        BackendKind::Dnf
    }

    fn search(&self, query: &str) -> CommandSpec {
        CommandSpec::new("dnf").args(["search", query]).tolerant()
    }

    fn list_installed(&self) -> CommandSpec {
        CommandSpec::new("dnf").args(["list", "installed"])
    }

    fn probe_installed(&self, name: &str) -> InstalledProbe {
        InstalledProbe {
            package: name.to_string(),
            spec: CommandSpec::new("dnf").args(["list", "installed", name]),
            hit: ProbeHit::ExitSuccess,
        }
    }

    fn check_uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["remove", "--assumeno"])
            .args(names.iter().cloned())
            .tolerant()
    }

    fn install(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["install", "-y"])
            .args(names.iter().cloned())
            .privileged()
    }

    fn uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["remove", "-y"])
            .args(names.iter().cloned())
            .privileged()
    }

    fn parse(&self, raw: &str, context: ParseContext) -> Vec<Package> {
        let mut lines = raw.lines().filter(|line| !line.trim().is_empty()).peekable();

        // Leading status header ("Installed Packages", metadata banner).
        if lines.peek().is_some_and(|first| is_status_header(first)) {
            lines.next();
        }

        lines
            .filter_map(|line| {
                let parsed = match context {
                    ParseContext::Search => parse_search_line(line),
                    ParseContext::Installed => parse_installed_line(line),
                };
                if parsed.is_none() {
                    debug!("dnf {:?}: skipping line {:?}", context, line);
                }
                parsed
            })
            .collect()
    }
}

fn is_status_header(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("Installed Packages")
        || line.starts_with("Last metadata expiration check")
        || line.starts_with("Updating and loading repositories")
}

/// Split `name.arch` into the bare name, if the suffix is a known architecture.
fn strip_arch(token: &str) -> Option<&str> {
    let (name, arch) = token.rsplit_once('.')?;
    KNOWN_ARCHES.contains(&arch).then_some(name)
}

fn parse_search_line(line: &str) -> Option<Package> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();

    let name = match strip_arch(first) {
        Some(name) => name,
        None if rest.first() == Some(&":") => first,
        None => return None,
    };
    if !is_name_token(name) {
        return None;
    }

    let description = match rest.split_first() {
        Some((&":", summary)) => summary.join(" "),
        _ => rest.join(" "),
    };
    Some(Package::with_description(name, description))
}

fn parse_installed_line(line: &str) -> Option<Package> {
    let mut tokens = line.split_whitespace();
    let name = strip_arch(tokens.next()?)?;
    if !is_name_token(name) {
        return None;
    }
    let version = tokens.next().unwrap_or_default();
    Some(Package::with_version(name, version))
}
