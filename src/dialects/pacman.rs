//! Arch-style backend: pacman.

use tracing::debug;

use super::{Dialect, is_name_token};
use crate::command::{CommandSpec, InstalledProbe, ProbeHit};
use crate::types::{BackendKind, Package, ParseContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct Pacman;

impl Dialect for Pacman {
    fn kind(&self) -> BackendKind {
        BackendKind::Pacman
    }

    fn search(&self, query: &str) -> CommandSpec {
        // pacman exits 1 when nothing matches
        CommandSpec::new("pacman").args(["-Ss", query]).tolerant()
    }

    fn list_installed(&self) -> CommandSpec {
        CommandSpec::new("pacman").arg("-Q")
    }

    fn probe_installed(&self, name: &str) -> InstalledProbe {
        InstalledProbe {
            package: name.to_string(),
            spec: CommandSpec::new("pacman").args(["-Q", name]),
            hit: ProbeHit::ExitSuccess,
        }
    }

    fn check_uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-R", "--print"])
            .args(names.iter().cloned())
            .tolerant()
    }

    fn install(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-S", "--noconfirm"])
            .args(names.iter().cloned())
            .privileged()
    }

    fn uninstall(&self, names: &[String]) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-R", "--noconfirm"])
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

/// `pacman -Ss` prints two-line records:
///
/// ```text
/// extra/htop 3.2.2-1 [installed]
///     Interactive process viewer
/// ```
///
/// The description line is indented. A header followed directly by another
/// header gets an empty description; the second header is still parsed.
fn parse_search(raw: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut lines = raw.lines().peekable();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        let Some(name) = record_name(line) else {
            debug!("pacman search: skipping line {:?}", line);
            continue;
        };

        // Only consume the next line if it is an indented description
        let description = match lines.peek() {
            Some(next) if next.starts_with(char::is_whitespace) && !next.trim().is_empty() => {
                let desc = next.trim().to_string();
                lines.next();
                desc
            }
            _ => String::new(),
        };

        packages.push(Package::with_description(name, description));
    }

    packages
}

/// Name out of a `repo/name version ...` header line.
fn record_name(line: &str) -> Option<&str> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let repo_package = line.split_whitespace().next()?;
    let (_repo, name) = repo_package.split_once('/')?;
    is_name_token(name).then_some(name)
}

/// `pacman -Q` prints `name version`, one package per line.
fn parse_installed(raw: &str) -> Vec<Package> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(name), Some(version)) if is_name_token(name) => {
                    Some(Package::with_version(name, version))
                }
                _ => {
                    if !line.trim().is_empty() {
                        debug!("pacman installed: skipping line {:?}", line);
                    }
                    None
                }
            }
        })
        .collect()
}
