//! Backend dialects.
//!
//! This module provides the `Dialect` trait: one implementation per supported
//! package-manager family, each owning both its command templates and the
//! parser for its output. Call sites never match on a backend to build a
//! command; they ask `BackendKind::dialect()` for the implementation.
//!
//! # Contract
//!
//! - Command builders receive tokens that `command::synthesize` has already
//!   validated and must pass each one as a single argv element.
//! - `parse()` never fails. Lines it does not recognise are dropped, and an
//!   empty vector means "no matches".
//! - Every `Package` returned by `parse()` has a non-empty, whitespace-free
//!   name.

pub mod apt;
pub mod dnf;
pub mod pacman;

use crate::command::{CommandSpec, InstalledProbe};
use crate::types::{BackendKind, Package, ParseContext};

/// Command templates and output parser for one backend family.
pub trait Dialect: Sync {
    fn kind(&self) -> BackendKind;

    /// Search the backend's package catalog.
    fn search(&self, query: &str) -> CommandSpec;

    /// List every installed package.
    fn list_installed(&self) -> CommandSpec;

    /// Single-package installed probe.
    fn probe_installed(&self, name: &str) -> InstalledProbe;

    /// Dry-run removal, showing what would be removed.
    fn check_uninstall(&self, names: &[String]) -> CommandSpec;

    fn install(&self, names: &[String]) -> CommandSpec;

    fn uninstall(&self, names: &[String]) -> CommandSpec;

    /// Normalize raw backend output into packages.
    fn parse(&self, raw: &str, context: ParseContext) -> Vec<Package>;
}

impl BackendKind {
    /// The dialect implementation for this backend.
    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            Self::Apt => &apt::Apt,
            Self::Dnf => &dnf::Dnf,
            Self::Pacman => &pacman::Pacman,
        }
    }
}

/// Parse `raw` with the dialect of `backend`.
pub fn parse(backend: BackendKind, raw: &str, context: ParseContext) -> Vec<Package> {
    backend.dialect().parse(raw, context)
}

/// A name token is usable if it is non-empty and free of whitespace.
pub(crate) fn is_name_token(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_dialect_kind_matches_backend() {
        for kind in BackendKind::iter() {
            assert_eq!(kind.dialect().kind(), kind);
        }
    }

    #[test]
    fn test_empty_output_parses_to_nothing() {
        for kind in BackendKind::iter() {
            assert!(parse(kind, "", ParseContext::Search).is_empty());
            assert!(parse(kind, "\n\n", ParseContext::Installed).is_empty());
        }
    }

    #[test]
    fn test_name_token_rule() {
        assert!(is_name_token("vim"));
        assert!(!is_name_token(""));
        assert!(!is_name_token("two words"));
    }
}
