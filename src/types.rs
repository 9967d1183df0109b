//! Core data model shared by every backend
//!
//! Backend identity and parse context are proper enums rather than strings so
//! a dialect mismatch is a compile error, not a runtime surprise.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// One of the three supported native package-manager families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Debian-style (apt-get, apt-cache, dpkg)
    Apt,
    /// RedHat-style (dnf)
    Dnf,
    /// Arch-style (pacman)
    Pacman,
}

impl BackendKind {
    /// Detection priority order.
    pub const PRIORITY: [BackendKind; 3] = [Self::Apt, Self::Dnf, Self::Pacman];

    /// The executable whose presence identifies this family.
    pub fn primary_executable(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
        }
    }
}

/// Which kind of listing a chunk of backend output came from.
///
/// Every backend prints structurally different text for a search than for its
/// installed-package listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    Search,
    Installed,
}

/// A normalized package record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Backend's canonical identifier, never empty, never whitespace
    pub name: String,
    /// Free text, filled in search context only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Free text, filled in installed context only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Set by reconciliation; only as fresh as the last reconcile call
    #[serde(default)]
    pub installed: bool,
}

impl Package {
    pub fn with_description(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }
}

/// Which field a search query must match after the backend has answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SearchField {
    /// Keep whatever the backend returned
    #[default]
    All,
    Name,
    Description,
}

impl SearchField {
    /// Case-insensitive match of `query` against the selected field.
    pub fn matches(&self, package: &Package, query: &str) -> bool {
        let query = query.to_lowercase();
        match self {
            Self::All => true,
            Self::Name => package.name.to_lowercase().contains(&query),
            Self::Description => package.description.to_lowercase().contains(&query),
        }
    }
}
