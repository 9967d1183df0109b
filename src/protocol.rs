//! Request/response messages exchanged with the session.
//!
//! Every operation a caller can ask for is one `OperationRequest` variant, and
//! every answer is an `OperationResponse` that serializes to the flat
//! `{ "success": ..., ... }` shape front-ends consume.

use serde::Serialize;

use crate::credential::Credential;
use crate::error::{ErrorKind, PkgError};
use crate::session::{PackageListing, Session};
use crate::types::{BackendKind, Package, SearchField};

/// One operation against a session.
#[derive(Debug)]
pub enum OperationRequest {
    /// Report the backend, detecting it again when `refresh` is set
    Detect { refresh: bool },
    Search { query: String, field: SearchField },
    ListInstalled { filter: Option<String> },
    CheckInstalled { names: Vec<String> },
    CheckUninstall { names: Vec<String> },
    Install {
        names: Vec<String>,
        credential: Credential,
    },
    Uninstall {
        names: Vec<String>,
        credential: Credential,
    },
}

impl OperationRequest {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detect { .. } => "detect",
            Self::Search { .. } => "search",
            Self::ListInstalled { .. } => "list_installed",
            Self::CheckInstalled { .. } => "check_installed",
            Self::CheckUninstall { .. } => "check_uninstall",
            Self::Install { .. } => "install",
            Self::Uninstall { .. } => "uninstall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Packages {
        data: Vec<Package>,
        backend: BackendKind,
    },
    Backend {
        backend: BackendKind,
    },
    InstalledNames {
        #[serde(rename = "installedNames")]
        installed_names: Vec<String>,
    },
    Advisory {
        #[serde(rename = "advisoryText")]
        advisory_text: String,
    },
    Transcript {
        transcript: String,
    },
    Failure {
        error: String,
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

impl OperationResponse {
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            success: true,
            payload,
        }
    }

    /// A failure response; carries any output the failed process produced.
    pub fn failure(error: &PkgError) -> Self {
        let transcript = error
            .partial_output()
            .filter(|output| !output.is_empty())
            .map(|output| output.combined());
        Self {
            success: false,
            payload: ResponsePayload::Failure {
                error: error.to_string(),
                error_kind: error.kind(),
                transcript,
            },
        }
    }

    pub fn from_result(result: crate::error::Result<ResponsePayload>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(e) => Self::failure(&e),
        }
    }
}

impl From<PackageListing> for ResponsePayload {
    fn from(listing: PackageListing) -> Self {
        Self::Packages {
            data: listing.packages,
            backend: listing.backend,
        }
    }
}

impl Session {
    /// Run one request to completion and describe the outcome.
    pub fn handle(&self, request: OperationRequest) -> OperationResponse {
        let result = match request {
            OperationRequest::Detect { refresh } => {
                let backend = if refresh {
                    self.redetect()
                } else {
                    self.backend()
                };
                backend.map(|backend| ResponsePayload::Backend { backend })
            }
            OperationRequest::Search { query, field } => self
                .search_packages(&query, field)
                .map(ResponsePayload::from),
            OperationRequest::ListInstalled { filter: None } => {
                self.list_installed().map(ResponsePayload::from)
            }
            OperationRequest::ListInstalled {
                filter: Some(filter),
            } => self
                .list_installed_filtered(&filter)
                .map(ResponsePayload::from),
            OperationRequest::CheckInstalled { names } => self
                .check_installed(&names)
                .map(|installed_names| ResponsePayload::InstalledNames { installed_names }),
            OperationRequest::CheckUninstall { names } => self
                .check_uninstall(&names)
                .map(|advisory_text| ResponsePayload::Advisory { advisory_text }),
            OperationRequest::Install { names, credential } => self
                .install_packages(&names, credential)
                .map(|transcript| ResponsePayload::Transcript { transcript }),
            OperationRequest::Uninstall { names, credential } => self
                .uninstall_packages(&names, credential)
                .map(|transcript| ResponsePayload::Transcript { transcript }),
        };
        OperationResponse::from_result(result)
    }
}
