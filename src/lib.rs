//! pkgdeck Library
//!
//! A single search/list/check/install/uninstall contract over apt, dnf and
//! pacman. Commands are synthesized per backend, run without a shell under
//! time and output limits, and privileged commands receive the administrator
//! password on stdin only.

pub mod backend;
pub mod cli;
pub mod command;
pub mod command_executor;
pub mod config;
pub mod credential;
pub mod dialects;
pub mod error;
pub mod executor;
pub mod process_guard;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use backend::{ExecutableProbe, PathProbe, StaticProbe, detect};
pub use command::{CommandSpec, ExitPolicy, InstalledProbe, Operation, Plan, ProbeHit, synthesize};
pub use config::{ElevationConfig, SessionConfig};
pub use credential::Credential;
pub use dialects::{Dialect, parse};
pub use error::{CapturedOutput, ErrorKind, ExecutionError, PkgError};
pub use executor::{ExecutorLimits, PrivilegedExecutor, ProcessOutput, Runner};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use protocol::{OperationRequest, OperationResponse, ResponsePayload};
pub use reconcile::reconcile;
pub use session::{PackageListing, Session};
pub use types::{BackendKind, Package, ParseContext, SearchField};
pub use validation::{is_safe_token, validate_names, validate_token};
