//! Administrator password handling
//!
//! The `Credential` wrapper keeps the secret out of logs and debug output.
//! Every buffer holding it is [`Zeroizing`], so it is cleared on drop. It is
//! only ever written to the stdin of the elevation program; it never reaches
//! argv, the environment, or a `CommandSpec`.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{PkgError, Result};

/// Replacement text for a credential found in captured output.
pub const REDACTED: &str = "[REDACTED]";

/// An opaque, non-empty secret held for one privileged invocation.
pub struct Credential {
    secret: Zeroizing<Vec<u8>>,
}

impl Credential {
    /// Wrap a password. Empty passwords are rejected.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = Zeroizing::new(secret.into().into_bytes());
        if secret.is_empty() {
            return Err(PkgError::invalid_input("credential cannot be empty"));
        }
        Ok(Self { secret })
    }

    /// Bytes to stream into the elevation prompt, newline-terminated.
    pub(crate) fn stdin_payload(&self) -> Zeroizing<Vec<u8>> {
        let mut payload = Zeroizing::new(Vec::with_capacity(self.secret.len() + 1));
        payload.extend_from_slice(&self.secret);
        payload.push(b'\n');
        payload
    }

    /// Replace every occurrence of the secret in `text`.
    pub(crate) fn redact(&self, text: String) -> String {
        match std::str::from_utf8(&self.secret) {
            Ok(secret) if text.contains(secret) => text.replace(secret, REDACTED),
            _ => text,
        }
    }

    pub fn len(&self) -> usize {
        self.secret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(")?;
        f.write_str(REDACTED)?;
        f.write_str(")")
    }
}
