// crates/phi-gate-server/src/auth.rs
// ============================================================================
// Module: Bearer Authentication
// Description: Constant-time bearer credential checking with role scoping.
// Purpose: Authenticate Tokenization API callers before any operation.
// Dependencies: phi-gate-config, phi-gate-core, phi-gate-tokenize, subtle
// ============================================================================

//! ## Overview
//! The Tokenization API is bearer-authenticated. Configured credentials map
//! onto [`Caller`] identities with explicit role sets; comparison against
//! the presented token is constant-time and every configured credential is
//! always checked so a match position cannot be inferred from timing.
//!
//! Security posture: authorization headers are untrusted input; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use phi_gate_config::BearerTokenConfig;
use phi_gate_core::ActorId;
use phi_gate_tokenize::Caller;
use phi_gate_tokenize::ServiceRole;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Authenticator
// ============================================================================

/// One configured credential.
struct Credential {
    /// Bearer token value.
    token: Vec<u8>,
    /// Caller identity granted on match.
    caller: Caller,
}

/// Bearer authenticator over the configured credential set.
///
/// # Invariants
/// - Token comparison is constant-time per credential, and all credentials
///   are examined on every attempt.
pub struct BearerAuthenticator {
    /// Configured credentials.
    credentials: Vec<Credential>,
}

impl BearerAuthenticator {
    /// Builds the authenticator from validated configuration entries.
    #[must_use]
    pub fn from_config(entries: &[BearerTokenConfig]) -> Self {
        let credentials = entries
            .iter()
            .map(|entry| Credential {
                token: entry.token.as_bytes().to_vec(),
                caller: Caller {
                    actor_id: ActorId::new(entry.actor.clone()),
                    roles: entry.roles.iter().filter_map(|role| parse_role(role)).collect(),
                },
            })
            .collect();
        Self {
            credentials,
        }
    }

    /// Authenticates an `Authorization` header value.
    ///
    /// Returns the matched caller, or `None` for missing, malformed, or
    /// unknown credentials.
    #[must_use]
    pub fn authenticate(&self, authorization: Option<&str>) -> Option<Caller> {
        let presented = authorization?.strip_prefix("Bearer ")?.trim().as_bytes();
        let mut matched: Option<&Caller> = None;
        for credential in &self.credentials {
            let equal: bool = credential.token.ct_eq(presented).into();
            if equal && matched.is_none() {
                matched = Some(&credential.caller);
            }
        }
        matched.cloned()
    }
}

/// Parses a configured role label.
fn parse_role(label: &str) -> Option<ServiceRole> {
    match label {
        "token_issuer" => Some(ServiceRole::TokenIssuer),
        "token_reader" => Some(ServiceRole::TokenReader),
        "phi_bridge" => Some(ServiceRole::PhiBridge),
        _ => None,
    }
}

/// Convenience constructor for a caller with explicit roles (used by
/// embedded deployments).
#[must_use]
pub fn caller_with_roles(actor: &str, roles: &[ServiceRole]) -> Caller {
    Caller {
        actor_id: ActorId::new(actor),
        roles: roles.iter().copied().collect::<BTreeSet<_>>(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
