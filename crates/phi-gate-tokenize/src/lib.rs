// crates/phi-gate-tokenize/src/lib.rs
// ============================================================================
// Module: PHI Gate Tokenization
// Description: Token issuance, resolution, revocation, and bridge lookup.
// Purpose: Map hospital identities to opaque aliases across two stores.
// Dependencies: phi-gate-core, rand, sha2, thiserror, tracing
// ============================================================================

//! ## Overview
//! This crate implements the PHI Tokenization Bridge: the only component in
//! the system that composes the Hospital Store with the Processing Store.
//! Everything downstream of it sees token identifiers and coarse projections
//! only. See [`service::TokenizationService`] for the operation contract and
//! [`alias`] for alias selection.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Deterministic alias vocabulary.
pub mod alias;
/// Tokenization Service implementation.
pub mod service;

pub use alias::select_alias;
pub use service::Caller;
pub use service::ServiceRole;
pub use service::TokenGrant;
pub use service::TokenProjection;
pub use service::TokenizationService;
pub use service::TokenizeError;
pub use service::generate_token_id;
