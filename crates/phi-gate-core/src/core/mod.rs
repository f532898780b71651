// crates/phi-gate-core/src/core/mod.rs
// ============================================================================
// Module: PHI Gate Core Data Model
// Description: Identifiers, time, records, and vocabularies for PHI Gate.
// Purpose: Re-export the canonical data model consumed by every other crate.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The core data model is pure: no I/O, no wall-clock reads, no network. The
//! submodules split along the trust boundary: hospital-zone records, the
//! tokenized projection, and the processing-zone vocabularies shared by
//! triage, tasks, decisions, and audit.

/// Append-only audit vocabulary and records.
pub mod audit;
/// Cooperative cancellation signals.
pub mod cancel;
/// Detection results, evidence grades, and medical decisions.
pub mod decision;
/// Uniform fault classification.
pub mod fault;
/// Canonical opaque identifiers.
pub mod identifiers;
/// Packaged inbound events.
pub mod input;
/// Hospital-zone records and tokenized projections.
pub mod patient;
/// PHI leak guard.
pub mod phi;
/// Session lifecycle model.
pub mod session;
/// Task model and retry arithmetic.
pub mod task;
/// Timestamps and the injectable clock.
pub mod time;
/// Triage vocabulary.
pub mod triage;
