// crates/phi-gate-tokenize/src/alias.rs
// ============================================================================
// Module: Alias Vocabulary
// Description: Deterministic, salted selection of non-identifying aliases.
// Purpose: Give every token a human-friendly handle that names no human.
// Dependencies: phi-gate-core, sha2
// ============================================================================

//! ## Overview
//! Aliases pair a color word with a callsign word ("Amber Falcon"). Both
//! vocabularies are closed and contain no natural-person given names, so an
//! alias can never collide with a real name in the hospital domain. The
//! selection is deterministic per `(deployment salt, token_id)`: the same
//! token always renders the same alias, while different deployments shuffle
//! differently. Aliases are display-only and intentionally non-unique; the
//! token identifier is the only linkage key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Vocabulary
// ============================================================================

/// Color words, first alias component.
const COLORS: [&str; 24] = [
    "Amber", "Azure", "Bronze", "Cedar", "Cobalt", "Copper", "Coral", "Crimson", "Ember", "Fern",
    "Flint", "Indigo", "Ivory", "Jade", "Maroon", "Obsidian", "Ochre", "Onyx", "Saffron", "Sage",
    "Scarlet", "Slate", "Umber", "Violet",
];

/// Callsign words, second alias component.
const CALLSIGNS: [&str; 24] = [
    "Anchor", "Badger", "Beacon", "Comet", "Condor", "Falcon", "Gale", "Glacier", "Harbor",
    "Heron", "Kestrel", "Lantern", "Meridian", "Osprey", "Pelican", "Pylon", "Quarry", "Raven",
    "Sparrow", "Summit", "Tides", "Torrent", "Vector", "Zephyr",
];

// ============================================================================
// SECTION: Selection
// ============================================================================

/// Selects the deterministic alias for a token under a deployment salt.
#[must_use]
pub fn select_alias(salt: &str, token_id: &TokenId) -> TokenAlias {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"/");
    hasher.update(token_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let color = COLORS[usize::from(digest[0]) % COLORS.len()];
    let callsign = CALLSIGNS[usize::from(digest[1]) % CALLSIGNS.len()];
    TokenAlias::new(format!("{color} {callsign}"))
}
