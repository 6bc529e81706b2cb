//! Reconcilers for the tracked resource kinds

/// Namespace reconciler: team label derivation and default roles
pub mod namespace;
/// Team reconciler: tiered cluster roles, bindings, and namespace ownership
pub mod team;
