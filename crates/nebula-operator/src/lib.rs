//! Nebula tenancy operator
//!
//! Watches Namespaces and Teams and converges the cluster toward the derived
//! set of tiered RBAC objects. Each reconciler is purpose-built for its own
//! resource kind; correctness under repeated and concurrent delivery comes
//! from idempotence, not from locking.

#![deny(missing_docs)]

/// Reconcilers for the tracked resource kinds
pub mod controller;
/// Controller future construction for the process entrypoint
pub mod controller_runner;
/// Desired-versus-observed classification of RBAC objects
pub mod diff;
/// Finalizer token bookkeeping on object metadata
pub mod finalizer;
