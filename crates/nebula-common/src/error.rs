//! Error types for the Nebula operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! reconcilers never retry internally; `is_retryable` tells the delivery
//! layer whether re-invoking later can help.

use thiserror::Error;

/// Main error type for Nebula operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An existing dependent object diverges from its template in an
    /// immutable field (a binding's role reference). The dependent has been
    /// deleted and will be re-created on the next reconcile pass.
    #[error("conflict on {resource}: {message}")]
    Conflict {
        /// Name of the conflicting object
        resource: String,
        /// Description of the divergence
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "namespace-reconciler")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a conflict error for a dependent object
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts are always retryable: the conflicting dependent has been
    /// deleted and the next pass re-creates it. Kubernetes errors depend on
    /// the status code; 4xx errors require an external fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Conflict { .. } => true,
            Error::Internal { .. } => true,
        }
    }
}
