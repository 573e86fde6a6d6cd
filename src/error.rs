//! Error types for the OAM runtime
//!
//! Every reconciliation failure carries a stage tag (`render`, `apply`, `gc`,
//! `status`, ...) so an operator reading a condition message or a log line
//! can tell where in the pipeline the pass stopped.

use thiserror::Error;

/// Main error type for OAM runtime operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that was not mapped to a pipeline stage
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The object store has no object at the requested address
    #[error("not found: {0}")]
    NotFound(String),

    /// The object store rejected a write because of a concurrent change
    #[error("conflict: {0}")]
    Conflict(String),

    /// The workload spec could not be turned into resources
    #[error("render: cannot render workload: {0}")]
    Render(String),

    /// Server-side apply of a rendered resource failed
    #[error("apply: cannot apply the {kind} {name}: {message}")]
    Apply {
        /// Kind of the resource being applied
        kind: String,
        /// Name of the resource being applied
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Deleting an orphaned resource failed
    #[error("gc: cannot clean up stale {kind} {name}: {message}")]
    Gc {
        /// Kind of the orphan
        kind: String,
        /// Name of the orphan
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Writing the status subresource failed
    #[error("status: cannot apply status: {0}")]
    Status(String),

    /// The workload a trait points at could not be fetched
    #[error("locate workload: cannot find workload: {0}")]
    LocateWorkload(String),

    /// The workload's definition or its children could not be fetched
    #[error("locate resources: cannot find resources: {0}")]
    LocateResources(String),

    /// No scalable child was found for the workload
    #[error("locate deployment: cannot find deployment: {0}")]
    LocateDeployment(String),

    /// Patching a child's replica count failed
    #[error("scale: cannot scale the deployment {name}: {message}")]
    Scale {
        /// Name of the child being scaled
        name: String,
        /// Underlying failure
        message: String,
    },

    /// A trait references a workload uid that does not match the live object
    #[error("reference: workload uid mismatch: expected {expected}, found {actual}")]
    ReferenceMismatch {
        /// uid recorded in the trait's workload reference
        expected: String,
        /// uid of the live workload
        actual: String,
    },

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a render error with the given message
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create an apply error for the named resource
    pub fn apply(kind: impl Into<String>, name: impl Into<String>, msg: impl ToString) -> Self {
        Self::Apply {
            kind: kind.into(),
            name: name.into(),
            message: msg.to_string(),
        }
    }

    /// Create a garbage-collection error for the named orphan
    pub fn gc(kind: impl Into<String>, name: impl Into<String>, msg: impl ToString) -> Self {
        Self::Gc {
            kind: kind.into(),
            name: name.into(),
            message: msg.to_string(),
        }
    }

    /// Create a status-write error
    pub fn status(msg: impl ToString) -> Self {
        Self::Status(msg.to_string())
    }

    /// Create a scale error for the named child
    pub fn scale(name: impl Into<String>, msg: impl ToString) -> Self {
        Self::Scale {
            name: name.into(),
            message: msg.to_string(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl ToString) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Pipeline stage this error was raised in
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kubernetes",
            Self::NotFound(_) => "not found",
            Self::Conflict(_) => "conflict",
            Self::Render(_) => "render",
            Self::Apply { .. } => "apply",
            Self::Gc { .. } => "gc",
            Self::Status(_) => "status",
            Self::LocateWorkload(_) => "locate workload",
            Self::LocateResources(_) => "locate resources",
            Self::LocateDeployment(_) => "locate deployment",
            Self::Scale { .. } => "scale",
            Self::ReferenceMismatch { .. } => "reference",
            Self::Validation(_) => "validation",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether requeueing after a backoff can make progress.
    ///
    /// A stale workload uid on a trait only changes when someone edits the
    /// trait, so it waits for a spec change instead of looping.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ReferenceMismatch { .. } | Self::Validation(_) | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
