use pyo3::exceptions::{PyMemoryError, PyRuntimeError, PyValueError};
use pyo3::PyErr;
use thiserror::Error;

/// Failure kinds reported by the radial profiling core.
///
/// Every operation fails fast: no partial numeric results are produced,
/// though output buffers may already have been zero-initialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("output arrays are too short: need {required} elements, got {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    /// A cache growth allocation failed. The affected cache is left empty and
    /// may be regrown on a later call.
    #[error("insufficient memory for {elements} working-array elements")]
    OutOfMemory { elements: usize },

    /// A radial index resolved outside the declared output range. This cannot
    /// happen while the index table honors its bounds; it signals a logic
    /// defect rather than a recoverable runtime condition.
    #[error("radial index {index} exceeds output range {limit} for radius {radius}")]
    InternalInconsistency {
        index: usize,
        limit: usize,
        radius: i64,
    },
}

impl From<ProfileError> for PyErr {
    fn from(err: ProfileError) -> Self {
        match &err {
            ProfileError::OutOfMemory { .. } => PyMemoryError::new_err(err.to_string()),
            ProfileError::InternalInconsistency { .. } => PyRuntimeError::new_err(err.to_string()),
            ProfileError::InvalidArgument(_) | ProfileError::BufferTooSmall { .. } => {
                PyValueError::new_err(err.to_string())
            }
        }
    }
}
