use std::fmt;

use crate::element::CompareOp;

/// Failures raised by dictionary operations.
///
/// Misses (absent key on lookup or delete) are not errors; they are
/// reported as `Ok(None)` / `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    /// An ordering comparison was requested of a type that only supports
    /// equality.
    UnsupportedComparison { type_name: String, op: CompareOp },
    /// A hash was requested of a mutable container.
    Unhashable { type_name: String },
    /// A Rust value was passed where the dictionary stores a different
    /// element type.
    TypeMismatch { expected: String, found: String },
    /// A requested arena or index size does not fit in the address space.
    CapacityOverflow,
    /// The global allocator could not satisfy a growth request.
    AllocationFailed { size: usize, align: usize },
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictError::UnsupportedComparison { type_name, op } => {
                write!(
                    f,
                    "Ordered comparison {:?} not supported between objects of type {}",
                    op, type_name
                )
            }
            DictError::Unhashable { type_name } => write!(f, "{} is not hashable", type_name),
            DictError::TypeMismatch { expected, found } => {
                write!(f, "Expected element of type {}, got {}", expected, found)
            }
            DictError::CapacityOverflow => write!(f, "Dict capacity overflow"),
            DictError::AllocationFailed { size, align } => {
                write!(
                    f,
                    "Allocation of {} bytes (align {}) failed",
                    size, align
                )
            }
        }
    }
}

impl std::error::Error for DictError {}

pub type Result<T, E = DictError> = std::result::Result<T, E>;
