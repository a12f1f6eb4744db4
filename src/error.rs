use thiserror::Error;

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        $crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Most rows of the error taxonomy are *recoverable*: the operation that detects them logs the
/// event, skips or degrades the offending step, and continues. Those conditions still surface
/// here so that callers (and tests) can observe them. Only [`Error::Internal`] indicates a broken
/// invariant that the analysis cannot recover from.
///
/// # Error Categories
///
/// ## Type System Errors
/// - [`Error::TypeWeave`] - A data-interval insertion would span two existing entries
/// - [`Error::TypeConflict`] - A meet degenerated to a union where a scalar was required
///
/// ## Analysis Errors
/// - [`Error::InfeasibleProof`] - Preservation proving exceeded its recursion budget
/// - [`Error::FixedPointNotReached`] - The type analyzer hit its iteration cap
/// - [`Error::GraphError`] - Control-flow or call-graph structure error
///
/// ## Invariant Violations
/// - [`Error::Internal`] - An internal invariant was violated; aborts the analysis
#[derive(Error, Debug)]
pub enum Error {
    /// An insertion into a data-interval map would overlap two existing entries without
    /// containing either ("weaving").
    ///
    /// The insertion is dropped and the map is left unchanged. The conflicting addresses are
    /// reported for diagnosis.
    #[error("type weave: new item at {addr:#x} ({new_ty}) weaves with {name} at {existing:#x} ({existing_ty})")]
    TypeWeave {
        /// Address of the rejected insertion
        addr: u64,
        /// C-style description of the rejected type
        new_ty: String,
        /// Name of the existing entry it weaves with
        name: String,
        /// Address of the existing entry
        existing: u64,
        /// C-style description of the existing entry's type
        existing_ty: String,
    },

    /// A meet was forced to construct a union where the context structurally required a
    /// scalar type.
    ///
    /// The union is constructed anyway; emitted code may degrade but remains well formed.
    #[error("type conflict at {addr:#x}: {lhs} is not compatible with {rhs}")]
    TypeConflict {
        /// Address associated with the conflicting item (0 when not address-related)
        addr: u64,
        /// C-style description of the left operand
        lhs: String,
        /// C-style description of the right operand
        rhs: String,
    },

    /// Preservation proving recursed past its iteration cap.
    ///
    /// The proof is treated as failed (the location is assumed not preserved), which is always
    /// safe, merely pessimistic.
    #[error("preservation proof for {query} exceeded the recursion budget")]
    InfeasibleProof {
        /// Printed form of the equation being proved
        query: String,
    },

    /// The data-flow type analyzer reached its round-robin iteration cap without converging.
    ///
    /// Analysis proceeds with the best typing found so far.
    #[error("type analysis of {proc} did not reach a fixed point after {iterations} iterations")]
    FixedPointNotReached {
        /// Name of the procedure being analyzed
        proc: String,
        /// The iteration cap that was hit
        iterations: u32,
    },

    /// A structural error in the control-flow graph or call graph.
    ///
    /// Examples include a block edge to a non-existent block, or a procedure with no entry
    /// block when one is required.
    #[error("Graph error: {0}")]
    GraphError(String),

    /// An internal invariant was violated (e.g. a statement was not found in its owning
    /// block).
    ///
    /// This is the only fatal row of the taxonomy: callers should abort the analysis of the
    /// current program.
    #[error("Internal - {file}:{line}: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },
}

pub(crate) use internal_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_macro() {
        let err = internal_error!("statement {} not in block", 42);
        match err {
            Error::Internal {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "statement 42 not in block");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            _ => panic!("expected Internal"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::FixedPointNotReached {
            proc: "main".to_string(),
            iterations: 20,
        };
        let msg = format!("{err}");
        assert!(msg.contains("main"));
        assert!(msg.contains("20"));
    }
}
