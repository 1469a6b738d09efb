use miette::Diagnostic;

/// Crate-level error taxonomy.
///
/// Numerical failures inside worker threads are converted to sentinel values
/// at the failure site and classified at the join point, so no variant of
/// this enum ever crosses a thread boundary as a panic.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum SolverError {
    /// A parameter was outside its domain; carries the offending field
    #[error("invalid input for `{field}`: {message}")]
    InputInvalid {
        /// Input-record field name
        field: &'static str,
        /// Why the value was rejected
        message: String,
    },
    /// The chemical-potential normalization does not change sign on the
    /// supplied bracket
    #[error("the chemical potential is not bracketed by [{lo}, {hi}]")]
    ChempotBracketFailed {
        /// Lower bracket bound
        lo: f64,
        /// Upper bracket bound
        hi: f64,
    },
    /// A bracketed root solver was handed a sign-definite interval
    #[error(transparent)]
    RootNotBracketed(#[from] jellium_numerics::RootError),
    /// An inner quadrature exhausted its subdivision budget
    #[error(transparent)]
    QuadratureDiverged(#[from] jellium_numerics::QuadratureError),
    /// A non-finite value surfaced at a convergence check
    #[error("a non-finite value was encountered in {0}")]
    NanEncountered(&'static str),
    /// Restart or kernel-cache data does not match the current input
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),
    /// The iteration budget was exhausted with the residual above threshold;
    /// partial results are still written
    #[error("not converged after {iterations} iterations, residual {residual:.5e}")]
    NotConverged {
        /// Iterations consumed
        iterations: usize,
        /// Final residual
        residual: f64,
    },
    /// Interpolator construction failed
    #[error(transparent)]
    Interpolation(#[from] jellium_numerics::InterpolationError),
    /// Grid construction failed
    #[error(transparent)]
    Grid(#[from] jellium_mesher::GridError),
    /// Underlying file-system failure
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence-layer mismatches between a file on disk and the current input
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum CacheError {
    /// A header field disagrees with the input beyond the binary round-trip
    /// tolerance
    #[error("cached {quantity} is incompatible with the input: {input} (input) vs {file} (file)")]
    Incompatible {
        /// Which header quantity disagrees
        quantity: &'static str,
        /// Value derived from the input record
        input: f64,
        /// Value read from the file
        file: f64,
    },
    /// The file ended before every expected item was read, or extends past
    /// the expected end
    #[error("cached data is truncated or oversized: expected {expected} items, read {read}")]
    Truncated {
        /// Items the layout promises
        expected: usize,
        /// Items actually read
        read: usize,
    },
}
