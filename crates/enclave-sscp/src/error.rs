/// A status reported by the enclave.
///
/// The enclave is deliberately coarse about failures: most
/// problems are reported as [`SssError::Fail`] with no further
/// detail.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SssError {
    /// The command failed.
    #[error("enclave command failed")]
    Fail,
    /// The enclave rejected an argument.
    #[error("enclave rejected an argument")]
    InvalidArgument,
    /// The enclave is busy.
    #[error("enclave resource busy")]
    ResourceBusy,
}

/// Shorthand for `Result`s that use [`SssError`].
pub type SssResult<T> = Result<T, SssError>;
