use buggy::Bug;
use enclave_sscp::SssError;

/// Shorthand for `Result`s that use [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// An error returned by the driver.
///
/// Each variant corresponds to exactly one status code of the
/// generic driver interface, see [`Error::code`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument was malformed, missing or oversized.
    ///
    /// It describes why the argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The request is well formed, but the algorithm, key type
    /// or location is not supported by the enclave.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// The output buffer is too small.
    #[error("output buffer too small")]
    BufferTooSmall,
    /// The hardware lock could not be acquired or released.
    #[error("unable to acquire or release the hardware lock")]
    ServiceFailure,
    /// The enclave reported a failure.
    #[error("hardware failure")]
    HardwareFailure,
    /// An enclave operation failed with no finer-grained cause.
    #[error("generic error")]
    GenericError,
    /// Authentication or signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// A multi-part operation was used in the wrong state.
    #[error("bad state")]
    BadState,
    /// An internal bug was discovered.
    #[error(transparent)]
    Bug(#[from] Bug),
}

impl Error {
    /// Returns the status code of the generic driver interface
    /// for this error.
    ///
    /// Success is always `0`.
    pub const fn code(&self) -> i32 {
        match self {
            Self::GenericError => -132,
            Self::NotSupported(_) => -134,
            Self::InvalidArgument(_) => -135,
            Self::BadState => -137,
            Self::BufferTooSmall => -138,
            Self::ServiceFailure => -144,
            Self::HardwareFailure => -147,
            Self::InvalidSignature => -149,
            Self::Bug(_) => -151,
        }
    }
}

/// Translates an enclave status into an [`Error`].
///
/// The enclave only distinguishes rejected arguments from
/// everything else.
pub const fn translate_status(err: SssError) -> Error {
    match err {
        SssError::InvalidArgument => Error::InvalidArgument("rejected by the enclave"),
        SssError::Fail | SssError::ResourceBusy => Error::HardwareFailure,
    }
}

/// Converts enclave results into driver results.
pub(crate) trait StatusExt<T> {
    /// Maps any failure through [`translate_status`].
    fn or_hw(self) -> Result<T>;
    /// Maps any failure to [`Error::GenericError`].
    fn or_generic(self) -> Result<T>;
    /// Maps any failure to [`Error::InvalidSignature`].
    fn or_invalid_signature(self) -> Result<T>;
}

impl<T> StatusExt<T> for Result<T, SssError> {
    fn or_hw(self) -> Result<T> {
        self.map_err(translate_status)
    }

    fn or_generic(self) -> Result<T> {
        self.map_err(|_| Error::GenericError)
    }

    fn or_invalid_signature(self) -> Result<T> {
        self.map_err(|_| Error::InvalidSignature)
    }
}

/// Returns the status code for `res`.
pub fn status_code<T>(res: &Result<T>) -> i32 {
    match res {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}
