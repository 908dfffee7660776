use std::fmt;

use crate::image::ImageState;

#[derive(Debug)]
pub enum HandoffError {
    /// Requested image size has a zero dimension. Contains (width, height).
    InvalidSize(u32, u32),

    /// A draw/present call arrived in a state that does not permit it.
    InvalidState {
        operation: &'static str,
        state: ImageState,
    },

    /// The device or compositor refused a required capability, such as
    /// the requested sharing flags or the keyed-mutex interface.
    Unsupported(String),

    /// A finite keyed-mutex acquire expired before the other side
    /// released the key.
    Timeout,

    /// The keyed mutex was abandoned by the device that last held it.
    AcquireAbandoned,

    ImportFailed(String),

    PresentFailed(String),

    /// The compositor dropped its completion signal without resolving it.
    PresentDropped,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffErrorClass {
    InvalidInput,
    Unsupported,
    Fatal,
}

impl HandoffError {
    pub fn class(&self) -> HandoffErrorClass {
        match self {
            Self::InvalidSize(_, _) | Self::InvalidState { .. } => HandoffErrorClass::InvalidInput,
            Self::Unsupported(_) => HandoffErrorClass::Unsupported,
            Self::Timeout
            | Self::AcquireAbandoned
            | Self::ImportFailed(_)
            | Self::PresentFailed(_)
            | Self::PresentDropped
            | Self::Platform(_) => HandoffErrorClass::Fatal,
        }
    }

    /// Whether the swapchain owning the image must be torn down. Nothing
    /// in the handoff protocol is retryable: an acquire that failed once
    /// offers no new information the second time.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), HandoffErrorClass::Fatal)
    }

    /// Create a string-based copy of this error suitable for sending
    /// across threads to a pending present. The `Platform` variant loses
    /// its inner `anyhow::Error` chain and becomes a formatted string.
    pub fn to_sendable(&self) -> Self {
        match self {
            Self::InvalidSize(w, h) => Self::InvalidSize(*w, *h),
            Self::InvalidState { operation, state } => Self::InvalidState {
                operation: *operation,
                state: *state,
            },
            Self::Unsupported(s) => Self::Unsupported(s.clone()),
            Self::Timeout => Self::Timeout,
            Self::AcquireAbandoned => Self::AcquireAbandoned,
            Self::ImportFailed(s) => Self::ImportFailed(s.clone()),
            Self::PresentFailed(s) => Self::PresentFailed(s.clone()),
            Self::PresentDropped => Self::PresentDropped,
            Self::Platform(inner) => Self::Platform(anyhow::anyhow!("{inner:#}")),
        }
    }
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(w, h) => write!(f, "shared image size must be non-zero, got {w}x{h}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while shared image is {state:?}")
            }
            Self::Unsupported(message) => write!(f, "unsupported by device or compositor: {message}"),
            Self::Timeout => write!(f, "failed to acquire keyed mutex within timeout"),
            Self::AcquireAbandoned => write!(f, "keyed mutex was abandoned by its previous owner"),
            Self::ImportFailed(message) => {
                write!(f, "compositor failed to import shared image: {message}")
            }
            Self::PresentFailed(message) => write!(f, "compositor present failed: {message}"),
            Self::PresentDropped => {
                write!(f, "compositor dropped the present without completing it")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for HandoffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for HandoffError {
    fn from(inner: anyhow::Error) -> Self {
        Self::Platform(inner)
    }
}

pub type HandoffResult<T> = Result<T, HandoffError>;
