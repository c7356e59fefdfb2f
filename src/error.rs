use alloc::{borrow::Cow, boxed::Box};
use core::fmt::{Debug, Display};

/// Error types used throughout the `flash_patcher` library.
///
/// Every engine operation fails fast with one of these. A failed operation
/// leaves the region it touched unchanged, but earlier operations of the same
/// session are not rolled back, so the caller should discard the session.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading an image source.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An address/size pair runs past the current length of a region.
    ///
    /// Raised by:
    /// * reads and writes past the end of the buffer
    /// * truncating more bytes than the region holds
    OutOfBounds {
        /// A descriptive message about the access.
        msg: Cow<'static, str>,
    },

    /// An operation would place data past the active capacity tier of a region.
    CapacityExceeded {
        /// A descriptive message about the capacity violation.
        msg: Cow<'static, str>,
    },

    /// An arithmetic result does not fit the destination field.
    ///
    /// Raised by:
    /// * `add` results that overflow the field width
    /// * literals wider than the requested size
    /// * pointer adjustments leaving the 32-bit address space
    ValueOutOfRange {
        /// A descriptive message about the value.
        msg: Cow<'static, str>,
    },

    /// The assembler rejected an instruction, a symbol could not be resolved,
    /// or the encoding does not fit its slot.
    Encoding {
        /// A descriptive message about the encoding error.
        msg: Cow<'static, str>,
    },

    /// The codec rejected a block.
    Compression {
        /// A descriptive message about the compression error.
        msg: Cow<'static, str>,
    },

    /// An operation was issued in a state it cannot be applied to, such as
    /// after the external region has been shortened.
    OrderViolation {
        /// A descriptive message about the ordering error.
        msg: Cow<'static, str>,
    },

    /// A step of a [`PatchPlan`](crate::PatchPlan) failed.
    Plan {
        /// Position of the failing operation in the plan.
        index: usize,
        /// The underlying error.
        source: Box<Error>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::OutOfBounds { msg } => write!(f, "Out of bounds: {msg}"),
            Error::CapacityExceeded { msg } => write!(f, "Capacity exceeded: {msg}"),
            Error::ValueOutOfRange { msg } => write!(f, "Value out of range: {msg}"),
            Error::Encoding { msg } => write!(f, "Encoding error: {msg}"),
            Error::Compression { msg } => write!(f, "Compression error: {msg}"),
            Error::OrderViolation { msg } => write!(f, "Order violation: {msg}"),
            Error::Plan { index, source } => write!(f, "Patch step {index} failed: {source}"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Error::Plan { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl Error {
    /// Strips any [`Error::Plan`] wrapping and returns the root cause.
    pub fn root(&self) -> &Error {
        match self {
            Error::Plan { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn bounds_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::OutOfBounds { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn capacity_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::CapacityExceeded { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn range_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ValueOutOfRange { msg: msg.into() }
}

/// Creates an encoding error with the specified message.
///
/// Public so that [`Assembler`](crate::Assembler) implementations can report
/// rejected instructions.
#[cold]
#[inline(never)]
pub fn encoding_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Encoding { msg: msg.into() }
}

/// Creates a compression error with the specified message.
///
/// Public so that [`Codec`](crate::Codec) implementations can report
/// unsupported input.
#[cold]
#[inline(never)]
pub fn compression_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Compression { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn order_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::OrderViolation { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn plan_error(index: usize, source: Error) -> Error {
    Error::Plan {
        index,
        source: Box::new(source),
    }
}

pub type Result<T> = core::result::Result<T, Error>;
