//! Error types for GDMA operations

use core::fmt;

/// GDMA result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Resource that could not be acquired while bringing up a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Register window could not be mapped or is too small
    Registers,
    /// Interrupt line could not be requested
    Irq,
    /// Memory allocation failed
    Memory,
    /// No unallocated channel left on the device
    Channel,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Registers => write!(f, "registers"),
            Resource::Irq => write!(f, "interrupt line"),
            Resource::Memory => write!(f, "memory"),
            Resource::Channel => write!(f, "channel"),
        }
    }
}

/// GDMA error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Transfer length exceeds what the SIZE register can hold
    UnsupportedLength,
    /// Transfer kind or control operation the hardware cannot perform
    NotSupported,
    /// Engine is already running a transfer
    Busy,
    /// Request could not be turned into a control word
    InvalidConfig,
    /// Device bring-up could not acquire a resource
    ResourceUnavailable(Resource),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedLength => write!(f, "Transfer length not supported"),
            Error::NotSupported => write!(f, "Operation not supported"),
            Error::Busy => write!(f, "Engine busy"),
            Error::InvalidConfig => write!(f, "Invalid configuration"),
            Error::ResourceUnavailable(resource) => write!(f, "Resource unavailable: {}", resource),
        }
    }
}

impl std::error::Error for Error {}
