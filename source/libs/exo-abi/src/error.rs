// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable error codes returned in the syscall return register.
//!
//! A syscall returns a non-negative value on success and the negated code of one of
//! these variants on failure.

use core::fmt;

/// Result alias used by ABI helpers.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors a syscall can report to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// Failure with no more specific code.
    Unspecified = -1,
    /// Environment does not exist or the caller may not act on it.
    BadEnv = -2,
    /// Malformed argument: misaligned address, out-of-range address, bad permission.
    Inval = -3,
    /// Physical memory exhausted.
    NoMem = -4,
    /// Environment table exhausted.
    NoFreeEnv = -5,
    /// Memory fault while the kernel accessed a user buffer.
    Fault = -6,
    /// Target environment is not currently receiving.
    IpcNotRecv = -7,
}

impl Error {
    /// Returns the negative code written to the return register.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Maps a negative return value back onto an error variant.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Unspecified,
            -2 => Self::BadEnv,
            -3 => Self::Inval,
            -4 => Self::NoMem,
            -5 => Self::NoFreeEnv,
            -6 => Self::Fault,
            -7 => Self::IpcNotRecv,
            _ => return None,
        })
    }

    /// Interprets a raw syscall return value.
    ///
    /// Unknown negative values collapse into [`Error::Unspecified`].
    pub fn decode(ret: i32) -> Result<u32> {
        if ret >= 0 {
            Ok(ret as u32)
        } else {
            Err(Self::from_code(ret).unwrap_or(Self::Unspecified))
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified error",
            Self::BadEnv => "bad environment",
            Self::Inval => "invalid parameter",
            Self::NoMem => "out of memory",
            Self::NoFreeEnv => "out of environments",
            Self::Fault => "segmentation fault",
            Self::IpcNotRecv => "env is not recving",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}
