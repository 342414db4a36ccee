//! Error types shared by every allocator tier.

use core::{fmt, panic};

use snafu::{GenerateImplicitData, Snafu};

/// Source location of the call that produced an [`AllocError`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors reported by [`PrimaryAllocator`](crate::PrimaryAllocator),
/// [`FreeListAllocator`](crate::FreeListAllocator) and
/// [`TypedAllocator`](crate::TypedAllocator).
///
/// Transient exhaustion is retried internally (OOM handler rounds and free
/// list scavenging). Only once those are used up does an allocation fail with
/// [`AllocError::OutOfMemory`].
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("out of memory while requesting {bytes} bytes"))]
    OutOfMemory {
        bytes: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("zero-sized allocation request"))]
    InvalidSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block of {expected} bytes released as {actual} bytes"))]
    SizeMismatch {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("request of {bytes} bytes exceeds the maximum layout size"))]
    TooLarge {
        bytes: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{count} elements of {elem_size} bytes overflow the address space"))]
    SizeOverflow {
        count: usize,
        elem_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    /// Returns the location where the error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::OutOfMemory { location, .. }
            | Self::InvalidSize { location }
            | Self::SizeMismatch { location, .. }
            | Self::TooLarge { location, .. }
            | Self::SizeOverflow { location, .. } => *location,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::string::ToString as _;

    use super::*;

    fn mismatch() -> Result<(), AllocError> {
        SizeMismatchSnafu {
            expected: 16_usize,
            actual: 24_usize,
        }
        .fail()
    }

    #[test]
    fn test_display() {
        let err = OutOfMemorySnafu { bytes: 4096_usize }.build();
        assert_eq!(
            err.to_string(),
            "out of memory while requesting 4096 bytes"
        );

        let err = mismatch().unwrap_err();
        assert_eq!(err.to_string(), "block of 16 bytes released as 24 bytes");
    }

    #[test]
    fn test_variant_predicates() {
        let err = mismatch().unwrap_err();
        assert!(err.is_size_mismatch());
        assert!(!err.is_out_of_memory());
        assert!(InvalidSizeSnafu.build().is_invalid_size());
    }

    #[test]
    fn test_location_points_at_caller() {
        let err = InvalidSizeSnafu.build();
        assert!(err.location().to_string().contains("error.rs"));
    }
}
