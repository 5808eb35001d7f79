//! Index types for mesh elements.
//!
//! Vertices and faces are addressed by type-safe `u32` wrappers. The maximum
//! value of the underlying integer is reserved as the invalid sentinel and is
//! never a real index.

use std::fmt::{self, Debug};

/// Raw integer type behind every mesh index.
pub type RawIndex = u32;

/// Sentinel value representing an invalid/null index.
pub const INVALID_INDEX: RawIndex = RawIndex::MAX;

/// Largest element count a mesh may hold (the sentinel is never a real index).
pub const MAX_ELEMENTS: usize = INVALID_INDEX as usize;

/// A type-safe vertex index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VertexId(RawIndex);

/// A type-safe face (triangle) index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct FaceId(RawIndex);

macro_rules! impl_index_type {
    ($name:ident, $display:literal) => {
        impl $name {
            /// Create a new index from a raw value.
            ///
            /// # Panics
            /// Panics in debug builds if the value collides with the sentinel.
            #[inline]
            pub fn new(index: usize) -> Self {
                debug_assert!(index < MAX_ELEMENTS, "index {} too large", index);
                Self(index as RawIndex)
            }

            /// Create an invalid/null index.
            #[inline]
            pub fn invalid() -> Self {
                Self(INVALID_INDEX)
            }

            /// Get the raw index value.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// Check if this is a valid (non-null) index.
            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != INVALID_INDEX
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", $display, self.index())
                } else {
                    write!(f, "{}(INVALID)", $display)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Debug::fmt(self, f)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self::new(v)
            }
        }
    };
}

impl_index_type!(VertexId, "V");
impl_index_type!(FaceId, "F");
