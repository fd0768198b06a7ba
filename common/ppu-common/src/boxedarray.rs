//! Heap-allocated fixed-length arrays for video memories.
//!
//! `#[derive(Decode)]` on `Box<[T; LEN]>` decodes onto the stack before moving to the heap, which
//! overflows the stack for the larger VRAM banks. These wrappers decode element-by-element directly
//! into a heap allocation.

use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

macro_rules! define_boxed_array {
    ($name:ident, $t:ty) => {
        #[derive(Debug, Clone, PartialEq, Eq, Encode)]
        pub struct $name<const LEN: usize>(Box<[$t; LEN]>);

        impl<const LEN: usize> $name<LEN> {
            #[must_use]
            #[allow(clippy::missing_panics_doc)]
            pub fn new() -> Self {
                Self(vec![0; LEN].into_boxed_slice().try_into().unwrap())
            }
        }

        impl<const LEN: usize> Default for $name<LEN> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<const LEN: usize> Deref for $name<LEN> {
            type Target = [$t; LEN];

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<const LEN: usize> DerefMut for $name<LEN> {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl<const LEN: usize, Context> Decode<Context> for $name<LEN> {
            fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
                let mut array = Self::new();
                for value in array.0.iter_mut() {
                    *value = <$t>::decode(decoder)?;
                }
                Ok(array)
            }
        }

        impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for $name<LEN> {
            fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, DecodeError> {
                Self::decode(decoder)
            }
        }
    };
}

define_boxed_array!(BoxedByteArray, u8);
define_boxed_array!(BoxedWordArray, u16);
