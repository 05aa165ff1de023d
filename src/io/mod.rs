//! Little-endian, bounds-checked reading and writing of primitive values.
//!
//! Method bodies, exception-handling sections and instruction operands are all stored in
//! little-endian byte order. The helpers in this module are the only place the crate touches raw
//! byte slices; every read is bounds checked and reports [`crate::Error::OutOfBounds`] instead
//! of panicking.
//!
//! - [`read_le`] / [`read_le_at`] - read a value from the start of / at an offset in a buffer
//! - [`write_le_at`] - overwrite a value in place
//! - [`push_le`] - append a value to a growable buffer
//! - [`Parser`] - a cursor over a byte slice built on top of the above
//!
//! ```rust
//! use ciltree::io::{read_le_at, push_le};
//!
//! let mut out = Vec::new();
//! push_le(&mut out, 0x1234_u16);
//! push_le(&mut out, -2_i32);
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&out, &mut offset)?, 0x1234);
//! assert_eq!(read_le_at::<i32>(&out, &mut offset)?, -2);
//! assert_eq!(offset, 6);
//! # Ok::<(), ciltree::Error>(())
//! ```

mod parser;

pub use parser::Parser;

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be converted from and to little-endian byte arrays.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte array holding the encoded value.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Reads a value of type `T` from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Writes `value` at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit into `data` at `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Appends `value` to `out` in little-endian byte order.
pub fn push_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}
