//! Byte-view helpers for getters
//!
//! Getters hand the engine little-endian raw bytes. These helpers
//! materialise common value shapes so application code can write
//!
//! ```
//! use incppect_core::view;
//!
//! let counter = 42u32;
//! let bytes = view::of(&counter);
//! assert_eq!(&bytes[..], &42u32.to_le_bytes());
//! ```

use bytes::{Bytes, BytesMut};

/// Types with a defined little-endian byte image.
pub trait AsView {
    fn view(&self) -> Bytes;
}

/// Materialise any [`AsView`] value as bytes.
pub fn of<T: AsView + ?Sized>(v: &T) -> Bytes {
    v.view()
}

macro_rules! scalar_views {
    ($($t:ty),* $(,)?) => {$(
        impl AsView for $t {
            fn view(&self) -> Bytes {
                Bytes::copy_from_slice(&self.to_le_bytes())
            }
        }

        impl AsView for [$t] {
            fn view(&self) -> Bytes {
                let mut buf = BytesMut::with_capacity(self.len() * std::mem::size_of::<$t>());
                for v in self {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                buf.freeze()
            }
        }

        impl<const N: usize> AsView for [$t; N] {
            fn view(&self) -> Bytes {
                self.as_slice().view()
            }
        }

        impl AsView for Vec<$t> {
            fn view(&self) -> Bytes {
                self.as_slice().view()
            }
        }
    )*};
}

scalar_views!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl AsView for bool {
    fn view(&self) -> Bytes {
        Bytes::copy_from_slice(&[u8::from(*self)])
    }
}

impl AsView for str {
    fn view(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl AsView for String {
    fn view(&self) -> Bytes {
        self.as_str().view()
    }
}

impl AsView for Bytes {
    fn view(&self) -> Bytes {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_little_endian() {
        assert_eq!(&of(&0x1122_3344u32)[..], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&of(&1.5f32)[..], &1.5f32.to_le_bytes());
        assert_eq!(&of(&-1i64)[..], &(-1i64).to_le_bytes());
    }

    #[test]
    fn slices_concatenate_elements() {
        let arr = [1i32, 2, 3];
        let bytes = of(&arr);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
    }

    #[test]
    fn strings_are_raw_utf8() {
        assert_eq!(&of("hi")[..], b"hi");
        assert_eq!(&of(&String::from("hi"))[..], b"hi");
    }
}
