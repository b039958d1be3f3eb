//! Packing facility abstraction.

use crate::error::{CourierError, Result};
use crate::types::Datatype;

/// Serializes a typed message into a contiguous byte payload.
///
/// The send driver asks for the packed size first and only carves a block
/// once it knows the answer, so `pack` is not expected to fail in steady
/// state; an error here is surfaced as an internal error.
pub trait Packer: Send + Sync {
    /// Packed size in bytes of `count` elements of `dtype`.
    ///
    /// Pure and side-effect free.
    fn packed_size(&self, count: usize, dtype: &Datatype) -> usize;

    /// Serialize `count` elements of `dtype` from `src` into `dst`.
    ///
    /// Returns the number of bytes written, which never exceeds
    /// `packed_size(count, dtype)`.
    fn pack(&self, src: &[u8], count: usize, dtype: &Datatype, dst: &mut [u8]) -> Result<usize>;
}

/// The default packer: elements are already laid out contiguously in the
/// source buffer, so packing is a bounds-checked copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytePacker;

impl Packer for BytePacker {
    fn packed_size(&self, count: usize, dtype: &Datatype) -> usize {
        match dtype {
            Datatype::Packed => count,
            Datatype::Contiguous { elem_size } => count * elem_size,
        }
    }

    fn pack(&self, src: &[u8], count: usize, dtype: &Datatype, dst: &mut [u8]) -> Result<usize> {
        let needed = self.packed_size(count, dtype);
        if src.len() < needed {
            return Err(CourierError::PackFailed {
                cause: format!("source holds {} bytes, message needs {}", src.len(), needed),
            });
        }
        if dst.len() < needed {
            return Err(CourierError::PackFailed {
                cause: format!(
                    "destination holds {} bytes, message needs {}",
                    dst.len(),
                    needed
                ),
            });
        }
        dst[..needed].copy_from_slice(&src[..needed]);
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_size_matches_layout() {
        let packer = BytePacker;
        assert_eq!(packer.packed_size(10, &Datatype::Packed), 10);
        assert_eq!(packer.packed_size(10, &Datatype::BYTE), 10);
        assert_eq!(
            packer.packed_size(3, &Datatype::Contiguous { elem_size: 8 }),
            24
        );
    }

    #[test]
    fn pack_copies_exactly() {
        let packer = BytePacker;
        let src = [7u8; 24];
        let mut dst = [0u8; 32];
        let written = packer
            .pack(&src, 3, &Datatype::Contiguous { elem_size: 8 }, &mut dst)
            .unwrap();
        assert_eq!(written, 24);
        assert_eq!(&dst[..24], &src[..]);
        assert_eq!(&dst[24..], &[0u8; 8]);
    }

    #[test]
    fn pack_rejects_short_source() {
        let packer = BytePacker;
        let src = [0u8; 4];
        let mut dst = [0u8; 32];
        let err = packer
            .pack(&src, 8, &Datatype::BYTE, &mut dst)
            .unwrap_err();
        assert_eq!(err.code(), "E005");
    }

    #[test]
    fn pack_rejects_short_destination() {
        let packer = BytePacker;
        let src = [0u8; 32];
        let mut dst = [0u8; 4];
        let err = packer
            .pack(&src, 8, &Datatype::BYTE, &mut dst)
            .unwrap_err();
        assert_eq!(err.code(), "E005");
    }
}
