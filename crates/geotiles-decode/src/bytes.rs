//! Little-endian field readers.

use crate::error::{DecodeError, DecodeResult};

/// Read a little-endian `u32` at `offset`.
pub fn read_u32_le(data: &[u8], offset: usize, what: &'static str) -> DecodeResult<u32> {
    let Some(bytes) = offset.checked_add(4).and_then(|end| data.get(offset..end)) else {
        return Err(DecodeError::Truncated {
            what,
            needed: offset.saturating_add(4),
            available: data.len(),
        });
    };
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read the 4-byte tag at the start of a container.
pub fn read_magic(data: &[u8], what: &'static str) -> DecodeResult<[u8; 4]> {
    match data.get(..4) {
        Some(&[a, b, c, d]) => Ok([a, b, c, d]),
        _ => Err(DecodeError::Truncated {
            what,
            needed: 4,
            available: data.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_le() {
        let data = [0x01, 0x02, 0x03, 0x04, 0xff];
        assert_eq!(read_u32_le(&data, 0, "test").unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_read_u32_le_truncated() {
        let data = [0x01, 0x02, 0x03];
        assert!(matches!(
            read_u32_le(&data, 0, "test"),
            Err(DecodeError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn test_read_u32_le_offset_overflow() {
        let data = [0; 8];
        assert!(matches!(
            read_u32_le(&data, usize::MAX - 1, "test"),
            Err(DecodeError::Truncated { needed: usize::MAX, available: 8, .. })
        ));
    }
}
