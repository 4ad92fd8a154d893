//! Batched 3D Model (b3dm) wrapper parsing.
//!
//! A b3dm file is a 28-byte header, a feature table (JSON + binary), a batch
//! table (JSON + binary), and finally an embedded binary glTF. Only the header
//! and the feature-table `RTC_CENTER` are interpreted here; the batch table is
//! skipped.

use glam::DVec3;

use crate::bytes::{read_magic, read_u32_le};
use crate::error::{DecodeError, DecodeResult};

/// Magic tag at the start of every b3dm file.
pub const B3DM_MAGIC: [u8; 4] = *b"b3dm";

/// Size of the fixed b3dm header in bytes.
pub const HEADER_LEN: usize = 28;

/// The fixed 28-byte b3dm header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct B3dmHeader {
    /// Format version (1 for every known producer).
    pub version: u32,
    /// Total byte length of the file, header included.
    pub byte_length: u32,
    pub feature_table_json_byte_length: u32,
    pub feature_table_binary_byte_length: u32,
    pub batch_table_json_byte_length: u32,
    pub batch_table_binary_byte_length: u32,
}

impl B3dmHeader {
    /// Parse and validate the header against the full buffer.
    ///
    /// Fails on a wrong magic tag or when the declared total length differs
    /// from `data.len()`. A version other than 1 is only logged.
    pub fn parse(data: &[u8]) -> DecodeResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                what: "b3dm header",
                needed: HEADER_LEN,
                available: data.len(),
            });
        }

        let magic = read_magic(data, "b3dm header")?;
        if magic != B3DM_MAGIC {
            return Err(DecodeError::InvalidMagic {
                expected: "b3dm",
                found: magic,
            });
        }

        let version = read_u32_le(data, 4, "b3dm version")?;
        if version != 1 {
            tracing::warn!("b3dm version is {version}, expected 1; assuming version 1 layout");
        }

        let byte_length = read_u32_le(data, 8, "b3dm byte length")?;
        if byte_length as usize != data.len() {
            return Err(DecodeError::LengthMismatch {
                what: "b3dm byteLength",
                declared: byte_length as usize,
                actual: data.len(),
            });
        }

        Ok(Self {
            version,
            byte_length,
            feature_table_json_byte_length: read_u32_le(data, 12, "b3dm header")?,
            feature_table_binary_byte_length: read_u32_le(data, 16, "b3dm header")?,
            batch_table_json_byte_length: read_u32_le(data, 20, "b3dm header")?,
            batch_table_binary_byte_length: read_u32_le(data, 24, "b3dm header")?,
        })
    }

    /// Offset of the embedded glTF: the header plus all four tables.
    #[must_use]
    pub fn payload_offset(&self) -> u64 {
        HEADER_LEN as u64
            + u64::from(self.feature_table_json_byte_length)
            + u64::from(self.feature_table_binary_byte_length)
            + u64::from(self.batch_table_json_byte_length)
            + u64::from(self.batch_table_binary_byte_length)
    }
}

/// A b3dm file split into its parts.
#[derive(Debug, Clone)]
pub struct B3dm<'a> {
    pub header: B3dmHeader,
    /// Feature-table `RTC_CENTER`, if present.
    pub rtc_center: Option<DVec3>,
    /// The embedded glTF, or `None` when the wrapper carries no payload.
    pub gltf: Option<&'a [u8]>,
}

/// Split a b3dm buffer into header, RTC offset and embedded glTF.
///
/// A computed payload length of zero is not an error: some tiles are
/// legitimately empty at this layer and yield `gltf == None`.
pub fn unwrap_b3dm(data: &[u8]) -> DecodeResult<B3dm<'_>> {
    let header = B3dmHeader::parse(data)?;

    let start = header.payload_offset();
    let total = u64::from(header.byte_length);
    if start > total {
        return Err(DecodeError::LengthMismatch {
            what: "b3dm tables",
            declared: usize::try_from(start).unwrap_or(usize::MAX),
            actual: data.len(),
        });
    }
    // Both bounds are <= data.len() here.
    #[allow(clippy::cast_possible_truncation)]
    let (start, end) = (start as usize, total as usize);

    let gltf = (end > start).then(|| &data[start..end]);
    let rtc_center = read_rtc_center(data, &header)?;

    Ok(B3dm {
        header,
        rtc_center,
        gltf,
    })
}

/// Read `RTC_CENTER` from the feature table, in either its JSON-array or
/// binary-reference form.
///
/// Trailing NUL and whitespace padding is ignored. A table that still does
/// not parse is logged and treated as having no centre.
fn read_rtc_center(data: &[u8], header: &B3dmHeader) -> DecodeResult<Option<DVec3>> {
    let json_len = header.feature_table_json_byte_length as usize;
    let json_bytes = &data[HEADER_LEN..HEADER_LEN + json_len];
    let json_bytes = json_bytes
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(&json_bytes[..0], |last| &json_bytes[..=last]);
    if json_bytes.is_empty() {
        return Ok(None);
    }
    let table: serde_json::Value = match serde_json::from_slice(json_bytes) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("ignoring unreadable b3dm feature table: {e}");
            return Ok(None);
        }
    };

    let Some(rtc) = table.get("RTC_CENTER") else {
        return Ok(None);
    };

    if let Some(values) = rtc.as_array() {
        let coords: Vec<f64> = values.iter().filter_map(serde_json::Value::as_f64).collect();
        return match coords.as_slice() {
            [x, y, z] => Ok(Some(DVec3::new(*x, *y, *z))),
            _ => Err(DecodeError::Gltf(format!(
                "RTC_CENTER must have 3 components, found {}",
                values.len()
            ))),
        };
    }

    if let Some(offset) = rtc.get("byteOffset").and_then(serde_json::Value::as_u64) {
        let binary_start = HEADER_LEN + json_len;
        let binary_len = header.feature_table_binary_byte_length as usize;
        let binary = &data[binary_start..binary_start + binary_len];
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut coords = [0.0_f64; 3];
        for (i, coord) in coords.iter_mut().enumerate() {
            let bits = read_u32_le(binary, offset.saturating_add(i * 4), "RTC_CENTER")?;
            *coord = f64::from(f32::from_bits(bits));
        }
        return Ok(Some(DVec3::from_array(coords)));
    }

    Ok(None)
}

/// Build a b3dm buffer around `gltf` with the given table contents.
///
/// Table sections are padded to 8-byte boundaries as producers do.
#[must_use]
pub fn wrap_b3dm(gltf: &[u8], feature_table_json: &str, batch_table_json: &str) -> Vec<u8> {
    let pad = |s: &str| {
        let mut bytes = s.as_bytes().to_vec();
        while (HEADER_LEN + bytes.len()) % 8 != 0 {
            bytes.push(b' ');
        }
        bytes
    };
    let feature_table = if feature_table_json.is_empty() {
        Vec::new()
    } else {
        pad(feature_table_json)
    };
    let batch_table = batch_table_json.as_bytes();

    let total = HEADER_LEN + feature_table.len() + batch_table.len() + gltf.len();
    let len32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX).to_le_bytes();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&B3DM_MAGIC);
    out.extend_from_slice(&1_u32.to_le_bytes());
    out.extend_from_slice(&len32(total));
    out.extend_from_slice(&len32(feature_table.len()));
    out.extend_from_slice(&0_u32.to_le_bytes());
    out.extend_from_slice(&len32(batch_table.len()));
    out.extend_from_slice(&0_u32.to_le_bytes());
    out.extend_from_slice(&feature_table);
    out.extend_from_slice(batch_table);
    out.extend_from_slice(gltf);
    out
}
