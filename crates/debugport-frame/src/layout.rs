//! Offset tables for packed wire structs.
//!
//! Payload structs (command header, ping bodies, log records) are described
//! once as a static [`StructLayout`]; encoding and decoding walk the table
//! instead of re-deriving field positions per packet.

use bytes::Bytes;

use crate::codec::WIRE_ENDIAN;
use crate::error::{FrameError, Result};

/// What a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned integer of 1, 2, 4 or 8 bytes in wire byte order.
    Uint,
    /// Fixed-length byte array (e.g. a NUL-padded string).
    Bytes,
    /// Alignment padding; written as zero, never decoded.
    Padding,
}

/// One field of a packed struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub kind: FieldKind,
}

impl Field {
    pub const fn uint(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            kind: FieldKind::Uint,
        }
    }

    pub const fn bytes(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            kind: FieldKind::Bytes,
        }
    }

    pub const fn padding(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            kind: FieldKind::Padding,
        }
    }

    fn end(&self) -> usize {
        self.offset + self.width
    }

    fn mask(&self) -> u64 {
        if self.width >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.width * 8)) - 1
        }
    }
}

/// A packed struct: total size plus its fields in wire order.
#[derive(Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [Field],
}

impl StructLayout {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    fn require(&self, name: &str) -> Result<&'static Field> {
        self.field(name).ok_or_else(|| FrameError::UnknownField {
            layout: self.name,
            field: name.to_string(),
        })
    }

    fn check_len(&self, src: &[u8]) -> Result<()> {
        if src.len() != self.size {
            return Err(FrameError::LayoutSizeMismatch {
                layout: self.name,
                expected: self.size,
                actual: src.len(),
            });
        }
        Ok(())
    }

    /// Decode every integer field of `src`.
    pub fn decode(&self, src: &[u8]) -> Result<DecodedFields> {
        self.decode_from(src, 0)
    }

    /// Decode integer fields starting at or after byte `skip`.
    ///
    /// Used to decode a body once its header prefix has been consumed.
    pub fn decode_from(&self, src: &[u8], skip: usize) -> Result<DecodedFields> {
        self.check_len(src)?;
        let values = self
            .fields
            .iter()
            .filter(|field| field.kind == FieldKind::Uint && field.offset >= skip)
            .map(|field| {
                (
                    field.name,
                    WIRE_ENDIAN.get_uint(&src[field.offset..field.end()]),
                )
            })
            .collect();
        Ok(DecodedFields {
            layout: self.name,
            values,
        })
    }

    /// Borrow a byte-array field of `src`.
    pub fn bytes_of<'a>(&self, src: &'a [u8], name: &str) -> Result<&'a [u8]> {
        self.check_len(src)?;
        let field = self.require(name)?;
        Ok(&src[field.offset..field.end()])
    }

    /// Start building an all-zero instance of this struct.
    pub fn builder(&'static self) -> LayoutBuilder {
        LayoutBuilder {
            layout: self,
            buf: vec![0u8; self.size],
        }
    }
}

/// Integer field values decoded from a payload, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFields {
    layout: &'static str,
    values: Vec<(&'static str, u64)>,
}

impl DecodedFields {
    /// Name of the layout these values came from.
    pub fn layout(&self) -> &'static str {
        self.layout
    }

    /// Value of a field, if it was decoded.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }

    /// All decoded `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Writes field values into a zeroed buffer shaped by a [`StructLayout`].
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    layout: &'static StructLayout,
    buf: Vec<u8>,
}

impl LayoutBuilder {
    /// Set an integer field. Values wider than the field are truncated.
    pub fn uint(mut self, name: &str, value: u64) -> Result<Self> {
        let field = self.layout.require(name)?;
        let mut slot = &mut self.buf[field.offset..field.end()];
        WIRE_ENDIAN.put_uint(&mut slot, value & field.mask(), field.width);
        Ok(self)
    }

    /// Set a byte-array field; shorter input is NUL-padded, longer input is cut.
    pub fn bytes(mut self, name: &str, value: &[u8]) -> Result<Self> {
        let field = self.layout.require(name)?;
        let len = value.len().min(field.width);
        let slot = &mut self.buf[field.offset..field.end()];
        slot.fill(0);
        slot[..len].copy_from_slice(&value[..len]);
        Ok(self)
    }

    /// Overwrite the leading bytes with an already-encoded prefix (e.g. a header).
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        let len = prefix.len().min(self.buf.len());
        self.buf[..len].copy_from_slice(&prefix[..len]);
        self
    }

    /// Finish and return the encoded struct.
    pub fn build(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SAMPLE: StructLayout = StructLayout {
        name: "sample",
        size: 16,
        fields: &[
            Field::uint("a", 0, 1),
            Field::padding("pad", 1, 1),
            Field::uint("b", 2, 2),
            Field::uint("c", 4, 4),
            Field::bytes("tag", 8, 8),
        ],
    };

    #[test]
    fn builder_and_decode_agree_on_offsets() {
        let raw = SAMPLE
            .builder()
            .uint("a", 0xA3)
            .unwrap()
            .uint("b", 0x93A3)
            .unwrap()
            .uint("c", 0x208461A3)
            .unwrap()
            .bytes("tag", b"abc")
            .unwrap()
            .build();

        let fields = SAMPLE.decode(&raw).unwrap();
        assert_eq!(fields.get("a"), Some(0xA3));
        assert_eq!(fields.get("b"), Some(0x93A3));
        assert_eq!(fields.get("c"), Some(0x208461A3));
        assert_eq!(fields.get("pad"), None);
        assert_eq!(fields.len(), 3);
        assert_eq!(SAMPLE.bytes_of(&raw, "tag").unwrap(), b"abc\0\0\0\0\0");
    }

    #[test]
    fn decode_from_skips_leading_fields() {
        let raw = SAMPLE.builder().uint("a", 1).unwrap().build();
        let fields = SAMPLE.decode_from(&raw, 2).unwrap();
        assert_eq!(fields.get("a"), None);
        assert_eq!(fields.get("b"), Some(0));
    }

    #[test]
    fn oversized_value_is_truncated_to_field_width() {
        let raw = SAMPLE.builder().uint("a", 0x1A3).unwrap().build();
        assert_eq!(SAMPLE.decode(&raw).unwrap().get("a"), Some(0xA3));
        assert_eq!(raw[1], 0, "neighbouring padding must stay untouched");
    }

    #[test]
    fn unknown_field_is_reported() {
        let err = SAMPLE.builder().uint("nope", 1).unwrap_err();
        assert!(matches!(err, FrameError::UnknownField { .. }));
    }

    #[test]
    fn wrong_length_is_reported() {
        let err = SAMPLE.decode(&[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LayoutSizeMismatch {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }
}
