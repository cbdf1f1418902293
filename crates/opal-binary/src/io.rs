use crate::error::{BinaryError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Cursor over an immutable buffer. All multi-byte reads are little-endian,
/// matching the transfer protocol's wire layout.
#[derive(Debug, Clone)]
pub struct BinaryReader {
    buffer: Bytes,
}

impl BinaryReader {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buffer.remaining() < len {
            return Err(BinaryError::UnexpectedEof);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buffer.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buffer.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buffer.get_u64_le())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buffer.copy_to_bytes(len))
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure(out.len())?;
        self.buffer.copy_to_slice(out);
        Ok(())
    }
}

/// Growable write buffer. All multi-byte writes are little-endian.
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buffer.put_u8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buffer.put_u16_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buffer.put_u32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.buffer.put_u64_le(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Zero-fills the buffer up to `len`. Datagrams on this wire are always
    /// transmitted at full packet width.
    pub fn pad_to(&mut self, len: usize) -> Result<()> {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
        Ok(())
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives_little_endian() {
        let mut writer = BinaryWriter::new();
        writer.write_u32(0xAABBCCDD).unwrap();
        writer.write_u16(0x1122).unwrap();
        writer.write_bool(true).unwrap();

        let bytes = writer.freeze();
        assert_eq!(&bytes[..4], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[4..6], &[0x22, 0x11]);

        let mut reader = BinaryReader::new(bytes);
        assert_eq!(reader.read_u32().unwrap(), 0xAABBCCDD);
        assert_eq!(reader.read_u16().unwrap(), 0x1122);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut reader = BinaryReader::new(Bytes::from_static(&[0x01, 0x02]));
        assert!(matches!(
            reader.read_u32(),
            Err(BinaryError::UnexpectedEof)
        ));
    }

    #[test]
    fn pad_to_extends_with_zeroes() {
        let mut writer = BinaryWriter::new();
        writer.write_u8(0xFF).unwrap();
        writer.pad_to(4).unwrap();
        assert_eq!(writer.freeze().as_ref(), &[0xFF, 0x00, 0x00, 0x00]);
    }
}
