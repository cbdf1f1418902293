use bytes::Bytes;
use opal_binary::error::BinaryError;
use opal_binary::io::{BinaryReader, BinaryWriter};
use opal_binary::traits::{Readable, Writable};

/// Total on-wire width of a datagram. Every segment is transmitted at this
/// width; bytes past the payload are padding.
pub const MAX_PACKET_SIZE: usize = 1472;
/// Fixed header: seq (4) | ack (4) | ack_flag (1) | fin_flag (1) | length (2).
pub const HEADER_LEN: usize = 12;
/// Maximum payload carried by one segment.
pub const MAX_DATA_SIZE: usize = MAX_PACKET_SIZE - HEADER_LEN;

/// Raw reply sent instead of a data segment when the requested file cannot
/// be opened. Both endpoints must agree on the literal.
pub const FILE_NOT_FOUND: &[u8] = b"FILE NOT FOUND";

/// The wire unit of the transfer protocol. Sequence and acknowledgment
/// numbers are byte offsets shifted by the session's initial sequence
/// number; all header integers are little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq: u32,
    pub ack: u32,
    pub ack_flag: bool,
    pub fin_flag: bool,
    pub payload: Bytes,
}

impl Segment {
    pub fn data(seq: u32, fin_flag: bool, payload: Bytes) -> Self {
        Self {
            seq,
            ack: 0,
            ack_flag: false,
            fin_flag,
            payload,
        }
    }

    /// A cumulative acknowledgment. Carries no payload and no sequence
    /// number of its own.
    pub fn ack(ack: u32) -> Self {
        Self {
            seq: 0,
            ack,
            ack_flag: true,
            fin_flag: false,
            payload: Bytes::new(),
        }
    }

    /// Serializes into a full-width datagram buffer.
    pub fn encode(&self) -> Result<Bytes, BinaryError> {
        if self.payload.len() > MAX_DATA_SIZE {
            return Err(BinaryError::InvalidData(format!(
                "payload of {} bytes exceeds MAX_DATA_SIZE ({})",
                self.payload.len(),
                MAX_DATA_SIZE
            )));
        }
        let mut writer = BinaryWriter::with_capacity(MAX_PACKET_SIZE);
        self.write(&mut writer)?;
        writer.pad_to(MAX_PACKET_SIZE)?;
        Ok(writer.freeze())
    }

    /// Deserializes from a received datagram of known length. Fails when the
    /// buffer is shorter than the header or shorter than the payload the
    /// header claims.
    pub fn decode(buffer: &[u8]) -> Result<Self, BinaryError> {
        let mut reader = BinaryReader::new(Bytes::copy_from_slice(buffer));
        Self::read(&mut reader)
    }
}

impl Writable for Segment {
    fn write(&self, writer: &mut BinaryWriter) -> Result<(), BinaryError> {
        writer.write_u32(self.seq)?;
        writer.write_u32(self.ack)?;
        writer.write_bool(self.ack_flag)?;
        writer.write_bool(self.fin_flag)?;
        writer.write_u16(self.payload.len() as u16)?;
        writer.write_bytes(&self.payload)?;
        Ok(())
    }
}

impl Readable for Segment {
    fn read(reader: &mut BinaryReader) -> Result<Self, BinaryError> {
        let seq = reader.read_u32()?;
        let ack = reader.read_u32()?;
        let ack_flag = reader.read_bool()?;
        let fin_flag = reader.read_bool()?;
        let length = reader.read_u16()? as usize;
        let payload = reader.read_bytes(length)?;
        Ok(Self {
            seq,
            ack,
            ack_flag,
            fin_flag,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_segment_round_trips() {
        let segment = Segment::data(67 + 1460, true, Bytes::from_static(b"some file bytes"));
        let wire = segment.encode().unwrap();
        assert_eq!(wire.len(), MAX_PACKET_SIZE);

        let decoded = Segment::decode(&wire).unwrap();
        assert_eq!(decoded, segment);
    }

    #[test]
    fn ack_segment_round_trips() {
        let segment = Segment::ack(0xDEAD_BEEF);
        let decoded = Segment::decode(&segment.encode().unwrap()).unwrap();
        assert!(decoded.ack_flag);
        assert!(!decoded.fin_flag);
        assert_eq!(decoded.ack, 0xDEAD_BEEF);
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn header_layout_is_little_endian() {
        let segment = Segment::data(0x0102_0304, false, Bytes::from_static(b"ab"));
        let wire = segment.encode().unwrap();
        assert_eq!(&wire[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(wire[8], 0); // ack_flag
        assert_eq!(wire[9], 0); // fin_flag
        assert_eq!(&wire[10..12], &[0x02, 0x00]);
        assert_eq!(&wire[12..14], b"ab");
    }

    #[test]
    fn rejects_buffer_shorter_than_header() {
        assert!(Segment::decode(&[0u8; HEADER_LEN - 1]).is_err());
    }

    #[test]
    fn rejects_buffer_shorter_than_claimed_payload() {
        let segment = Segment::data(1, false, Bytes::from_static(b"0123456789"));
        let wire = segment.encode().unwrap();
        // Truncate inside the payload region.
        assert!(Segment::decode(&wire[..HEADER_LEN + 4]).is_err());
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let segment = Segment::data(7, false, Bytes::from_static(b"xy"));
        let wire = segment.encode().unwrap();
        let decoded = Segment::decode(&wire).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"xy");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let segment = Segment::data(0, false, Bytes::from(vec![0u8; MAX_DATA_SIZE + 1]));
        assert!(segment.encode().is_err());
    }
}
