//! Build and parse complete Takion datagrams.
//!
//! The framer owns every byte offset; callers supply all field values
//! (the framer keeps no counters). The console generation is fixed at
//! construction so send paths never branch on it.

use crate::error::TakionError;
use crate::header::{
    AvHeader, CongestionHeader, ConsoleGeneration, ControlHeader, FeedbackHeader,
};
use crate::message::{ChunkType, ContentType};

// ── PacketHeader ─────────────────────────────────────────────────

/// Typed header of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    Control(ControlHeader),
    Video(AvHeader),
    Audio(AvHeader),
    Congestion(CongestionHeader),
    Feedback(FeedbackHeader),
}

impl PacketHeader {
    pub fn content_type(&self) -> ContentType {
        match self {
            PacketHeader::Control(_) => ContentType::Control,
            PacketHeader::Video(_) => ContentType::Video,
            PacketHeader::Audio(_) => ContentType::Audio,
            PacketHeader::Congestion(_) => ContentType::Congestion,
            PacketHeader::Feedback(_) => ContentType::FeedbackState,
        }
    }

    /// Key position of a sealed packet; `None` for control chunks.
    pub fn key_pos(&self) -> Option<u32> {
        match self {
            PacketHeader::Control(_) => None,
            PacketHeader::Video(h) | PacketHeader::Audio(h) => Some(h.key_pos),
            PacketHeader::Congestion(h) => Some(h.key_pos),
            PacketHeader::Feedback(h) => Some(h.key_pos),
        }
    }
}

/// A parsed datagram borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

/// Where the sealing fields of a content type live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    pub header_len: usize,
    pub tag_offset: usize,
    pub key_pos_offset: usize,
}

// ── PacketFramer ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFramer {
    generation: ConsoleGeneration,
}

impl PacketFramer {
    pub fn new(generation: ConsoleGeneration) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> ConsoleGeneration {
        self.generation
    }

    /// Header length of `content` for this framer's console generation.
    pub fn header_len(&self, content: ContentType) -> usize {
        match content {
            ContentType::Control => ControlHeader::SIZE,
            ContentType::Video | ContentType::Audio => AvHeader::size(self.generation),
            ContentType::Congestion => CongestionHeader::SIZE,
            ContentType::FeedbackState => FeedbackHeader::SIZE,
        }
    }

    /// Sealing layout; control chunks are not sealed.
    pub fn layout(&self, content: ContentType) -> Option<PacketLayout> {
        let (tag_offset, key_pos_offset) = match content {
            ContentType::Control => return None,
            ContentType::Video | ContentType::Audio => {
                (AvHeader::TAG_OFFSET, AvHeader::KEY_POS_OFFSET)
            }
            ContentType::Congestion => {
                (CongestionHeader::TAG_OFFSET, CongestionHeader::KEY_POS_OFFSET)
            }
            ContentType::FeedbackState => {
                (FeedbackHeader::TAG_OFFSET, FeedbackHeader::KEY_POS_OFFSET)
            }
        };
        Some(PacketLayout {
            header_len: self.header_len(content),
            tag_offset,
            key_pos_offset,
        })
    }

    /// Serialize `header` followed by `payload`.
    pub fn build(&self, header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>, TakionError> {
        let content = header.content_type();
        let mut buf = Vec::with_capacity(self.header_len(content) + payload.len());
        let tag = content as u8;
        match header {
            PacketHeader::Control(h) => {
                if usize::from(h.payload_len) != payload.len() {
                    return Err(TakionError::MalformedPacket("control payload length mismatch"));
                }
                h.encode_into(tag, &mut buf);
            }
            PacketHeader::Video(h) | PacketHeader::Audio(h) => {
                if payload.is_empty() {
                    return Err(TakionError::MalformedPacket("av packet without payload"));
                }
                h.encode_into(tag, self.generation, &mut buf);
            }
            PacketHeader::Congestion(h) => {
                if !payload.is_empty() {
                    return Err(TakionError::MalformedPacket("congestion packet carries no payload"));
                }
                h.encode_into(tag, &mut buf);
            }
            PacketHeader::Feedback(h) => h.encode_into(tag, &mut buf),
        }
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Build a control chunk, deriving the payload length field.
    pub fn control(
        &self,
        chunk: ChunkType,
        seq: u32,
        conn_tag: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, TakionError> {
        let payload_len = u16::try_from(payload.len())
            .map_err(|_| TakionError::MalformedPacket("control payload too large"))?;
        self.build(
            &PacketHeader::Control(ControlHeader {
                chunk,
                seq,
                conn_tag,
                payload_len,
            }),
            payload,
        )
    }

    /// Parse one datagram. Never reads past `data`.
    pub fn parse<'a>(&self, data: &'a [u8]) -> Result<ParsedPacket<'a>, TakionError> {
        let Some(&first) = data.first() else {
            return Err(TakionError::MalformedPacket("empty datagram"));
        };
        let content = ContentType::try_from(first)?;
        let header_len = self.header_len(content);
        if data.len() < header_len {
            return Err(TakionError::MalformedPacket("datagram shorter than its header"));
        }
        let payload = &data[header_len..];

        let header = match content {
            ContentType::Control => {
                let h = ControlHeader::decode(data)?;
                if usize::from(h.payload_len) != payload.len() {
                    return Err(TakionError::MalformedPacket("control payload length mismatch"));
                }
                PacketHeader::Control(h)
            }
            ContentType::Video | ContentType::Audio => {
                if payload.is_empty() {
                    return Err(TakionError::MalformedPacket("av packet without payload"));
                }
                let h = AvHeader::decode(data, self.generation)?;
                if content == ContentType::Video {
                    PacketHeader::Video(h)
                } else {
                    PacketHeader::Audio(h)
                }
            }
            ContentType::Congestion => {
                if !payload.is_empty() {
                    return Err(TakionError::MalformedPacket("trailing bytes after congestion report"));
                }
                PacketHeader::Congestion(CongestionHeader::decode(data)?)
            }
            ContentType::FeedbackState => PacketHeader::Feedback(FeedbackHeader::decode(data)?),
        };
        Ok(ParsedPacket { header, payload })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FecParam, UnitsWord};

    fn audio_header(packet_index: u16) -> AvHeader {
        AvHeader {
            packet_index,
            frame_index: packet_index.wrapping_add(1),
            units: UnitsWord::new(FecParam::AUDIO, 3, 0).unwrap(),
            codec: 5,
            tag: [0; 4],
            key_pos: 0,
        }
    }

    #[test]
    fn audio_wire_layout_legacy() {
        let framer = PacketFramer::new(ConsoleGeneration::Legacy);
        let payload = [0xAAu8; 120];
        let bytes = framer
            .build(&PacketHeader::Audio(audio_header(0x0102)), &payload)
            .unwrap();

        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..3], &[0x01, 0x02]);
        assert_eq!(&bytes[3..5], &[0x01, 0x03]);
        assert_eq!(&bytes[5..9], &[0x00, 0x02, 0x28, 0x21]);
        assert_eq!(bytes[9], 5);
        assert_eq!(bytes[18], 0);
        assert_eq!(bytes[19], 0xAA);
        assert_eq!(bytes.len(), 19 + 120);
    }

    #[test]
    fn audio_wire_layout_newer() {
        let framer = PacketFramer::new(ConsoleGeneration::Newer);
        let bytes = framer
            .build(&PacketHeader::Audio(audio_header(1)), &[0xAA; 120])
            .unwrap();
        assert_eq!(bytes[19], 0);
        assert_eq!(bytes[20], 0xAA);
        assert_eq!(bytes.len(), 20 + 120);
    }

    #[test]
    fn build_then_parse() {
        let framer = PacketFramer::new(ConsoleGeneration::Newer);
        let header = PacketHeader::Video(AvHeader {
            tag: [1, 2, 3, 4],
            key_pos: 99,
            ..audio_header(65535)
        });
        let bytes = framer.build(&header, b"slice").unwrap();
        let parsed = framer.parse(&bytes).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.payload, b"slice");
    }

    #[test]
    fn control_length_must_match() {
        let framer = PacketFramer::default();
        let header = ControlHeader {
            chunk: ChunkType::Data,
            seq: 1,
            conn_tag: 0xDEAD_BEEF,
            payload_len: 4,
        };
        assert!(framer.build(&PacketHeader::Control(header), b"abc").is_err());

        let mut bytes = framer.build(&PacketHeader::Control(header), b"abcd").unwrap();
        bytes.push(0);
        assert!(matches!(
            framer.parse(&bytes),
            Err(TakionError::MalformedPacket(_))
        ));
    }

    #[test]
    fn congestion_has_no_payload() {
        let framer = PacketFramer::default();
        let header = PacketHeader::Congestion(CongestionHeader {
            sequence: 1,
            received: 100,
            lost: 3,
            key_pos: 0,
            tag: [0; 4],
        });
        let mut bytes = framer.build(&header, &[]).unwrap();
        assert_eq!(bytes.len(), CongestionHeader::SIZE);
        assert_eq!(framer.parse(&bytes).unwrap().header, header);
        bytes.push(1);
        assert!(framer.parse(&bytes).is_err());
    }

    #[test]
    fn short_and_unknown_datagrams() {
        let framer = PacketFramer::default();
        assert!(matches!(
            framer.parse(&[]),
            Err(TakionError::MalformedPacket(_))
        ));
        assert!(matches!(
            framer.parse(&[3, 0, 1]),
            Err(TakionError::MalformedPacket(_))
        ));
        assert!(matches!(
            framer.parse(&[0x7F, 0, 0]),
            Err(TakionError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn layouts() {
        let framer = PacketFramer::new(ConsoleGeneration::Newer);
        assert_eq!(framer.layout(ContentType::Control), None);
        let av = framer.layout(ContentType::Audio).unwrap();
        assert_eq!((av.header_len, av.tag_offset, av.key_pos_offset), (20, 10, 14));
        let fb = framer.layout(ContentType::FeedbackState).unwrap();
        assert_eq!(fb.header_len, 12);
    }
}
