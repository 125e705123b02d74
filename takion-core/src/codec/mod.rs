//! Datagram classifier for `tokio_util::udp::UdpFramed`.
//!
//! `UdpFramed` hands the decoder one whole datagram at a time, so the
//! decoder always consumes the entire buffer. Decoding never fails on
//! peer input: malformed or unknown datagrams come out as their own
//! items and the receive loop logs and drops them.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::TakionError;
use crate::header::ControlHeader;
use crate::message::ContentType;
use crate::packet::{PacketFramer, PacketHeader};

/// One received datagram, classified by its type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// A control chunk with a validated header.
    Control {
        header: ControlHeader,
        payload: Bytes,
    },
    /// A sealed media datagram. Only the header length has been checked;
    /// it is parsed after the key session opens it.
    Media { content: ContentType, packet: Bytes },
    /// Type byte not understood by this client.
    Unknown { tag: u8, len: usize },
    /// Recognized type but unusable bytes.
    Malformed(&'static str),
}

pub struct TakionCodec {
    framer: PacketFramer,
}

impl TakionCodec {
    pub fn new(framer: PacketFramer) -> Self {
        Self { framer }
    }

    fn classify(&self, datagram: Bytes) -> Datagram {
        let Some(&tag) = datagram.first() else {
            return Datagram::Malformed("empty datagram");
        };
        let content = match ContentType::try_from(tag) {
            Ok(content) => content,
            Err(_) => {
                return Datagram::Unknown {
                    tag,
                    len: datagram.len(),
                };
            }
        };

        if content == ContentType::Control {
            return match self.framer.parse(&datagram) {
                Ok(parsed) => match parsed.header {
                    PacketHeader::Control(header) => Datagram::Control {
                        header,
                        payload: datagram.slice(ControlHeader::SIZE..),
                    },
                    _ => Datagram::Malformed("control tag with non-control header"),
                },
                Err(TakionError::MalformedPacket(reason)) => Datagram::Malformed(reason),
                Err(_) => Datagram::Malformed("bad control chunk"),
            };
        }

        if datagram.len() < self.framer.header_len(content) {
            return Datagram::Malformed("datagram shorter than its header");
        }
        Datagram::Media {
            content,
            packet: datagram,
        }
    }
}

impl Decoder for TakionCodec {
    type Item = Datagram;
    type Error = TakionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split().freeze();
        Ok(Some(self.classify(datagram)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ConsoleGeneration;
    use crate::message::ChunkType;

    fn decode_one(bytes: &[u8]) -> Datagram {
        let mut codec = TakionCodec::new(PacketFramer::new(ConsoleGeneration::Legacy));
        let mut buf = BytesMut::from(bytes);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder must consume the whole datagram");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        item
    }

    #[test]
    fn control_chunk() {
        let framer = PacketFramer::default();
        let header = ControlHeader {
            chunk: ChunkType::Heartbeat,
            seq: 0,
            conn_tag: 7,
            payload_len: 2,
        };
        let bytes = framer.build(&PacketHeader::Control(header), b"hi").unwrap();
        assert_eq!(
            decode_one(&bytes),
            Datagram::Control {
                header,
                payload: Bytes::from_static(b"hi"),
            }
        );
    }

    #[test]
    fn unknown_and_malformed() {
        assert_eq!(decode_one(&[0x42, 1, 2]), Datagram::Unknown { tag: 0x42, len: 3 });
        assert!(matches!(decode_one(&[3, 0, 0]), Datagram::Malformed(_)));
        assert!(matches!(decode_one(&[0, 9, 0]), Datagram::Malformed(_)));
    }

    #[test]
    fn media_is_passed_through() {
        let mut bytes = vec![2u8; 25];
        bytes[5..9].copy_from_slice(&0x0002_2821u32.to_be_bytes());
        match decode_one(&bytes) {
            Datagram::Media { content, packet } => {
                assert_eq!(content, ContentType::Video);
                assert_eq!(packet.len(), 25);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
