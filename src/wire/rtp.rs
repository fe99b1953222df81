//! RTP packet wire format (RFC 3550 Section 5, RFC 5285 header extensions)
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{TransportError, TransportResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::{Duration, SystemTime};

/// Profile-defined word marking a one-byte header extension (RFC 5285 Section 4.2).
pub const ONE_BYTE_EXTENSION_PROFILE: u16 = 0xBEDE;

/// High 12 bits of the profile-defined word marking a two-byte header extension
/// (RFC 5285 Section 4.3). The low 4 bits ("appbits") are opaque to the codec.
const TWO_BYTE_EXTENSION_PROFILE_MASK: u16 = 0xFFF0;
const TWO_BYTE_EXTENSION_PROFILE_TAG: u16 = 0x1000;

/// RTP header as defined in RFC 3550 Section 5.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_header: Option<ExtensionHeader>,
}

/// Raw RTP header-extension block, carrying the profile word and the opaque
/// extension-data area. Use [`ExtensionHeader::iter_elements`] to walk its
/// individual elements under the one-byte or two-byte profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub profile: u16,
    pub data: Bytes,
}

/// One parsed header-extension element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionElement<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

impl ExtensionHeader {
    /// Iterate the individual elements of this extension block.
    ///
    /// Recognises the one-byte (`0xBEDE`) and two-byte (`0x100X`) profiles
    /// defined by RFC 5285. Any other profile word is tolerated but yields
    /// no elements — the whole area is opaque to the codec in that case.
    pub fn iter_elements(&self) -> ExtensionElementIter<'_> {
        let kind = if self.profile == ONE_BYTE_EXTENSION_PROFILE {
            ExtensionProfileKind::OneByte
        } else if self.profile & TWO_BYTE_EXTENSION_PROFILE_MASK == TWO_BYTE_EXTENSION_PROFILE_TAG {
            ExtensionProfileKind::TwoByte
        } else {
            ExtensionProfileKind::Unknown
        };
        ExtensionElementIter {
            data: &self.data,
            pos: 0,
            kind,
        }
    }
}

#[derive(Clone, Copy)]
enum ExtensionProfileKind {
    OneByte,
    TwoByte,
    Unknown,
}

/// Iterator over the elements of a header-extension block.
pub struct ExtensionElementIter<'a> {
    data: &'a [u8],
    pos: usize,
    kind: ExtensionProfileKind,
}

impl<'a> Iterator for ExtensionElementIter<'a> {
    type Item = ExtensionElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.kind {
            ExtensionProfileKind::Unknown => None,
            ExtensionProfileKind::OneByte => loop {
                if self.pos >= self.data.len() {
                    return None;
                }
                let b = self.data[self.pos];
                let id = (b >> 4) & 0x0F;
                if id == 15 {
                    // Terminator: rest of the block is padding.
                    return None;
                }
                if id == 0 {
                    // Single-octet pad, skip and keep scanning.
                    self.pos += 1;
                    continue;
                }
                let len = ((b & 0x0F) as usize) + 1;
                let start = self.pos + 1;
                let end = start + len;
                if end > self.data.len() {
                    return None;
                }
                self.pos = end;
                return Some(ExtensionElement {
                    id,
                    data: &self.data[start..end],
                });
            },
            ExtensionProfileKind::TwoByte => loop {
                if self.pos + 2 > self.data.len() {
                    return None;
                }
                let id = self.data[self.pos];
                let len = self.data[self.pos + 1] as usize;
                if id == 0 {
                    self.pos += 1;
                    continue;
                }
                let start = self.pos + 2;
                let end = start + len;
                if end > self.data.len() {
                    return None;
                }
                self.pos = end;
                return Some(ExtensionElement {
                    id,
                    data: &self.data[start..end],
                });
            },
        }
    }
}

/// Per-flow identification for multipath (MPRTP-style) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubflowInfo {
    pub subflow_id: u16,
    pub subflow_sequence_number: u16,
}

/// A complete RTP packet plus the observable attributes attached to it once
/// it has traveled through the session (spec.md Section 3, `RtpPacket`
/// entity). Fields beyond `header`/`payload` are populated by the session
/// on the receive path, or by the sender before handing the packet to the
/// scheduler.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
    /// Wall-clock time this packet arrived, set on the receive path only.
    pub arrival_time: Option<SystemTime>,
    /// Wall-clock time this packet was handed to the transport, set on the send path only.
    pub send_time: Option<SystemTime>,
    /// 32-bit sequence number lifted out of 16-bit wraparound cycles.
    /// Invariant: `extended_sequence_number as u16 == header.sequence_number`.
    pub extended_sequence_number: Option<u32>,
    /// Estimated one-way delay, when the session has a synchronized clock mapping.
    pub one_way_delay: Option<Duration>,
    pub subflow: Option<SubflowInfo>,
}

impl RtpHeader {
    pub const MIN_SIZE: usize = 12;

    /// Parse an RTP header from the front of `data`, returning the header and
    /// the remaining bytes (CSRC and extension area already consumed).
    pub fn parse(mut data: &[u8]) -> TransportResult<(Self, &[u8])> {
        if data.len() < Self::MIN_SIZE {
            return Err(TransportError::MalformedDatagram(format!(
                "RTP header too short: {} bytes",
                data.len()
            )));
        }

        let first_byte = data[0];
        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(TransportError::MalformedDatagram(format!(
                "invalid RTP version: {}",
                version
            )));
        }
        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0F;

        let second_byte = data[1];
        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7F;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        data = &data[Self::MIN_SIZE..];

        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if data.len() < 4 {
                return Err(TransportError::MalformedDatagram(
                    "incomplete CSRC list".to_string(),
                ));
            }
            csrc.push(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            data = &data[4..];
        }

        let extension_header = if extension {
            if data.len() < 4 {
                return Err(TransportError::MalformedDatagram(
                    "incomplete extension header".to_string(),
                ));
            }
            let profile = u16::from_be_bytes([data[0], data[1]]);
            let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
            let ext_data_len = length_words * 4;

            if data.len() < 4 + ext_data_len {
                return Err(TransportError::MalformedDatagram(
                    "incomplete extension data".to_string(),
                ));
            }

            let ext_data = Bytes::copy_from_slice(&data[4..4 + ext_data_len]);
            data = &data[4 + ext_data_len..];

            Some(ExtensionHeader {
                profile,
                data: ext_data,
            })
        } else {
            None
        };

        let header = RtpHeader {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_header,
        };

        Ok((header, data))
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        let mut first_byte = (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 0x20;
        }
        if self.extension {
            first_byte |= 0x10;
        }
        first_byte |= self.csrc.len() as u8 & 0x0F;
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 0x80;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for &csrc_id in &self.csrc {
            buf.put_u32(csrc_id);
        }

        if let Some(ref ext) = self.extension_header {
            buf.put_u16(ext.profile);
            let length_words = (ext.data.len() + 3) / 4;
            buf.put_u16(length_words as u16);
            buf.put_slice(&ext.data);
            let padding = (4 - (ext.data.len() % 4)) % 4;
            for _ in 0..padding {
                buf.put_u8(0);
            }
        }

        buf
    }

    pub fn size(&self) -> usize {
        let mut size = Self::MIN_SIZE;
        size += self.csrc.len() * 4;
        if let Some(ref ext) = self.extension_header {
            size += 4;
            size += ext.data.len();
            size += (4 - (ext.data.len() % 4)) % 4;
        }
        size
    }
}

impl RtpPacket {
    /// Construct a fresh outbound packet, with no receive-path metadata set.
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        RtpPacket {
            header,
            payload,
            arrival_time: None,
            send_time: None,
            extended_sequence_number: None,
            one_way_delay: None,
            subflow: None,
        }
    }

    /// Parse a complete RTP packet, handling the trailing padding-length octet.
    pub fn parse(data: &[u8]) -> TransportResult<Self> {
        let (header, payload_data) = RtpHeader::parse(data)?;

        let payload = if header.padding {
            if payload_data.is_empty() {
                return Err(TransportError::MalformedDatagram(
                    "padding flag set but no payload".to_string(),
                ));
            }
            let padding_len = payload_data[payload_data.len() - 1] as usize;
            if padding_len == 0 || padding_len > payload_data.len() {
                return Err(TransportError::MalformedDatagram(format!(
                    "invalid padding length: {}",
                    padding_len
                )));
            }
            Bytes::copy_from_slice(&payload_data[..payload_data.len() - padding_len])
        } else {
            Bytes::copy_from_slice(payload_data)
        };

        Ok(RtpPacket::new(header, payload))
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = self.header.serialize();
        buf.put_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1,
            ssrc: 1,
            csrc: vec![],
            extension_header: None,
        }
    }

    #[test]
    fn parse_minimal_header() {
        let data = [
            0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let (header, remaining) = RtpHeader::parse(&data).unwrap();
        assert_eq!(header, sample_header());
        assert!(remaining.is_empty());
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let serialized = header.serialize();
        let (parsed, _) = RtpHeader::parse(&serialized).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn packet_round_trip_with_csrc_and_extension() {
        let mut header = sample_header();
        header.csrc = vec![0xAAAA_AAAA, 0xBBBB_BBBB];
        header.csrc_count = 2;
        header.extension = true;
        header.extension_header = Some(ExtensionHeader {
            profile: ONE_BYTE_EXTENSION_PROFILE,
            data: Bytes::from_static(&[0x10, 0xAB, 0x00, 0x00]),
        });

        let packet = RtpPacket::new(header.clone(), Bytes::from_static(b"payload"));
        let serialized = packet.serialize();
        let parsed = RtpPacket::parse(&serialized).unwrap();

        assert_eq!(parsed.header.csrc, header.csrc);
        assert_eq!(parsed.header.extension_header, header.extension_header);
        assert_eq!(parsed.payload, Bytes::from_static(b"payload"));
    }

    #[test]
    fn padding_is_stripped() {
        let mut header = sample_header();
        header.padding = true;
        let mut buf = header.serialize();
        buf.put_slice(b"data");
        buf.put_u8(2); // 2 bytes of padding including the length octet itself
        buf.put_u8(0);

        let packet = RtpPacket::parse(&buf).unwrap();
        assert_eq!(packet.payload, Bytes::from_static(b"data"));
    }

    #[test]
    fn one_byte_extension_elements_are_iterated() {
        // id=1 len=1(stored 0) value 0xAB, id=2 len=2(stored 1) values 0x01 0x02, then terminator.
        let data = Bytes::from_static(&[0x10, 0xAB, 0x21, 0x01, 0x02, 0xF0]);
        let ext = ExtensionHeader {
            profile: ONE_BYTE_EXTENSION_PROFILE,
            data,
        };
        let elements: Vec<_> = ext.iter_elements().collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, 1);
        assert_eq!(elements[0].data, &[0xAB]);
        assert_eq!(elements[1].id, 2);
        assert_eq!(elements[1].data, &[0x01, 0x02]);
    }

    #[test]
    fn two_byte_extension_elements_are_iterated() {
        let data = Bytes::from_static(&[3, 2, 0x01, 0x02, 5, 1, 0xFF]);
        let ext = ExtensionHeader {
            profile: 0x1000,
            data,
        };
        let elements: Vec<_> = ext.iter_elements().collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, 3);
        assert_eq!(elements[0].data, &[0x01, 0x02]);
        assert_eq!(elements[1].id, 5);
        assert_eq!(elements[1].data, &[0xFF]);
    }

    #[test]
    fn unknown_profile_yields_no_elements() {
        let ext = ExtensionHeader {
            profile: 0x4242,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        };
        assert_eq!(ext.iter_elements().count(), 0);
    }
}
