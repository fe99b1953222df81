//! RTCP packet wire format (RFC 3550 Section 6, RFC 4585 generic feedback)
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

/// RTCP packet type field values (RFC 3550 Section 12.1, RFC 4585 Section 6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketType {
    SenderReport,
    ReceiverReport,
    Sdes,
    Bye,
    App,
    /// RFC 4585 generic NACK / transport-layer feedback (PT=205).
    TransportFeedback,
    /// RFC 4585 payload-specific feedback (PT=206), used here for generic ACK.
    PayloadFeedback,
    /// RFC 3611 extended report.
    ExtendedReport,
    Unknown(u8),
}

impl RtcpPacketType {
    fn from_u8(v: u8) -> Self {
        match v {
            200 => RtcpPacketType::SenderReport,
            201 => RtcpPacketType::ReceiverReport,
            202 => RtcpPacketType::Sdes,
            203 => RtcpPacketType::Bye,
            204 => RtcpPacketType::App,
            205 => RtcpPacketType::TransportFeedback,
            206 => RtcpPacketType::PayloadFeedback,
            207 => RtcpPacketType::ExtendedReport,
            other => RtcpPacketType::Unknown(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            RtcpPacketType::SenderReport => 200,
            RtcpPacketType::ReceiverReport => 201,
            RtcpPacketType::Sdes => 202,
            RtcpPacketType::Bye => 203,
            RtcpPacketType::App => 204,
            RtcpPacketType::TransportFeedback => 205,
            RtcpPacketType::PayloadFeedback => 206,
            RtcpPacketType::ExtendedReport => 207,
            RtcpPacketType::Unknown(v) => v,
        }
    }
}

/// Common RTCP header: version(2)/padding(1)/count(5), packet type(8), length(16).
#[derive(Debug, Clone, Copy)]
pub struct RtcpHeader {
    pub version: u8,
    pub padding: bool,
    /// Reception-report count, subtype, or FMT field depending on packet type.
    pub count: u8,
    pub packet_type: RtcpPacketType,
    /// Length in 32-bit words minus one, per RFC 3550 Section 6.1.
    pub length: u16,
}

impl RtcpHeader {
    pub const SIZE: usize = 4;

    pub fn parse(data: &[u8]) -> TransportResult<Self> {
        if data.len() < Self::SIZE {
            return Err(TransportError::MalformedDatagram(
                "RTCP header too short".to_string(),
            ));
        }
        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(TransportError::MalformedDatagram(format!(
                "invalid RTCP version: {}",
                version
            )));
        }
        let padding = (data[0] & 0x20) != 0;
        let count = data[0] & 0x1F;
        let packet_type = RtcpPacketType::from_u8(data[1]);
        let length = u16::from_be_bytes([data[2], data[3]]);
        Ok(RtcpHeader {
            version,
            padding,
            count,
            packet_type,
            length,
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        let mut first_byte = (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 0x20;
        }
        first_byte |= self.count & 0x1F;
        buf.put_u8(first_byte);
        buf.put_u8(self.packet_type.to_u8());
        buf.put_u16(self.length);
    }
}

/// One 24-byte reception report block (RFC 3550 Section 6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit signed cumulative packet loss count.
    pub cumulative_lost: i32,
    pub extended_highest_sequence_number: u32,
    pub interarrival_jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReceptionReport {
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> TransportResult<Self> {
        if data.len() < Self::SIZE {
            return Err(TransportError::MalformedDatagram(
                "reception report block too short".to_string(),
            ));
        }
        let ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let fraction_lost = data[4];
        let raw_cumulative = u32::from_be_bytes([0, data[5], data[6], data[7]]);
        let cumulative_lost = sign_extend_24(raw_cumulative);
        let extended_highest_sequence_number =
            u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let interarrival_jitter = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let last_sr = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let delay_since_last_sr = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            cumulative_lost,
            extended_highest_sequence_number,
            interarrival_jitter,
            last_sr,
            delay_since_last_sr,
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u8(self.fraction_lost);
        let cumulative = (self.cumulative_lost as u32) & 0x00FF_FFFF;
        buf.put_u8((cumulative >> 16) as u8);
        buf.put_u8((cumulative >> 8) as u8);
        buf.put_u8(cumulative as u8);
        buf.put_u32(self.extended_highest_sequence_number);
        buf.put_u32(self.interarrival_jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}

fn sign_extend_24(v: u32) -> i32 {
    if v & 0x0080_0000 != 0 {
        (v | 0xFF00_0000) as i32
    } else {
        v as i32
    }
}

/// Sender Report (RFC 3550 Section 6.4.1).
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
    pub reports: Vec<ReceptionReport>,
}

/// Receiver Report (RFC 3550 Section 6.4.2).
#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

/// One SDES item (RFC 3550 Section 6.5).
#[derive(Debug, Clone)]
pub struct SdesItem {
    pub item_type: u8,
    pub value: String,
}

/// One chunk of an SDES packet: an SSRC and its associated items.
#[derive(Debug, Clone)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

/// BYE packet (RFC 3550 Section 6.6).
#[derive(Debug, Clone)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

/// Generic NACK (RFC 4585 Section 6.2.1): a base sequence number plus a
/// bitmask of the following 16 sequence numbers that were also lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub packet_id: u16,
    pub bitmask_lost: u16,
}

impl GenericNack {
    /// Every sequence number this NACK record reports lost.
    pub fn lost_sequence_numbers(&self) -> Vec<u16> {
        let mut out = vec![self.packet_id];
        for bit in 0..16 {
            if self.bitmask_lost & (1 << bit) != 0 {
                out.push(self.packet_id.wrapping_add(bit + 1));
            }
        }
        out
    }
}

/// Generic ACK feedback record: `base_sequence_number` is the highest SN in
/// the acknowledged run; bit `j` of `bitmask_received` set means
/// `base - j - 1` was also received. Not an IETF-assigned format; used
/// internally alongside NACK for ACK-based RTX retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericAck {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub bitmask_received: u16,
}

impl GenericAck {
    /// Every sequence number this ACK record reports received.
    pub fn received_sequence_numbers(&self) -> Vec<u16> {
        let mut out = vec![self.base_sequence_number];
        for bit in 0..16 {
            if self.bitmask_received & (1 << bit) != 0 {
                out.push(self.base_sequence_number.wrapping_sub(bit + 1));
            }
        }
        out
    }
}

/// One logical RTCP record inside a compound packet. Replaces a
/// base-class/subclass hierarchy with a single tagged union, matching the
/// rest of this crate's wire-format modeling.
#[derive(Debug, Clone)]
pub enum RtcpRecord {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    Sdes(Vec<SdesChunk>),
    Bye(Goodbye),
    App { subtype: u8, ssrc: u32, name: [u8; 4], data: Bytes },
    Nack(GenericNack),
    Ack(GenericAck),
    ExtendedReport { ssrc: u32, data: Bytes },
    Unknown { packet_type: u8, data: Bytes },
}

/// A parsed compound RTCP packet: an ordered sequence of records, as they
/// appear back-to-back in a single RTCP datagram (RFC 3550 Section 6.1).
#[derive(Debug, Clone, Default)]
pub struct CompoundRtcpPacket {
    pub records: Vec<RtcpRecord>,
}

impl CompoundRtcpPacket {
    pub fn new() -> Self {
        CompoundRtcpPacket { records: Vec::new() }
    }

    pub fn push(&mut self, record: RtcpRecord) {
        self.records.push(record);
    }

    pub fn parse(data: &[u8]) -> TransportResult<Self> {
        let original_len = data.len();
        let mut remaining = data;
        let mut packet = CompoundRtcpPacket::new();
        let mut consumed = 0usize;
        let mut padding_flags = Vec::new();

        while !remaining.is_empty() {
            let header = RtcpHeader::parse(remaining)?;
            let total_len = (header.length as usize + 1) * 4;
            if total_len > remaining.len() {
                return Err(TransportError::MalformedDatagram(
                    "RTCP record length exceeds remaining datagram".to_string(),
                ));
            }
            let body = &remaining[RtcpHeader::SIZE..total_len];
            let record = parse_record(&header, body)?;
            packet.push(record);
            padding_flags.push(header.padding);
            consumed += total_len;
            remaining = &remaining[total_len..];
        }

        if consumed != original_len {
            return Err(TransportError::MalformedDatagram(
                "sum of RTCP record lengths does not equal the datagram length".to_string(),
            ));
        }
        if let Some(last) = padding_flags.len().checked_sub(1) {
            if padding_flags[..last].iter().any(|&p| p) {
                return Err(TransportError::MalformedDatagram(
                    "padding bit set on a non-last RTCP record".to_string(),
                ));
            }
        }

        Ok(packet)
    }

    /// Validate the compound-packet structure (spec.md §4.1): the first
    /// record must be SR/RR, unless reduced-size RTCP applies (the first
    /// record is itself a feedback record) and the peer advertises support;
    /// otherwise at least one SDES record must be present. Framing-level
    /// rules (record-length sum, padding only in the last record) are
    /// already enforced by `parse`.
    pub fn validate(&self, allow_reduced_rtcp: bool) -> TransportResult<()> {
        let first = self.records.first().ok_or_else(|| {
            TransportError::MalformedDatagram("compound RTCP packet has no records".to_string())
        })?;

        let is_reduced_size = matches!(first, RtcpRecord::Nack(_) | RtcpRecord::Ack(_));

        if !matches!(first, RtcpRecord::SenderReport(_) | RtcpRecord::ReceiverReport(_)) && !is_reduced_size {
            return Err(TransportError::MalformedDatagram(
                "compound RTCP packet must start with SR or RR".to_string(),
            ));
        }

        if is_reduced_size && !allow_reduced_rtcp {
            return Err(TransportError::MalformedDatagram(
                "reduced-size RTCP compound packet received without negotiated support".to_string(),
            ));
        }

        if !is_reduced_size {
            let has_sdes = self.records.iter().any(|r| matches!(r, RtcpRecord::Sdes(_)));
            if !has_sdes {
                return Err(TransportError::MalformedDatagram(
                    "compound RTCP packet is missing an SDES record".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        for record in &self.records {
            serialize_record(record, &mut buf);
        }
        buf
    }
}

fn parse_record(header: &RtcpHeader, body: &[u8]) -> TransportResult<RtcpRecord> {
    match header.packet_type {
        RtcpPacketType::SenderReport => {
            if body.len() < 24 {
                return Err(TransportError::MalformedDatagram(
                    "sender report body too short".to_string(),
                ));
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let ntp_msw = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
            let ntp_lsw = u32::from_be_bytes([body[8], body[9], body[10], body[11]]);
            let ntp_timestamp = ((ntp_msw as u64) << 32) | ntp_lsw as u64;
            let rtp_timestamp = u32::from_be_bytes([body[12], body[13], body[14], body[15]]);
            let sender_packet_count = u32::from_be_bytes([body[16], body[17], body[18], body[19]]);
            let sender_octet_count = u32::from_be_bytes([body[20], body[21], body[22], body[23]]);
            let reports = parse_reception_reports(&body[24..], header.count as usize)?;
            Ok(RtcpRecord::SenderReport(SenderReport {
                ssrc,
                ntp_timestamp,
                rtp_timestamp,
                sender_packet_count,
                sender_octet_count,
                reports,
            }))
        }
        RtcpPacketType::ReceiverReport => {
            if body.len() < 4 {
                return Err(TransportError::MalformedDatagram(
                    "receiver report body too short".to_string(),
                ));
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let reports = parse_reception_reports(&body[4..], header.count as usize)?;
            Ok(RtcpRecord::ReceiverReport(ReceiverReport { ssrc, reports }))
        }
        RtcpPacketType::Sdes => parse_sdes(body, header.count as usize),
        RtcpPacketType::Bye => parse_bye(body, header.count as usize),
        RtcpPacketType::App => {
            if body.len() < 8 {
                return Err(TransportError::MalformedDatagram(
                    "APP body too short".to_string(),
                ));
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let mut name = [0u8; 4];
            name.copy_from_slice(&body[4..8]);
            Ok(RtcpRecord::App {
                subtype: header.count,
                ssrc,
                name,
                data: Bytes::copy_from_slice(&body[8..]),
            })
        }
        RtcpPacketType::TransportFeedback => {
            if body.len() < 12 {
                return Err(TransportError::MalformedDatagram(
                    "generic NACK body too short".to_string(),
                ));
            }
            let sender_ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let media_ssrc = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
            let packet_id = u16::from_be_bytes([body[8], body[9]]);
            let bitmask_lost = u16::from_be_bytes([body[10], body[11]]);
            Ok(RtcpRecord::Nack(GenericNack {
                sender_ssrc,
                media_ssrc,
                packet_id,
                bitmask_lost,
            }))
        }
        RtcpPacketType::PayloadFeedback => {
            if body.len() < 12 {
                return Err(TransportError::MalformedDatagram(
                    "generic ACK body too short".to_string(),
                ));
            }
            let sender_ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let media_ssrc = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
            let base_sequence_number = u16::from_be_bytes([body[8], body[9]]);
            let bitmask_received = u16::from_be_bytes([body[10], body[11]]);
            Ok(RtcpRecord::Ack(GenericAck {
                sender_ssrc,
                media_ssrc,
                base_sequence_number,
                bitmask_received,
            }))
        }
        RtcpPacketType::ExtendedReport => {
            if body.len() < 4 {
                return Err(TransportError::MalformedDatagram(
                    "XR body too short".to_string(),
                ));
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            Ok(RtcpRecord::ExtendedReport {
                ssrc,
                data: Bytes::copy_from_slice(&body[4..]),
            })
        }
        RtcpPacketType::Unknown(packet_type) => Ok(RtcpRecord::Unknown {
            packet_type,
            data: Bytes::copy_from_slice(body),
        }),
    }
}

fn parse_reception_reports(mut data: &[u8], count: usize) -> TransportResult<Vec<ReceptionReport>> {
    let mut reports = Vec::with_capacity(count);
    for _ in 0..count {
        reports.push(ReceptionReport::parse(data)?);
        data = &data[ReceptionReport::SIZE..];
    }
    Ok(reports)
}

fn parse_sdes(mut data: &[u8], chunk_count: usize) -> TransportResult<RtcpRecord> {
    let mut chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        if data.len() < 4 {
            return Err(TransportError::MalformedDatagram(
                "SDES chunk too short".to_string(),
            ));
        }
        let ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        data = &data[4..];
        let mut items = Vec::new();
        loop {
            if data.is_empty() || data[0] == 0 {
                // Null terminator; chunks are padded to a 32-bit boundary.
                let consumed = 1usize.min(data.len());
                data = &data[consumed..];
                while !data.is_empty() && data[0] == 0 && items_unaligned(&chunks, &items) {
                    data = &data[1..];
                }
                break;
            }
            let item_type = data[0];
            let len = data[1] as usize;
            if data.len() < 2 + len {
                return Err(TransportError::MalformedDatagram(
                    "SDES item exceeds chunk bounds".to_string(),
                ));
            }
            let value = String::from_utf8_lossy(&data[2..2 + len]).into_owned();
            items.push(SdesItem { item_type, value });
            data = &data[2 + len..];
        }
        chunks.push(SdesChunk { ssrc, items });
    }
    Ok(RtcpRecord::Sdes(chunks))
}

fn items_unaligned(_chunks: &[SdesChunk], _items: &[SdesItem]) -> bool {
    // Chunk padding is consumed opportunistically; never loops more than 3
    // bytes since RTCP words are 32-bit aligned. Kept as a named helper so
    // the skip-while-zero logic above reads as intentional, not accidental.
    true
}

fn parse_bye(mut data: &[u8], source_count: usize) -> TransportResult<RtcpRecord> {
    let mut sources = Vec::with_capacity(source_count);
    for _ in 0..source_count {
        if data.len() < 4 {
            return Err(TransportError::MalformedDatagram(
                "BYE source list truncated".to_string(),
            ));
        }
        sources.push(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
        data = &data[4..];
    }
    let reason = if !data.is_empty() {
        let len = data[0] as usize;
        if data.len() < 1 + len {
            return Err(TransportError::MalformedDatagram(
                "BYE reason string truncated".to_string(),
            ));
        }
        Some(String::from_utf8_lossy(&data[1..1 + len]).into_owned())
    } else {
        None
    };
    Ok(RtcpRecord::Bye(Goodbye { sources, reason }))
}

fn serialize_record(record: &RtcpRecord, buf: &mut BytesMut) {
    let start = buf.len();
    // Reserve the header; backpatched with the real length once the body is known.
    buf.put_u32(0);

    let (count, packet_type) = match record {
        RtcpRecord::SenderReport(sr) => {
            buf.put_u32(sr.ssrc);
            buf.put_u32((sr.ntp_timestamp >> 32) as u32);
            buf.put_u32(sr.ntp_timestamp as u32);
            buf.put_u32(sr.rtp_timestamp);
            buf.put_u32(sr.sender_packet_count);
            buf.put_u32(sr.sender_octet_count);
            for report in &sr.reports {
                report.serialize(buf);
            }
            (sr.reports.len() as u8, RtcpPacketType::SenderReport)
        }
        RtcpRecord::ReceiverReport(rr) => {
            buf.put_u32(rr.ssrc);
            for report in &rr.reports {
                report.serialize(buf);
            }
            (rr.reports.len() as u8, RtcpPacketType::ReceiverReport)
        }
        RtcpRecord::Sdes(chunks) => {
            for chunk in chunks {
                let chunk_start = buf.len();
                buf.put_u32(chunk.ssrc);
                for item in &chunk.items {
                    buf.put_u8(item.item_type);
                    buf.put_u8(item.value.len() as u8);
                    buf.put_slice(item.value.as_bytes());
                }
                buf.put_u8(0);
                while (buf.len() - chunk_start) % 4 != 0 {
                    buf.put_u8(0);
                }
            }
            (chunks.len() as u8, RtcpPacketType::Sdes)
        }
        RtcpRecord::Bye(bye) => {
            for &ssrc in &bye.sources {
                buf.put_u32(ssrc);
            }
            if let Some(ref reason) = bye.reason {
                buf.put_u8(reason.len() as u8);
                buf.put_slice(reason.as_bytes());
            }
            (bye.sources.len() as u8, RtcpPacketType::Bye)
        }
        RtcpRecord::App { subtype, ssrc, name, data } => {
            buf.put_u32(*ssrc);
            buf.put_slice(name);
            buf.put_slice(data);
            (*subtype, RtcpPacketType::App)
        }
        RtcpRecord::Nack(nack) => {
            buf.put_u32(nack.sender_ssrc);
            buf.put_u32(nack.media_ssrc);
            buf.put_u16(nack.packet_id);
            buf.put_u16(nack.bitmask_lost);
            (1, RtcpPacketType::TransportFeedback)
        }
        RtcpRecord::Ack(ack) => {
            buf.put_u32(ack.sender_ssrc);
            buf.put_u32(ack.media_ssrc);
            buf.put_u16(ack.base_sequence_number);
            buf.put_u16(ack.bitmask_received);
            (1, RtcpPacketType::PayloadFeedback)
        }
        RtcpRecord::ExtendedReport { ssrc, data } => {
            buf.put_u32(*ssrc);
            buf.put_slice(data);
            (0, RtcpPacketType::ExtendedReport)
        }
        RtcpRecord::Unknown { packet_type, data } => {
            buf.put_slice(data);
            (0, RtcpPacketType::Unknown(*packet_type))
        }
    };

    while (buf.len() - start) % 4 != 0 {
        buf.put_u8(0);
    }

    let total_len = buf.len() - start;
    let length_words = (total_len / 4) as u16 - 1;

    let header = RtcpHeader {
        version: 2,
        padding: false,
        count,
        packet_type,
        length: length_words,
    };
    let mut header_buf = BytesMut::with_capacity(RtcpHeader::SIZE);
    header.serialize(&mut header_buf);
    buf[start..start + RtcpHeader::SIZE].copy_from_slice(&header_buf);
}

/// Interarrival jitter estimate update (RFC 3550 Section 6.4.1, A.8):
/// `J += (|D| - J) / 16`, where `D` is the difference in relative transit
/// times between two consecutive packets. `jitter` and `d` are both
/// expressed in RTP timestamp units.
pub fn update_jitter(jitter: f64, d: f64) -> f64 {
    jitter + (d.abs() - jitter) / 16.0
}
