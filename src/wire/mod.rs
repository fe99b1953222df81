//! Wire-format codec: RTP and RTCP packet parsing and serialization.

pub mod rtcp;
pub mod rtp;

pub use rtcp::{CompoundRtcpPacket, RtcpHeader, RtcpPacketType, RtcpRecord};
pub use rtp::{ExtensionHeader, RtpHeader, RtpPacket, SubflowInfo};
