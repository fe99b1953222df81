//! Error types for the RTP/RTCP transport core
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


use thiserror::Error;

/// Result type for transport-core operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in the transport core.
///
/// Most variants here never reach an application: per the propagation
/// policy, codec/validation failures and SSRC collisions are handled
/// locally and only logged. `TransportFailure` is the sole variant the
/// session returns to its caller.
#[derive(Error, Debug)]
pub enum TransportError {
    /// RTP or RTCP wire-format framing violation.
    #[error("malformed datagram: {0}")]
    MalformedDatagram(String),

    /// A feedback record targeted an SSRC the session database has never seen.
    #[error("feedback targets unknown SSRC {ssrc:#010x}")]
    UnknownSsrcInFeedback { ssrc: u32 },

    /// Our own SSRC collided with a remote endpoint; recovered by re-keying.
    #[error("SSRC collision: {old_ssrc:#010x} replaced by {new_ssrc:#010x}")]
    SsrcCollision { old_ssrc: u32, new_ssrc: u32 },

    /// A retransmission was requested for a sequence number no longer held.
    #[error("RTX lookup miss for sequence number {sequence_number}")]
    RtxLookupMiss { sequence_number: u16 },

    /// The transport layer failed to emit a datagram.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A member was removed after five silent RTCP intervals.
    #[error("member timed out: SSRC {ssrc:#010x}")]
    MemberTimeout { ssrc: u32 },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::TransportFailure(err.to_string())
    }
}
