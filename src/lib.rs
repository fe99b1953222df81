//! Core real-time transport layer for an RTP/RTCP media endpoint.
//!
//! This crate implements the wire formats, member bookkeeping, jitter
//! buffering, loss prediction, and RTCP scheduling that sit beneath an
//! application's media pipeline:
//! - RTP/RTCP codec (RFC 3550, RFC 4585, RFC 5285)
//! - Remote member database with RFC 3550 Appendix A.1 sequence validation
//! - Jitter buffer and playout scheduling
//! - Pluggable loss predictors and NACK/ACK feedback generation
//! - RTX retransmission buffer
//! - RTCP transmission-timer and compound-report assembly
//! - A deterministic, trait-driven event loop and transport/media seams
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

pub mod config;
pub mod error;
pub mod jitter;
pub mod loss;
pub mod media_io;
pub mod random;
pub mod rtcp;
pub mod rtx;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{FeedbackMode, PredictorKind, SessionConfig};
pub use error::{TransportError, TransportResult};
pub use jitter::{InsertOutcome, JitterBuffer, JitterBufferConfig, PlayoutGroup, PlayoutStats};
pub use loss::{Ar2Predictor, FeedbackBatch, FeedbackGenerator, MovingAveragePredictor, Predictor, PredictorEvent, RtxArrival, SimplePredictor};
pub use media_io::{AccessUnit, Packetizer, PassthroughPacketizer, ReleasedAccessUnit};
pub use random::{RandomSource, SeededRandom, StdRandom};
pub use rtcp::{ReportManager, SchedulerDecision, TransmissionTimer};
pub use rtx::{RtxBuffer, RtxMode, RtxRecord};
pub use runtime::{EventLoop, LocalLoop, TimerHandle};
pub use scheduler::{FixedRateController, RateController};
pub use session::{InboundOutcome, LocalState, MemberDatabase, MemberEntry, RtpSession};
pub use transport::{SendOutcome, SessionSource, TransportSink};
pub use wire::{
    CompoundRtcpPacket, ExtensionHeader, RtcpHeader, RtcpPacketType, RtcpRecord, RtpHeader, RtpPacket, SubflowInfo,
};
