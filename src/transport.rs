//! External transport interfaces (spec.md §6), kept as trait objects on
//! both sides so that scheduler -> session -> transport -> session forms no
//! ownership cycle (spec.md §9 design note).
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

use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::SystemTime;

/// A completed send's outcome: the completion callback contract of
/// spec.md §6 requires this fire exactly once per `send`.
#[derive(Debug, Clone, Copy)]
pub struct SendOutcome {
    pub bytes_written: usize,
}

/// The session's view of the transport: outbound datagrams go through here.
/// The session holds this as a trait object; it does not own the transport.
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn send(&self, buffer: Bytes, dest: SocketAddr) -> TransportResult<SendOutcome>;
}

/// The transport's view of the session: inbound datagrams are delivered
/// through here. The transport holds this as a trait object; it does not
/// own the session.
pub trait SessionSource: Send + Sync {
    fn recv(&self, buffer: Bytes, source: SocketAddr, arrival_wall_time: SystemTime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingSink {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send(&self, buffer: Bytes, _dest: SocketAddr) -> TransportResult<SendOutcome> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(SendOutcome {
                bytes_written: buffer.len(),
            })
        }
    }

    #[tokio::test]
    async fn sink_trait_object_can_be_invoked_through_a_box() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink: Box<dyn TransportSink> = Box::new(RecordingSink { sent: sent.clone() });
        let outcome = sink
            .send(Bytes::from_static(b"hi"), "127.0.0.1:5000".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 2);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
