use crate::history::History;
use crate::model::{AggregateStatistics, ForwardedPacket, TelemetryRecord, VerifyRequest};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use telemetry_protocol::{OperatingMode, ParseError, SignedPacket, Thresholds, Verdict};

pub const DEFAULT_PENDING_CAPACITY: usize = 16;

/// What happened to a packet on the verification path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Send this request to the verifier now.
    Dispatch(VerifyRequest),
    /// Waiting behind the request in flight.
    Queued { dropped_oldest: bool },
    /// A request is in flight and there is no pending queue.
    Busy,
    /// No verifier link; verification skipped.
    LinkDown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub forward: Forward,
    pub stored: Result<(), ParseError>,
    pub mode_change: Option<OperatingMode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settled {
    /// The verified packet, for the sink.
    pub verified: Option<ForwardedPacket>,
    /// Next request to send, pulled from the pending queue.
    pub dispatch: Option<VerifyRequest>,
    /// No request was in flight; the verdict was ignored.
    pub stale: bool,
}

/// Everything the relay mutates. Owned by the orchestrator task alone.
///
/// The verifier protocol has no request ids, so at most one packet is in
/// flight and a verdict always belongs to `in_flight`.
#[derive(Debug)]
pub struct RelayState {
    history: History,
    thresholds: Thresholds,
    last_published_mode: Option<OperatingMode>,
    link: Option<u64>,
    in_flight: Option<ForwardedPacket>,
    pending: VecDeque<ForwardedPacket>,
    pending_capacity: usize,
}

impl RelayState {
    pub fn new(capacity: NonZeroUsize, thresholds: Thresholds, pending_capacity: usize) -> Self {
        Self {
            history: History::new(capacity),
            thresholds,
            last_published_mode: None,
            link: None,
            in_flight: None,
            pending: VecDeque::with_capacity(pending_capacity),
            pending_capacity,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.history.latest()
    }

    pub fn statistics(&self) -> AggregateStatistics {
        self.history.statistics()
    }

    pub fn verifier_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn in_flight(&self) -> Option<&ForwardedPacket> {
        self.in_flight.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forward (when possible), store and classify one telemetry message.
    /// Storage and classification do not depend on the verifier.
    pub fn on_telemetry(&mut self, raw: String, received_at: DateTime<Utc>) -> Ingested {
        let parsed = SignedPacket::parse(&raw);
        let forward = self.forward(ForwardedPacket { raw, received_at });

        let (stored, mode_change) = match parsed {
            Ok(signed) => {
                let mode = self.thresholds.classify(signed.packet.temperature);
                self.history.push(TelemetryRecord::from_signed(signed, received_at));
                let changed = self.last_published_mode != Some(mode);
                if changed {
                    self.last_published_mode = Some(mode);
                }
                (Ok(()), changed.then_some(mode))
            }
            Err(e) => (Err(e), None),
        };

        Ingested {
            forward,
            stored,
            mode_change,
        }
    }

    pub fn on_verdict(&mut self, verdict: Verdict) -> Settled {
        let Some(packet) = self.in_flight.take() else {
            return Settled {
                stale: true,
                ..Settled::default()
            };
        };

        Settled {
            verified: verdict.is_valid().then_some(packet),
            dispatch: self.dispatch_next(),
            stale: false,
        }
    }

    /// A new link connection. Anything from an earlier connection is gone.
    pub fn on_link_up(&mut self, generation: u64) {
        self.link = Some(generation);
        self.in_flight = None;
        self.pending.clear();
    }

    /// Returns how many packets were left unverified.
    pub fn on_link_down(&mut self) -> usize {
        self.link = None;
        let dropped = self.pending.len() + usize::from(self.in_flight.is_some());
        self.in_flight = None;
        self.pending.clear();
        dropped
    }

    /// Gives up on the in-flight packet when it could not be handed to the
    /// link, and returns the next request to try.
    pub fn abort_in_flight(&mut self) -> Option<VerifyRequest> {
        self.in_flight = None;
        self.dispatch_next()
    }

    fn forward(&mut self, packet: ForwardedPacket) -> Forward {
        let Some(generation) = self.link else {
            return Forward::LinkDown;
        };

        if self.in_flight.is_none() {
            let request = VerifyRequest {
                generation,
                raw: packet.raw.clone(),
            };
            self.in_flight = Some(packet);
            return Forward::Dispatch(request);
        }

        if self.pending_capacity == 0 {
            return Forward::Busy;
        }

        let dropped_oldest = if self.pending.len() >= self.pending_capacity {
            self.pending.pop_front();
            true
        } else {
            false
        };
        self.pending.push_back(packet);
        Forward::Queued { dropped_oldest }
    }

    fn dispatch_next(&mut self) -> Option<VerifyRequest> {
        let generation = self.link?;
        let next = self.pending.pop_front()?;
        let request = VerifyRequest {
            generation,
            raw: next.raw.clone(),
        };
        self.in_flight = Some(next);
        Some(request)
    }
}
