use crate::errors::{Error, Result};
use crate::metrics::{
    HISTORY_SIZE, MODE_CHANGES_TOTAL, PARSE_FAILURES_TOTAL, PENDING_DROPPED_TOTAL,
    SINK_FAILURES_TOTAL, VERIFICATIONS_REQUESTED_TOTAL, VERIFICATION_SKIPPED_TOTAL,
    VERIFIED_INVALID_TOTAL, VERIFIED_VALID_TOTAL, VERIFIER_LINK_UP,
};
use crate::model::{
    AggregateStatistics, ForwardedPacket, HistoryResponse, TelemetryRecord, VerifyRequest,
};
use crate::state::{Forward, RelayState};
use chrono::Utc;
use telemetry_protocol::{OperatingMode, Verdict};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Messages to the orchestrator task, the single owner of [`RelayState`].
#[derive(Debug)]
pub enum Command {
    Telemetry(String),
    Verdict(Verdict),
    LinkUp { generation: u64 },
    LinkDown,
    Latest(oneshot::Sender<Option<TelemetryRecord>>),
    History {
        limit: Option<usize>,
        reply: oneshot::Sender<HistoryResponse>,
    },
    Statistics(oneshot::Sender<AggregateStatistics>),
    VerifierStatus(oneshot::Sender<bool>),
}

/// Cloneable mailbox address of the orchestrator.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<Command>,
}

pub fn channel(capacity: usize) -> (RelayHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelayHandle { tx }, rx)
}

impl RelayHandle {
    pub async fn submit_telemetry(&self, raw: String) -> Result<()> {
        self.send(Command::Telemetry(raw)).await
    }

    pub async fn report_verdict(&self, verdict: Verdict) -> Result<()> {
        self.send(Command::Verdict(verdict)).await
    }

    pub async fn link_up(&self, generation: u64) -> Result<()> {
        self.send(Command::LinkUp { generation }).await
    }

    pub async fn link_down(&self) -> Result<()> {
        self.send(Command::LinkDown).await
    }

    pub async fn latest(&self) -> Result<Option<TelemetryRecord>> {
        self.request(Command::Latest).await
    }

    pub async fn history(&self, limit: Option<usize>) -> Result<HistoryResponse> {
        self.request(|reply| Command::History { limit, reply }).await
    }

    pub async fn statistics(&self) -> Result<AggregateStatistics> {
        self.request(Command::Statistics).await
    }

    pub async fn verifier_connected(&self) -> Result<bool> {
        self.request(Command::VerifierStatus).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::ChannelSend)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

/// Where the orchestrator's side effects go.
pub struct Outputs {
    pub verifier: mpsc::Sender<VerifyRequest>,
    pub modes: mpsc::Sender<OperatingMode>,
    pub sink: mpsc::Sender<ForwardedPacket>,
}

pub async fn run_orchestrator(
    mut rx: mpsc::Receiver<Command>,
    mut state: RelayState,
    outputs: Outputs,
) {
    info!(
        "Starting orchestrator with history capacity {}",
        state.history().capacity()
    );

    while let Some(command) = rx.recv().await {
        handle(&mut state, &outputs, command);
    }

    info!("Orchestrator stopped");
}

fn handle(state: &mut RelayState, outputs: &Outputs, command: Command) {
    match command {
        Command::Telemetry(raw) => on_telemetry(state, outputs, raw),
        Command::Verdict(verdict) => on_verdict(state, outputs, verdict),
        Command::LinkUp { generation } => {
            state.on_link_up(generation);
            VERIFIER_LINK_UP.set(1.0);
            info!("Verifier link up (connection {})", generation);
        }
        Command::LinkDown => {
            let unverified = state.on_link_down();
            VERIFIER_LINK_UP.set(0.0);
            warn!("Verifier link down, {} packets left unverified", unverified);
        }
        Command::Latest(reply) => {
            let _ = reply.send(state.latest().cloned());
        }
        Command::History { limit, reply } => {
            let history = state.history();
            let data = match limit {
                Some(limit) => history.recent(limit),
                None => history.to_vec(),
            };
            let _ = reply.send(HistoryResponse {
                total: data.len(),
                capacity: history.capacity(),
                data,
            });
        }
        Command::Statistics(reply) => {
            let _ = reply.send(state.statistics());
        }
        Command::VerifierStatus(reply) => {
            let _ = reply.send(state.verifier_connected());
        }
    }
}

fn on_telemetry(state: &mut RelayState, outputs: &Outputs, raw: String) {
    let ingested = state.on_telemetry(raw, Utc::now());

    match ingested.forward {
        Forward::Dispatch(request) => dispatch(state, outputs, request),
        Forward::Queued { dropped_oldest } => {
            if dropped_oldest {
                PENDING_DROPPED_TOTAL.inc();
                warn!("Verification queue full, oldest pending packet dropped");
            }
        }
        Forward::Busy => {
            VERIFICATION_SKIPPED_TOTAL.inc();
            debug!("Verifier busy, skipping verification");
        }
        Forward::LinkDown => {
            VERIFICATION_SKIPPED_TOTAL.inc();
            debug!("Verifier link down, skipping verification");
        }
    }

    if let Err(e) = &ingested.stored {
        PARSE_FAILURES_TOTAL.inc();
        warn!("Telemetry not stored: {}", e);
    }
    HISTORY_SIZE.set(state.history().len() as f64);

    if let Some(mode) = ingested.mode_change {
        info!("Derived mode changed to {}", mode);
        match outputs.modes.try_send(mode) {
            Ok(()) => MODE_CHANGES_TOTAL.inc(),
            Err(e) => warn!("Failed to queue mode change {}: {}", mode, e),
        }
    }
}

fn on_verdict(state: &mut RelayState, outputs: &Outputs, verdict: Verdict) {
    let settled = state.on_verdict(verdict);
    if settled.stale {
        warn!("Verdict {} with no packet in flight, ignoring", verdict);
        return;
    }

    match verdict {
        Verdict::Valid => VERIFIED_VALID_TOTAL.inc(),
        Verdict::Invalid => {
            VERIFIED_INVALID_TOTAL.inc();
            warn!("Verifier rejected packet");
        }
    }

    if let Some(packet) = settled.verified {
        if let Err(e) = outputs.sink.try_send(packet) {
            SINK_FAILURES_TOTAL.inc();
            warn!("Sink unavailable, verified packet dropped: {}", e);
        }
    }

    if let Some(request) = settled.dispatch {
        dispatch(state, outputs, request);
    }
}

fn dispatch(state: &mut RelayState, outputs: &Outputs, mut request: VerifyRequest) {
    loop {
        match outputs.verifier.try_send(request) {
            Ok(()) => {
                VERIFICATIONS_REQUESTED_TOTAL.inc();
                return;
            }
            Err(TrySendError::Full(_)) => {
                VERIFICATION_SKIPPED_TOTAL.inc();
                warn!("Verifier link busy, packet left unverified");
                match state.abort_in_flight() {
                    Some(next) => request = next,
                    None => return,
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Verifier link task gone");
                state.on_link_down();
                VERIFIER_LINK_UP.set(0.0);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use telemetry_protocol::{SignedPacket, TelemetryPacket, Thresholds};
    use tokio::task::JoinHandle;

    struct Harness {
        relay: RelayHandle,
        verifier_rx: mpsc::Receiver<VerifyRequest>,
        mode_rx: mpsc::Receiver<OperatingMode>,
        sink_rx: mpsc::Receiver<ForwardedPacket>,
        task: JoinHandle<()>,
    }

    fn spawn(capacity: usize) -> Harness {
        spawn_with(capacity, 4)
    }

    fn spawn_with(capacity: usize, verifier_capacity: usize) -> Harness {
        let (relay, commands) = channel(32);
        let (verifier, verifier_rx) = mpsc::channel(verifier_capacity);
        let (modes, mode_rx) = mpsc::channel(16);
        let (sink, sink_rx) = mpsc::channel(16);
        let state = RelayState::new(
            NonZeroUsize::new(capacity).unwrap(),
            Thresholds::default(),
            8,
        );
        let task = tokio::spawn(run_orchestrator(
            commands,
            state,
            Outputs {
                verifier,
                modes,
                sink,
            },
        ));
        Harness {
            relay,
            verifier_rx,
            mode_rx,
            sink_rx,
            task,
        }
    }

    fn raw(temperature: f64, timestamp: u64) -> String {
        SignedPacket::sign(
            TelemetryPacket {
                vin: "VIN1".to_string(),
                temperature,
                mileage: 1000 + timestamp,
                state: Thresholds::default().classify(temperature),
                dtc: None,
                timestamp,
            },
            "VIN1",
        )
        .encode()
    }

    #[test]
    fn test_pipeline_without_verifier() {
        tokio_test::block_on(async {
            let mut h = spawn(10);
            for (i, t) in [20.0, 35.0, 45.0].into_iter().enumerate() {
                h.relay.submit_telemetry(raw(t, i as u64)).await.unwrap();
            }

            let stats = h.relay.statistics().await.unwrap();
            assert_eq!(stats.count, 3);
            assert_eq!(stats.max, 45.0);
            assert!(!h.relay.verifier_connected().await.unwrap());
            assert_eq!(h.relay.latest().await.unwrap().unwrap().timestamp, 2);

            assert_eq!(h.mode_rx.recv().await, Some(OperatingMode::Normal));
            assert_eq!(h.mode_rx.recv().await, Some(OperatingMode::Warning));
            assert_eq!(h.mode_rx.recv().await, Some(OperatingMode::Critical));
            assert!(h.verifier_rx.try_recv().is_err());

            drop(h.relay);
            h.task.await.unwrap();
        });
    }

    #[test]
    fn test_valid_verdict_reaches_sink() {
        tokio_test::block_on(async {
            let mut h = spawn(10);
            h.relay.link_up(1).await.unwrap();

            let first = raw(25.0, 1);
            let second = raw(26.0, 2);
            h.relay.submit_telemetry(first.clone()).await.unwrap();
            h.relay.submit_telemetry(second.clone()).await.unwrap();

            let request = h.verifier_rx.recv().await.unwrap();
            assert_eq!(request.raw, first);
            assert!(h.verifier_rx.try_recv().is_err(), "second request sent while first in flight");

            h.relay.report_verdict(Verdict::Valid).await.unwrap();
            assert_eq!(h.sink_rx.recv().await.unwrap().raw, first);

            let request = h.verifier_rx.recv().await.unwrap();
            assert_eq!(request.raw, second);

            h.relay.report_verdict(Verdict::Invalid).await.unwrap();
            assert!(h.relay.verifier_connected().await.unwrap());
            assert!(h.sink_rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_history_query_with_limit() {
        tokio_test::block_on(async {
            let h = spawn(3);
            for i in 0..5 {
                h.relay.submit_telemetry(raw(25.0, i)).await.unwrap();
            }
            h.relay.submit_telemetry("garbage".to_string()).await.unwrap();

            let all = h.relay.history(None).await.unwrap();
            assert_eq!(all.total, 3);
            assert_eq!(all.capacity, 3);
            let stamps: Vec<u64> = all.data.iter().map(|r| r.timestamp).collect();
            assert_eq!(stamps, vec![2, 3, 4]);

            let recent = h.relay.history(Some(1)).await.unwrap();
            assert_eq!(recent.data[0].timestamp, 4);
        });
    }

    #[test]
    fn test_link_down_drops_in_flight() {
        tokio_test::block_on(async {
            let mut h = spawn(10);
            h.relay.link_up(1).await.unwrap();
            h.relay.submit_telemetry(raw(25.0, 1)).await.unwrap();
            h.verifier_rx.recv().await.unwrap();

            h.relay.link_down().await.unwrap();
            h.relay.report_verdict(Verdict::Valid).await.unwrap();

            assert!(!h.relay.verifier_connected().await.unwrap());
            assert!(h.sink_rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_full_link_channel_abandons_packet() {
        tokio_test::block_on(async {
            let mut h = spawn_with(10, 1);
            h.relay.link_up(1).await.unwrap();

            let first = raw(25.0, 1);
            h.relay.submit_telemetry(first.clone()).await.unwrap();
            h.relay.submit_telemetry(raw(26.0, 2)).await.unwrap();

            // The link never drained `first`, so the queued packet cannot be
            // handed over and is given up.
            h.relay.report_verdict(Verdict::Valid).await.unwrap();
            assert_eq!(h.sink_rx.recv().await.unwrap().raw, first);

            h.relay.report_verdict(Verdict::Valid).await.unwrap();
            assert!(h.relay.verifier_connected().await.unwrap());
            assert!(h.sink_rx.try_recv().is_err());

            assert_eq!(h.verifier_rx.recv().await.unwrap().raw, first);
            assert!(h.verifier_rx.try_recv().is_err());

            let next = raw(27.0, 3);
            h.relay.submit_telemetry(next.clone()).await.unwrap();
            assert_eq!(h.verifier_rx.recv().await.unwrap().raw, next);
        });
    }

    #[test]
    fn test_closed_link_channel_marks_link_down() {
        tokio_test::block_on(async {
            let h = spawn(10);
            h.relay.link_up(1).await.unwrap();
            assert!(h.relay.verifier_connected().await.unwrap());

            drop(h.verifier_rx);
            h.relay.submit_telemetry(raw(25.0, 1)).await.unwrap();

            assert!(!h.relay.verifier_connected().await.unwrap());
            assert_eq!(h.relay.statistics().await.unwrap().count, 1);
        });
    }
}
