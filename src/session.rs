//! # TX/RX Session
//!
//! The application-facing layer: an explicit state machine that owns the
//! operation coordinator, the peer registry and the link statistics, and
//! advances one radio operation per [`step`](LinkSession::step) call:
//!
//! ```text
//! Init -> AwaitCapability -> (Receive <-> TransmitTargeted) -> Shutdown -> Terminated
//! ```
//!
//! Receive windows dominate the session. Every control receipt that arrives
//! during one feeds the peer registry, every data receipt feeds the running
//! link average, and CRC failures are counted without ending the window.
//! After each window the session checks the exit flag, then the button
//! signal: a one-hot button mask targets the peer in the matching registry
//! slot with a unicast carrying the button code.
//!
//! Failed operations do not end the session (the coordinator already logged
//! them); the two exceptions are a failed initialization, which sets the
//! exit flag, and a rejected submission, which means the machine lost its
//! one-operation discipline and winds down through Shutdown.

use crate::coordinator::{OperationCoordinator, OperationKind, OperationOutcome, SubmissionError};
use crate::headers::{
    ControlHeader, HeaderBlock, PacketLengthType, ShortBroadcastHeader, UnicastHeader,
    HEADER_FORMAT_TYPE1, HEADER_FORMAT_TYPE2_NO_HARQ,
};
use crate::link_quality::LinkQualityMonitor;
use crate::payload::{ButtonCommand, PresenceReport, RadioPayload};
use crate::peer_registry::{ObserveOutcome, PeerRegistry};
use crate::phy::{
    CapabilityReport, InitParams, PhyRequest, PhyStatus, RxFilter, RxParams, SignalInfo, TxParams,
};
use crate::{ButtonSignal, LinkConfig, SessionEvent, SessionEventSender, MAX_PEER_DEVICES};
use log::{log, Level};

/// Correlation handle of every transmit operation.
pub const TRANSMIT_HANDLE: u32 = 0;
/// Correlation handle of every receive window.
pub const RECEIVE_HANDLE: u32 = 1;

/// Frames carry a single subslot of data.
const PACKET_SUBSLOT_COUNT: u8 = 1;

/// Where the session currently stands. Returned by every
/// [`step`](LinkSession::step) so the application can drive the machine to
/// [`Terminated`](SessionPhase::Terminated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Modem initialization is the next operation.
    Init,
    /// Device capabilities are queried and logged next.
    AwaitCapability,
    /// The session listens; receipts fill the registry and the statistics.
    Receive,
    /// A button press was resolved; a targeted unicast is the next
    /// operation.
    TransmitTargeted { button_mask: u8 },
    /// The modem is released next.
    Shutdown,
    /// Final state; further steps do nothing.
    Terminated,
}

/// Maps a one-hot button mask to the peer registry slot it targets. The
/// fourth button (mask 8) is reserved and maps to nothing, as does any
/// non-one-hot mask.
pub fn select_target(button_mask: u8) -> Option<usize> {
    match button_mask {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        _ => None,
    }
}

/// Everything a receive window mutates: the peer registry, the link
/// statistics, the CRC failure counter and the exit flag. Owned by the
/// session and lent to the coordinator while an operation is in flight, so
/// receipts are folded in before the waiting caller resumes.
pub struct SessionState {
    peers: PeerRegistry<MAX_PEER_DEVICES>,
    link: LinkQualityMonitor,
    crc_failures: u32,
    exit_requested: bool,
    session_event_sender: SessionEventSender,
}

impl SessionState {
    pub fn new(session_event_sender: SessionEventSender) -> Self {
        Self {
            peers: PeerRegistry::new(),
            link: LinkQualityMonitor::new(),
            crc_failures: 0,
            exit_requested: false,
            session_event_sender,
        }
    }

    /// A control channel receipt: the transmitter identity goes into the
    /// peer registry. Headers with a format this layer does not speak are
    /// logged and ignored.
    pub fn handle_control_received(&mut self, header: &HeaderBlock, signal: SignalInfo) {
        let Some(control) = ControlHeader::from_block(header) else {
            log!(
                Level::Warn,
                "Received control header with unknown format, ignoring"
            );
            return;
        };
        let transmitter_id = control.transmitter_id();
        log!(
            Level::Info,
            "Received header from device {}, RSSI-2: {}",
            transmitter_id,
            signal.rssi_2
        );
        match self.peers.observe(transmitter_id) {
            ObserveOutcome::Inserted(slot) => {
                log!(
                    Level::Info,
                    "Registered peer device {} in slot {}",
                    transmitter_id,
                    slot
                );
                self.emit(SessionEvent::PeerDiscovered {
                    peer_id: transmitter_id,
                    slot,
                });
            }
            ObserveOutcome::AlreadyKnown(_) => {}
            ObserveOutcome::Full => {
                log::trace!("Peer table full, dropping device {}", transmitter_id);
            }
        }
    }

    /// A data channel receipt: the signal reading folds into the running
    /// average and the 32-bit payload record is logged when present.
    pub fn handle_data_received(&mut self, payload: &RadioPayload, signal: SignalInfo) {
        let dbm = self.link.record(signal.rssi_2, true);
        match PresenceReport::from_payload(payload) {
            Some(record) => log!(
                Level::Info,
                "RX (RSSI: {} dBm, avg: {:.1} dBm): {}",
                dbm,
                self.link.average_dbm(),
                record.transmitter_id
            ),
            None => log!(
                Level::Info,
                "RX (RSSI: {} dBm, avg: {:.1} dBm): {} bytes",
                dbm,
                self.link.average_dbm(),
                payload.as_slice().len()
            ),
        }
        self.emit(SessionEvent::LinkQualitySample {
            dbm,
            averaged: true,
        });
    }

    pub fn handle_control_crc_failure(&mut self, signal: SignalInfo) {
        self.record_crc_failure("control", signal);
    }

    pub fn handle_data_crc_failure(&mut self, signal: SignalInfo) {
        self.record_crc_failure("data", signal);
    }

    /// CRC failures are counted and their signal reading is converted for
    /// logging, but they never move the running average.
    fn record_crc_failure(&mut self, channel: &str, signal: SignalInfo) {
        self.crc_failures += 1;
        let dbm = self.link.record(signal.rssi_2, false);
        log!(
            Level::Warn,
            "CRC error on {} channel, RSSI: {} dBm, CRC error count: {}, continuing",
            channel,
            dbm,
            self.crc_failures
        );
        self.emit(SessionEvent::LinkQualitySample {
            dbm,
            averaged: false,
        });
    }

    /// Marks the session for termination. The receive loop winds down at
    /// the next phase boundary.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn crc_failure_count(&self) -> u32 {
        self.crc_failures
    }

    pub fn peers(&self) -> &PeerRegistry<MAX_PEER_DEVICES> {
        &self.peers
    }

    pub fn link(&self) -> &LinkQualityMonitor {
        &self.link
    }

    fn emit(&self, event: SessionEvent) {
        if self.session_event_sender.try_send(event).is_err() {
            log!(Level::Warn, "Session event queue full, dropping event");
        }
    }
}

/// One radio session: the coordinator, the session state and the link
/// configuration, driven phase by phase by the application.
pub struct LinkSession {
    coordinator: OperationCoordinator,
    state: SessionState,
    config: LinkConfig,
    device_id: u16,
    phase: SessionPhase,
    button_signal: &'static ButtonSignal,
}

impl LinkSession {
    pub(crate) fn new(
        coordinator: OperationCoordinator,
        state: SessionState,
        config: LinkConfig,
        device_id: u16,
        button_signal: &'static ButtonSignal,
    ) -> Self {
        Self {
            coordinator,
            state,
            config,
            device_id,
            phase: SessionPhase::Init,
            button_signal,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn should_exit(&self) -> bool {
        self.state.exit_requested()
    }

    /// Asks the session to wind down; honored after the current receive
    /// window closes.
    pub fn request_stop(&mut self) {
        self.state.request_exit();
    }

    /// Running link average over successful data receipts, 0.0 before the
    /// first sample.
    pub fn current_average_dbm(&self) -> f32 {
        self.state.link().average_dbm()
    }

    pub fn link_sample_count(&self) -> u32 {
        self.state.link().sample_count()
    }

    pub fn crc_failure_count(&self) -> u32 {
        self.state.crc_failure_count()
    }

    pub fn peer_count(&self) -> usize {
        self.state.peers().count()
    }

    /// Short broadcast header announcing this device: transmitter identity
    /// is our own, the short network id is the low byte of the configured
    /// network id, MCS and power come from the configuration.
    pub fn build_broadcast_header(&self) -> ControlHeader {
        ControlHeader::ShortBroadcast(ShortBroadcastHeader {
            packet_length: PACKET_SUBSLOT_COUNT,
            packet_length_type: PacketLengthType::Subslots,
            header_format: HEADER_FORMAT_TYPE1,
            short_network_id: (self.config.network_id & 0xFF) as u8,
            transmitter_id: self.device_id,
            df_mcs: self.config.mcs,
            reserved: 0,
            transmit_power: self.config.transmit_power,
        })
    }

    /// Unicast header without HARQ feedback control, addressed to
    /// `receiver_id`. The feedback bits are zero; the receiver ignores
    /// them.
    pub fn build_unicast_header(&self, receiver_id: u16) -> ControlHeader {
        ControlHeader::Unicast(UnicastHeader {
            packet_length: PACKET_SUBSLOT_COUNT,
            packet_length_type: PacketLengthType::Subslots,
            header_format: HEADER_FORMAT_TYPE2_NO_HARQ,
            short_network_id: (self.config.network_id & 0xFF) as u8,
            transmitter_id: self.device_id,
            df_mcs: self.config.mcs,
            transmit_power: self.config.transmit_power,
            receiver_id,
            reserved: 0,
            spatial_streams: 0,
            feedback_format: 0,
            feedback_info: 0,
        })
    }

    /// Broadcasts `payload` under a short broadcast header and waits for
    /// the transmit completion.
    pub async fn transmit_broadcast(
        &mut self,
        payload: RadioPayload,
    ) -> Result<PhyStatus, SubmissionError> {
        let header = self.build_broadcast_header();
        log::trace!("Broadcasting as device {}", self.device_id);
        self.transmit(header, payload).await
    }

    /// Sends `payload` to one peer under a unicast header and waits for the
    /// transmit completion.
    pub async fn transmit_unicast(
        &mut self,
        receiver_id: u16,
        payload: RadioPayload,
    ) -> Result<PhyStatus, SubmissionError> {
        let header = self.build_unicast_header(receiver_id);
        log::trace!("Unicast from device {} to device {}", self.device_id, receiver_id);
        self.transmit(header, payload).await
    }

    async fn transmit(
        &mut self,
        header: ControlHeader,
        payload: RadioPayload,
    ) -> Result<PhyStatus, SubmissionError> {
        let params = TxParams {
            handle: TRANSMIT_HANDLE,
            network_id: self.config.network_id,
            carrier: self.config.carrier,
            header: header.to_block(),
            payload,
        };
        let outcome = self
            .coordinator
            .execute(
                OperationKind::Transmit,
                TRANSMIT_HANDLE,
                PhyRequest::Transmit(params),
                &mut self.state,
            )
            .await?;
        Ok(outcome.status())
    }

    /// Opens one receive window of the configured length and waits for it
    /// to close. Receipts arriving during the window are folded into the
    /// session state before this returns.
    pub async fn receive_window(&mut self) -> Result<PhyStatus, SubmissionError> {
        let params = RxParams {
            handle: RECEIVE_HANDLE,
            carrier: self.config.carrier,
            duration_ticks: self.config.receive_window_ticks,
            network_id: self.config.network_id,
            rssi_level_dbm: self.config.rssi_threshold_dbm,
            filter: RxFilter {
                short_network_id: (self.config.network_id & 0xFF) as u8,
                receiver_identity: 0,
            },
        };
        let outcome = self
            .coordinator
            .execute(
                OperationKind::Receive,
                RECEIVE_HANDLE,
                PhyRequest::Receive(params),
                &mut self.state,
            )
            .await?;
        Ok(outcome.status())
    }

    /// Queries the modem's device capabilities.
    pub async fn query_capabilities(
        &mut self,
    ) -> Result<(PhyStatus, CapabilityReport), SubmissionError> {
        let outcome = self
            .coordinator
            .execute(
                OperationKind::CapabilityQuery,
                0,
                PhyRequest::QueryCapabilities,
                &mut self.state,
            )
            .await?;
        match outcome {
            OperationOutcome::CapabilityQuery { status, report } => Ok((status, report)),
            other => Ok((other.status(), CapabilityReport::EMPTY)),
        }
    }

    /// Runs the next radio operation of the current phase and returns the
    /// phase the session moved to.
    pub async fn step(&mut self) -> SessionPhase {
        self.phase = match self.phase {
            SessionPhase::Init => self.run_init().await,
            SessionPhase::AwaitCapability => self.run_await_capability().await,
            SessionPhase::Receive => self.run_receive().await,
            SessionPhase::TransmitTargeted { button_mask } => {
                self.run_transmit_targeted(button_mask).await
            }
            SessionPhase::Shutdown => self.run_shutdown().await,
            SessionPhase::Terminated => SessionPhase::Terminated,
        };
        self.phase
    }

    async fn run_init(&mut self) -> SessionPhase {
        let request = PhyRequest::Init(InitParams {
            harq_rx_expiry_time_us: self.config.harq_rx_expiry_time_us,
            harq_rx_process_count: self.config.harq_rx_process_count,
        });
        match self
            .coordinator
            .execute(OperationKind::Init, 0, request, &mut self.state)
            .await
        {
            Ok(OperationOutcome::Init {
                status,
                temperature,
            }) if status.is_ok() => {
                log!(
                    Level::Info,
                    "Modem initialized, temperature: {}°C",
                    temperature
                );
                SessionPhase::AwaitCapability
            }
            // A failed initialization already set the exit flag.
            Ok(_) => SessionPhase::Shutdown,
            Err(error) => {
                log!(
                    Level::Error,
                    "Could not submit modem initialization: {:?}",
                    error
                );
                SessionPhase::Shutdown
            }
        }
    }

    async fn run_await_capability(&mut self) -> SessionPhase {
        match self.query_capabilities().await {
            Ok((status, report)) if status.is_ok() => {
                log_capability_report(&report);
                SessionPhase::Receive
            }
            // A modem without a readable capability report can still run
            // the session; the coordinator logged the failure.
            Ok(_) => SessionPhase::Receive,
            Err(error) => {
                log!(
                    Level::Error,
                    "Could not submit capability query: {:?}",
                    error
                );
                SessionPhase::Shutdown
            }
        }
    }

    async fn run_receive(&mut self) -> SessionPhase {
        if let Err(error) = self.receive_window().await {
            log!(
                Level::Error,
                "Could not submit receive window: {:?}",
                error
            );
            return SessionPhase::Shutdown;
        }
        if self.state.exit_requested() {
            return SessionPhase::Shutdown;
        }
        match self.button_signal.try_take() {
            Some(button_mask) => {
                if self.state.peers().is_empty() {
                    log!(
                        Level::Info,
                        "Button {} pressed but no peer devices are known yet",
                        button_mask
                    );
                    SessionPhase::Receive
                } else {
                    SessionPhase::TransmitTargeted { button_mask }
                }
            }
            None => SessionPhase::Receive,
        }
    }

    async fn run_transmit_targeted(&mut self, button_mask: u8) -> SessionPhase {
        let Some(slot) = select_target(button_mask) else {
            log!(
                Level::Warn,
                "Button mask {} has no transmit mapping, ignoring",
                button_mask
            );
            return SessionPhase::Receive;
        };
        let Some(receiver_id) = self.state.peers().get(slot) else {
            log!(
                Level::Warn,
                "No peer device in slot {} for button {}, ignoring",
                slot,
                button_mask
            );
            return SessionPhase::Receive;
        };
        let payload = ButtonCommand {
            button_code: button_mask as u32,
        }
        .to_payload();
        match self.transmit_unicast(receiver_id, payload).await {
            Ok(status) => {
                if status.is_ok() {
                    log!(Level::Info, "TX: {}", button_mask);
                }
                SessionPhase::Receive
            }
            Err(error) => {
                log!(Level::Error, "Could not submit unicast: {:?}", error);
                SessionPhase::Shutdown
            }
        }
    }

    async fn run_shutdown(&mut self) -> SessionPhase {
        match self
            .coordinator
            .execute(OperationKind::Deinit, 0, PhyRequest::Deinit, &mut self.state)
            .await
        {
            Ok(outcome) => {
                if outcome.status().is_ok() {
                    log!(Level::Info, "Modem released");
                }
            }
            Err(error) => {
                log!(Level::Error, "Could not submit modem release: {:?}", error);
            }
        }
        SessionPhase::Terminated
    }
}

fn log_capability_report(report: &CapabilityReport) {
    log!(
        Level::Info,
        "Modem capabilities, DECT version: {}, variants: {}",
        report.dect_version,
        report.variant_count
    );
    for variant in report.active_variants() {
        log!(Level::Info, "Power class: {}", variant.power_class);
        log!(
            Level::Info,
            "RX spatial streams: {}",
            variant.rx_spatial_streams
        );
        log!(Level::Info, "RX/TX diversity: {}", variant.rx_tx_diversity);
        log!(Level::Info, "RX gain: {}", variant.rx_gain);
        log!(Level::Info, "Max MCS: {}", variant.mcs_max);
        log!(
            Level::Info,
            "HARQ soft buffer size: {}",
            variant.harq_soft_buf_size
        );
        log!(
            Level::Info,
            "Max HARQ processes: {}",
            variant.harq_process_count_max
        );
        log!(
            Level::Info,
            "HARQ feedback delay: {}",
            variant.harq_feedback_delay
        );
        log!(Level::Info, "Subcarrier scaling factor: {}", variant.mu);
        log!(
            Level::Info,
            "Fourier transform scaling factor: {}",
            variant.beta
        );
    }
}
