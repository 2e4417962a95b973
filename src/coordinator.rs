//! # Operation Coordinator
//!
//! Serializes access to the modem: exactly one radio operation may be
//! outstanding at any time. Submission is synchronous accept/reject, so a
//! caller knows immediately whether the modem took the request; completion
//! is an asynchronous wait on the notification channel.
//!
//! The modem raises more than completions while a receive window is open.
//! Control and data receipts, CRC failures and RSSI samples arrive on the
//! same channel, interleaved with the completion the caller is waiting for.
//! [`wait_completion`](OperationCoordinator::wait_completion) dispatches
//! those to the session state as they arrive and keeps waiting, so receipt
//! handling never depends on the caller's polling.
//!
//! Three failure classes are kept apart: a rejected submission (the
//! caller's turn never started), a completion with a failure status (the
//! operation ran and failed; logged, never retried here), and a failed
//! initialization (the one failure the session cannot outlive, it sets the
//! session exit flag no matter which operation was being awaited).

use log::{log, Level};

use crate::phy::{CapabilityReport, PhyNotification, PhyRequest, PhyStatus};
use crate::session::SessionState;
use crate::{PhyNotificationReceiver, PhyRequestSender};

/// The operation classes the modem accepts, used to pair completions with
/// the request that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Init,
    Deinit,
    Transmit,
    Receive,
    RxStop,
    LinkConfigure,
    TimeQuery,
    CapabilityQuery,
}

/// The single in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    /// Caller-chosen correlation value, echoed by transmit/receive
    /// completions. Other kinds carry no handle and match by kind alone.
    pub handle: u32,
}

/// Why a submission was rejected. Either way the coordinator stays idle and
/// no notification will ever arrive for the rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionError {
    /// An earlier operation has not completed yet.
    OperationPending,
    /// The modem has not consumed the previous request from its queue.
    ModemBusy,
}

#[cfg(feature = "std")]
impl core::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SubmissionError::OperationPending => write!(f, "an operation is already outstanding"),
            SubmissionError::ModemBusy => write!(f, "the modem request queue is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SubmissionError {}

/// The completion of a radio operation, carrying whatever the modem
/// reported alongside the status.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum OperationOutcome {
    Init {
        status: PhyStatus,
        temperature: i16,
    },
    Deinit {
        status: PhyStatus,
    },
    /// Completion of a transmit or receive operation.
    Operation {
        status: PhyStatus,
        handle: u32,
        temperature: i16,
    },
    RxStop {
        status: PhyStatus,
        handle: u32,
    },
    LinkConfigure {
        status: PhyStatus,
    },
    TimeQuery {
        status: PhyStatus,
        time: u64,
    },
    CapabilityQuery {
        status: PhyStatus,
        report: CapabilityReport,
    },
}

impl OperationOutcome {
    pub fn status(&self) -> PhyStatus {
        match self {
            OperationOutcome::Init { status, .. }
            | OperationOutcome::Deinit { status }
            | OperationOutcome::Operation { status, .. }
            | OperationOutcome::RxStop { status, .. }
            | OperationOutcome::LinkConfigure { status }
            | OperationOutcome::TimeQuery { status, .. }
            | OperationOutcome::CapabilityQuery { status, .. } => *status,
        }
    }
}

/// Whether a completion answers the outstanding operation. Transmit and
/// receive completions share a notification kind and are told apart by
/// their echoed handle.
fn answers(pending: PendingOperation, outcome: &OperationOutcome) -> bool {
    match outcome {
        OperationOutcome::Init { .. } => pending.kind == OperationKind::Init,
        OperationOutcome::Deinit { .. } => pending.kind == OperationKind::Deinit,
        OperationOutcome::Operation { handle, .. } => {
            (pending.kind == OperationKind::Transmit || pending.kind == OperationKind::Receive)
                && pending.handle == *handle
        }
        OperationOutcome::RxStop { .. } => pending.kind == OperationKind::RxStop,
        OperationOutcome::LinkConfigure { .. } => pending.kind == OperationKind::LinkConfigure,
        OperationOutcome::TimeQuery { .. } => pending.kind == OperationKind::TimeQuery,
        OperationOutcome::CapabilityQuery { .. } => pending.kind == OperationKind::CapabilityQuery,
    }
}

/// Gate between the session and the modem queues. One instance exists per
/// session and it is the only writer of the request channel.
pub struct OperationCoordinator {
    request_sender: PhyRequestSender,
    notification_receiver: PhyNotificationReceiver,
    pending: Option<PendingOperation>,
}

impl OperationCoordinator {
    pub fn new(
        request_sender: PhyRequestSender,
        notification_receiver: PhyNotificationReceiver,
    ) -> Self {
        Self {
            request_sender,
            notification_receiver,
            pending: None,
        }
    }

    /// The operation currently awaiting completion, if any.
    pub fn pending(&self) -> Option<PendingOperation> {
        self.pending
    }

    /// Hands a request to the modem. Rejects without side effects when an
    /// operation is already outstanding or the modem has not drained the
    /// request queue; on rejection no notification will ever arrive.
    pub fn submit(
        &mut self,
        kind: OperationKind,
        handle: u32,
        request: PhyRequest,
    ) -> Result<(), SubmissionError> {
        if self.pending.is_some() {
            return Err(SubmissionError::OperationPending);
        }
        self.request_sender
            .try_send(request)
            .map_err(|_| SubmissionError::ModemBusy)?;
        self.pending = Some(PendingOperation { kind, handle });
        Ok(())
    }

    /// Waits for the completion of the outstanding operation and returns
    /// it, or `None` when nothing is outstanding.
    ///
    /// Notifications that are not the awaited completion are consumed here:
    /// receipts and CRC failures go to the session state handlers, RSSI
    /// samples are logged, and completions that answer no outstanding
    /// operation are logged and skipped. A failed initialization sets the
    /// session exit flag even when initialization is not what is being
    /// awaited.
    pub async fn wait_completion(&mut self, state: &mut SessionState) -> Option<OperationOutcome> {
        let pending = self.pending?;
        loop {
            let completion = match self.notification_receiver.receive().await {
                PhyNotification::ControlReceived { header, signal } => {
                    state.handle_control_received(&header, signal);
                    None
                }
                PhyNotification::ControlCrcFailure { signal } => {
                    state.handle_control_crc_failure(signal);
                    None
                }
                PhyNotification::DataReceived { payload, signal } => {
                    state.handle_data_received(&payload, signal);
                    None
                }
                PhyNotification::DataCrcFailure { signal } => {
                    state.handle_data_crc_failure(signal);
                    None
                }
                PhyNotification::RssiSample { carrier } => {
                    log!(
                        Level::Debug,
                        "RSSI measurement finished, carrier: {}",
                        carrier
                    );
                    None
                }
                PhyNotification::InitDone {
                    status,
                    temperature,
                } => {
                    if !status.is_ok() {
                        log!(
                            Level::Error,
                            "Modem initialization failed, status: {}, requesting session exit",
                            status.0
                        );
                        state.request_exit();
                    }
                    Some(OperationOutcome::Init {
                        status,
                        temperature,
                    })
                }
                PhyNotification::DeinitDone { status } => {
                    Some(OperationOutcome::Deinit { status })
                }
                PhyNotification::OpComplete {
                    status,
                    handle,
                    temperature,
                } => {
                    log!(
                        Level::Debug,
                        "Operation complete, handle: {}, temperature: {}°C",
                        handle,
                        temperature
                    );
                    Some(OperationOutcome::Operation {
                        status,
                        handle,
                        temperature,
                    })
                }
                PhyNotification::RxStopped { status, handle } => {
                    Some(OperationOutcome::RxStop { status, handle })
                }
                PhyNotification::LinkConfigured { status } => {
                    Some(OperationOutcome::LinkConfigure { status })
                }
                PhyNotification::TimeReported { status, time } => {
                    Some(OperationOutcome::TimeQuery { status, time })
                }
                PhyNotification::CapabilitiesReported { status, report } => {
                    Some(OperationOutcome::CapabilityQuery { status, report })
                }
            };

            let Some(outcome) = completion else {
                continue;
            };
            if !answers(pending, &outcome) {
                log!(
                    Level::Warn,
                    "Completion matches no outstanding operation ({:?}), continuing to wait",
                    pending.kind
                );
                continue;
            }
            if !outcome.status().is_ok() {
                log!(
                    Level::Error,
                    "Radio operation {:?} failed, status: {}",
                    pending.kind,
                    outcome.status().0
                );
            }
            self.pending = None;
            return Some(outcome);
        }
    }

    /// Submits a request and waits for its completion in one step.
    pub async fn execute(
        &mut self,
        kind: OperationKind,
        handle: u32,
        request: PhyRequest,
        state: &mut SessionState,
    ) -> Result<OperationOutcome, SubmissionError> {
        self.submit(kind, handle, request)?;
        match self.wait_completion(state).await {
            Some(outcome) => Ok(outcome),
            // Unreachable: submit above guarantees an operation is pending.
            None => Err(SubmissionError::OperationPending),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::headers::{ControlHeader, PacketLengthType, ShortBroadcastHeader};
    use crate::payload::PresenceReport;
    use crate::phy::{InitParams, RxFilter, RxParams, SignalInfo};
    use crate::{PhyNotificationQueue, PhyRequestQueue, SessionEventQueue};
    use futures::executor::block_on;
    use futures::future::join;

    const RECEIVE_HANDLE: u32 = 1;

    struct Fixture {
        coordinator: OperationCoordinator,
        state: SessionState,
        notification_queue: &'static PhyNotificationQueue,
        request_queue: &'static PhyRequestQueue,
    }

    fn fixture() -> Fixture {
        let request_queue: &'static PhyRequestQueue = Box::leak(Box::new(PhyRequestQueue::new()));
        let notification_queue: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let event_queue: &'static SessionEventQueue = Box::leak(Box::new(SessionEventQueue::new()));
        Fixture {
            coordinator: OperationCoordinator::new(
                request_queue.sender(),
                notification_queue.receiver(),
            ),
            state: SessionState::new(event_queue.sender()),
            notification_queue,
            request_queue,
        }
    }

    fn receive_request() -> PhyRequest {
        PhyRequest::Receive(RxParams {
            handle: RECEIVE_HANDLE,
            carrier: 1677,
            duration_ticks: 1_000,
            network_id: 91,
            rssi_level_dbm: -60,
            filter: RxFilter {
                short_network_id: 91,
                receiver_identity: 0,
            },
        })
    }

    #[test]
    fn second_submission_is_rejected_while_one_is_outstanding() {
        let mut fixture = fixture();
        fixture
            .coordinator
            .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request())
            .unwrap();

        let rejected =
            fixture
                .coordinator
                .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request());
        assert_eq!(rejected, Err(SubmissionError::OperationPending));
        assert_eq!(
            fixture.coordinator.pending(),
            Some(PendingOperation {
                kind: OperationKind::Receive,
                handle: RECEIVE_HANDLE,
            })
        );

        // The first operation still completes normally afterwards.
        fixture
            .notification_queue
            .try_send(PhyNotification::OpComplete {
                status: PhyStatus::OK,
                handle: RECEIVE_HANDLE,
                temperature: 23,
            })
            .unwrap();
        let outcome = block_on(fixture.coordinator.wait_completion(&mut fixture.state));
        assert_eq!(outcome.unwrap().status(), PhyStatus::OK);
        assert_eq!(fixture.coordinator.pending(), None);

        // The modem consumed the request, so the slot is free again.
        assert!(fixture.request_queue.try_receive().is_ok());
        assert!(fixture
            .coordinator
            .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request())
            .is_ok());
    }

    #[test]
    fn full_request_queue_rejects_without_leaving_pending_state() {
        let mut fixture = fixture();
        // Occupy the single request slot behind the coordinator's back.
        fixture
            .request_queue
            .try_send(PhyRequest::QueryTime)
            .unwrap();

        let rejected = fixture.coordinator.submit(
            OperationKind::Init,
            0,
            PhyRequest::Init(InitParams {
                harq_rx_expiry_time_us: 5_000_000,
                harq_rx_process_count: 4,
            }),
        );
        assert_eq!(rejected, Err(SubmissionError::ModemBusy));
        assert_eq!(fixture.coordinator.pending(), None);
        assert!(block_on(fixture.coordinator.wait_completion(&mut fixture.state)).is_none());
    }

    #[test]
    fn failed_initialization_sets_the_exit_flag() {
        let mut fixture = fixture();
        fixture
            .coordinator
            .submit(
                OperationKind::Init,
                0,
                PhyRequest::Init(InitParams {
                    harq_rx_expiry_time_us: 5_000_000,
                    harq_rx_process_count: 4,
                }),
            )
            .unwrap();
        fixture
            .notification_queue
            .try_send(PhyNotification::InitDone {
                status: PhyStatus(5),
                temperature: 23,
            })
            .unwrap();

        let outcome = block_on(fixture.coordinator.wait_completion(&mut fixture.state))
            .expect("completion expected");
        assert_eq!(outcome.status(), PhyStatus(5));
        assert!(fixture.state.exit_requested());
    }

    #[test]
    fn failed_initialization_is_fatal_even_when_not_awaited() {
        let mut fixture = fixture();
        fixture
            .coordinator
            .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request())
            .unwrap();

        let device = async {
            // A stale init completion first, then the awaited one.
            fixture
                .notification_queue
                .send(PhyNotification::InitDone {
                    status: PhyStatus(5),
                    temperature: 23,
                })
                .await;
            fixture
                .notification_queue
                .send(PhyNotification::OpComplete {
                    status: PhyStatus::OK,
                    handle: RECEIVE_HANDLE,
                    temperature: 23,
                })
                .await;
        };
        let (_, outcome) = block_on(join(
            device,
            fixture.coordinator.wait_completion(&mut fixture.state),
        ));

        let outcome = outcome.expect("completion expected");
        assert!(matches!(
            outcome,
            OperationOutcome::Operation {
                handle: RECEIVE_HANDLE,
                ..
            }
        ));
        assert!(fixture.state.exit_requested());
    }

    #[test]
    fn receipts_arriving_mid_wait_feed_the_session_state() {
        let mut fixture = fixture();
        fixture
            .coordinator
            .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request())
            .unwrap();

        let header = ControlHeader::ShortBroadcast(ShortBroadcastHeader {
            packet_length: 1,
            packet_length_type: PacketLengthType::Subslots,
            header_format: crate::headers::HEADER_FORMAT_TYPE1,
            short_network_id: 91,
            transmitter_id: 0x1234,
            df_mcs: 1,
            reserved: 0,
            transmit_power: 11,
        })
        .to_block();
        let payload = PresenceReport {
            transmitter_id: 0x1234,
        }
        .to_payload();

        let device = async {
            fixture
                .notification_queue
                .send(PhyNotification::ControlReceived {
                    header,
                    signal: SignalInfo { rssi_2: -41 },
                })
                .await;
            fixture
                .notification_queue
                .send(PhyNotification::DataReceived {
                    payload,
                    signal: SignalInfo { rssi_2: -41 },
                })
                .await;
            fixture
                .notification_queue
                .send(PhyNotification::DataCrcFailure {
                    signal: SignalInfo { rssi_2: -61 },
                })
                .await;
            fixture
                .notification_queue
                .send(PhyNotification::OpComplete {
                    status: PhyStatus::OK,
                    handle: RECEIVE_HANDLE,
                    temperature: 23,
                })
                .await;
        };
        let (_, outcome) = block_on(join(
            device,
            fixture.coordinator.wait_completion(&mut fixture.state),
        ));

        assert_eq!(outcome.unwrap().status(), PhyStatus::OK);
        assert_eq!(fixture.state.peers().get(0), Some(0x1234));
        assert_eq!(fixture.state.link().sample_count(), 1);
        assert_eq!(fixture.state.crc_failure_count(), 1);
    }

    #[test]
    fn completions_answering_no_outstanding_operation_are_skipped() {
        let mut fixture = fixture();
        fixture
            .coordinator
            .submit(OperationKind::Receive, RECEIVE_HANDLE, receive_request())
            .unwrap();

        let device = async {
            // Completion of a transmit this coordinator never issued.
            fixture
                .notification_queue
                .send(PhyNotification::OpComplete {
                    status: PhyStatus::OK,
                    handle: 7,
                    temperature: 23,
                })
                .await;
            fixture
                .notification_queue
                .send(PhyNotification::OpComplete {
                    status: PhyStatus::OK,
                    handle: RECEIVE_HANDLE,
                    temperature: 23,
                })
                .await;
        };
        let (_, outcome) = block_on(join(
            device,
            fixture.coordinator.wait_completion(&mut fixture.state),
        ));

        match outcome.expect("completion expected") {
            OperationOutcome::Operation { handle, .. } => assert_eq!(handle, RECEIVE_HANDLE),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
