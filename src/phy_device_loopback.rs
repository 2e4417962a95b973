//! # Loopback PHY Device - Modem Emulation for Testing
//!
//! A PHY device that answers every request the way an ideal modem would,
//! without any radio hardware. Transmitted frames are buffered and replayed
//! into the next receive window whose network-id filter they pass, so a
//! single node can exercise the full transmit/receive/notification cycle.
//!
//! ## Emulated behavior
//!
//! - Init/deinit flip the initialized flag; deinit also drops any buffered
//!   frames. Operations submitted before init complete with
//!   [`PhyStatus::NOT_INITIALIZED`].
//! - A transmit buffers the frame and completes immediately.
//! - A receive window first replays the buffered frames that match the
//!   filter's short network id (control receipt, then data receipt, each
//!   carrying a fixed strong RSSI), then sleeps for the window duration and
//!   completes.
//! - Modem time advances by the duration of every receive window and is
//!   reported by time queries.
//! - Capability queries report a single plausible device variant.
//!
//! ## Limitations
//!
//! - Single node only; there is no channel model, no CRC failures and no
//!   unsolicited RSSI sampling. Tests inject those through the notification
//!   queue directly.

use crate::headers::HeaderBlock;
use crate::payload::RadioPayload;
use crate::phy::{
    CapabilityReport, DeviceVariant, PhyNotification, PhyRequest, PhyStatus, SignalInfo,
    MODEM_TIME_TICK_RATE_KHZ,
};
use crate::{PhyNotificationSender, PhyRequestReceiver, MAX_DEVICE_COUNT};
use embassy_time::{Duration, Timer};
use log::{log, Level};

/// Raw RSSI-2 attached to every replayed frame. Converts to -40 dBm.
const LOOPBACK_RSSI_RAW: i16 = -41;

/// Calibration temperature reported with every completion, in °C.
const LOOPBACK_TEMPERATURE: i16 = 23;

/// Number of transmitted frames that can wait for the next receive window.
const LOOPBACK_FRAME_CAPACITY: usize = 4;

/// Capability figures close to a real DECT NR+ modem, reported as a single
/// device variant.
const LOOPBACK_CAPABILITIES: CapabilityReport = CapabilityReport {
    dect_version: 1,
    variant_count: 1,
    variants: [
        DeviceVariant {
            power_class: 1,
            rx_spatial_streams: 1,
            rx_tx_diversity: 1,
            rx_gain: 0,
            mcs_max: 4,
            harq_soft_buf_size: 25_344,
            harq_process_count_max: 8,
            harq_feedback_delay: 0,
            mu: 1,
            beta: 1,
        },
        DeviceVariant::EMPTY,
        DeviceVariant::EMPTY,
        DeviceVariant::EMPTY,
    ],
};

#[embassy_executor::task(pool_size = MAX_DEVICE_COUNT)]
pub async fn phy_device_task(
    mut phy_device: PhyDevice,
    request_receiver: PhyRequestReceiver,
    notification_sender: PhyNotificationSender,
) -> ! {
    log!(Level::Info, "Loopback PHY device task started");
    phy_device.run(request_receiver, notification_sender).await
}

/// A transmitted frame waiting to be replayed by a receive window.
#[cfg_attr(feature = "std", derive(Debug))]
struct LoopbackFrame {
    header: HeaderBlock,
    payload: RadioPayload,
}

/// Emulated modem state: the initialized flag, the frames waiting for
/// replay and the modem clock.
#[cfg_attr(feature = "std", derive(Debug))]
pub struct PhyDevice {
    initialized: bool,
    pending_frames: [Option<LoopbackFrame>; LOOPBACK_FRAME_CAPACITY],
    modem_time: u64,
}

impl Default for PhyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyDevice {
    pub const fn new() -> Self {
        PhyDevice {
            initialized: false,
            pending_frames: [const { None }; LOOPBACK_FRAME_CAPACITY],
            modem_time: 0,
        }
    }

    async fn run(
        &mut self,
        request_receiver: PhyRequestReceiver,
        notification_sender: PhyNotificationSender,
    ) -> ! {
        loop {
            let request = request_receiver.receive().await;
            self.process_request(request, &notification_sender).await;
        }
    }

    /// Answers one request with the notifications an ideal modem would
    /// raise for it. Split out of [`run`](Self::run) so tests can drive the
    /// device without the endless task loop.
    pub(crate) async fn process_request(
        &mut self,
        request: PhyRequest,
        notification_sender: &PhyNotificationSender,
    ) {
        match request {
            PhyRequest::Init(params) => {
                log::trace!(
                    "Loopback modem initialized, HARQ RX processes: {}",
                    params.harq_rx_process_count
                );
                self.initialized = true;
                notification_sender
                    .send(PhyNotification::InitDone {
                        status: PhyStatus::OK,
                        temperature: LOOPBACK_TEMPERATURE,
                    })
                    .await;
            }
            PhyRequest::Deinit => {
                self.initialized = false;
                self.pending_frames = [const { None }; LOOPBACK_FRAME_CAPACITY];
                notification_sender
                    .send(PhyNotification::DeinitDone {
                        status: PhyStatus::OK,
                    })
                    .await;
            }
            PhyRequest::Transmit(params) => {
                if !self.initialized {
                    notification_sender
                        .send(PhyNotification::OpComplete {
                            status: PhyStatus::NOT_INITIALIZED,
                            handle: params.handle,
                            temperature: LOOPBACK_TEMPERATURE,
                        })
                        .await;
                    return;
                }
                log::trace!(
                    "Buffering frame for loopback, handle: {}, payload bytes: {}",
                    params.handle,
                    params.payload.as_slice().len()
                );
                self.store_frame(LoopbackFrame {
                    header: params.header,
                    payload: params.payload,
                });
                notification_sender
                    .send(PhyNotification::OpComplete {
                        status: PhyStatus::OK,
                        handle: params.handle,
                        temperature: LOOPBACK_TEMPERATURE,
                    })
                    .await;
            }
            PhyRequest::Receive(params) => {
                if !self.initialized {
                    notification_sender
                        .send(PhyNotification::OpComplete {
                            status: PhyStatus::NOT_INITIALIZED,
                            handle: params.handle,
                            temperature: LOOPBACK_TEMPERATURE,
                        })
                        .await;
                    return;
                }
                // Replay buffered frames that pass the network id filter.
                // The short network id sits in byte 1 of every header
                // variant.
                for slot in self.pending_frames.iter_mut() {
                    let Some(frame) = slot.take() else {
                        continue;
                    };
                    if frame.header.bytes[1] != params.filter.short_network_id {
                        log::trace!(
                            "Dropping frame for foreign network {}",
                            frame.header.bytes[1]
                        );
                        continue;
                    }
                    notification_sender
                        .send(PhyNotification::ControlReceived {
                            header: frame.header,
                            signal: SignalInfo {
                                rssi_2: LOOPBACK_RSSI_RAW,
                            },
                        })
                        .await;
                    notification_sender
                        .send(PhyNotification::DataReceived {
                            payload: frame.payload,
                            signal: SignalInfo {
                                rssi_2: LOOPBACK_RSSI_RAW,
                            },
                        })
                        .await;
                }
                let window_ms = (params.duration_ticks / MODEM_TIME_TICK_RATE_KHZ) as u64;
                Timer::after(Duration::from_millis(window_ms)).await;
                self.modem_time += params.duration_ticks as u64;
                notification_sender
                    .send(PhyNotification::OpComplete {
                        status: PhyStatus::OK,
                        handle: params.handle,
                        temperature: LOOPBACK_TEMPERATURE,
                    })
                    .await;
            }
            PhyRequest::RxStop { handle } => {
                notification_sender
                    .send(PhyNotification::RxStopped {
                        status: PhyStatus::OK,
                        handle,
                    })
                    .await;
            }
            PhyRequest::ConfigureLink => {
                notification_sender
                    .send(PhyNotification::LinkConfigured {
                        status: PhyStatus::OK,
                    })
                    .await;
            }
            PhyRequest::QueryTime => {
                notification_sender
                    .send(PhyNotification::TimeReported {
                        status: PhyStatus::OK,
                        time: self.modem_time,
                    })
                    .await;
            }
            PhyRequest::QueryCapabilities => {
                notification_sender
                    .send(PhyNotification::CapabilitiesReported {
                        status: PhyStatus::OK,
                        report: LOOPBACK_CAPABILITIES,
                    })
                    .await;
            }
        }
    }

    fn store_frame(&mut self, frame: LoopbackFrame) {
        for slot in self.pending_frames.iter_mut() {
            if slot.is_none() {
                *slot = Some(frame);
                return;
            }
        }
        log!(Level::Warn, "Loopback frame buffer full, dropping frame");
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::headers::{
        ControlHeader, PacketLengthType, ShortBroadcastHeader, HEADER_FORMAT_TYPE1,
    };
    use crate::payload::PresenceReport;
    use crate::phy::{InitParams, RxFilter, RxParams, TxParams};
    use crate::PhyNotificationQueue;
    use futures::executor::block_on;
    use futures::future::join;

    fn broadcast_block() -> HeaderBlock {
        ControlHeader::ShortBroadcast(ShortBroadcastHeader {
            packet_length: 1,
            packet_length_type: PacketLengthType::Subslots,
            header_format: HEADER_FORMAT_TYPE1,
            short_network_id: 91,
            transmitter_id: 0x1234,
            df_mcs: 1,
            reserved: 0,
            transmit_power: 11,
        })
        .to_block()
    }

    fn transmit_request() -> PhyRequest {
        PhyRequest::Transmit(TxParams {
            handle: 0,
            network_id: 91,
            carrier: 1677,
            header: broadcast_block(),
            payload: PresenceReport {
                transmitter_id: 0x1234,
            }
            .to_payload(),
        })
    }

    fn receive_request(short_network_id: u8) -> PhyRequest {
        PhyRequest::Receive(RxParams {
            handle: 1,
            carrier: 1677,
            duration_ticks: 1_000,
            network_id: 91,
            rssi_level_dbm: -60,
            filter: RxFilter {
                short_network_id,
                receiver_identity: 0,
            },
        })
    }

    fn initialized_device(notifications: &'static PhyNotificationQueue) -> PhyDevice {
        let mut device = PhyDevice::new();
        block_on(device.process_request(
            PhyRequest::Init(InitParams {
                harq_rx_expiry_time_us: 5_000_000,
                harq_rx_process_count: 4,
            }),
            &notifications.sender(),
        ));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::InitDone {
                status: PhyStatus(0),
                ..
            })
        ));
        device
    }

    #[test]
    fn frames_loop_back_into_the_next_receive_window() {
        let notifications: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let mut device = initialized_device(notifications);

        block_on(device.process_request(transmit_request(), &notifications.sender()));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::OpComplete {
                status: PhyStatus(0),
                handle: 0,
                ..
            })
        ));

        // The notification queue holds one entry, so the window replay and
        // the draining must run side by side.
        let sender = notifications.sender();
        let window = device.process_request(receive_request(91), &sender);
        let drain = async {
            match notifications.receive().await {
                PhyNotification::ControlReceived { header, signal } => {
                    assert_eq!(header.as_bytes(), broadcast_block().as_bytes());
                    assert_eq!(signal.rssi_2, -41);
                }
                other => panic!("expected control receipt, got {:?}", other),
            }
            match notifications.receive().await {
                PhyNotification::DataReceived { payload, signal } => {
                    assert_eq!(
                        PresenceReport::from_payload(&payload)
                            .unwrap()
                            .transmitter_id,
                        0x1234
                    );
                    assert_eq!(signal.rssi_2, -41);
                }
                other => panic!("expected data receipt, got {:?}", other),
            }
            match notifications.receive().await {
                PhyNotification::OpComplete {
                    status, handle: 1, ..
                } => assert!(status.is_ok()),
                other => panic!("expected window completion, got {:?}", other),
            }
        };
        block_on(join(window, drain));

        // The frame was consumed; a second window replays nothing.
        let window = device.process_request(receive_request(91), &sender);
        let drain = async {
            assert!(matches!(
                notifications.receive().await,
                PhyNotification::OpComplete { handle: 1, .. }
            ));
        };
        block_on(join(window, drain));
    }

    #[test]
    fn operations_before_init_complete_with_failure() {
        let notifications: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let mut device = PhyDevice::new();

        block_on(device.process_request(transmit_request(), &notifications.sender()));
        match notifications.try_receive() {
            Ok(PhyNotification::OpComplete {
                status, handle: 0, ..
            }) => assert_eq!(status, PhyStatus::NOT_INITIALIZED),
            other => panic!("expected failed completion, got {:?}", other),
        }
    }

    #[test]
    fn foreign_network_frames_are_filtered_out() {
        let notifications: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let mut device = initialized_device(notifications);

        block_on(device.process_request(transmit_request(), &notifications.sender()));
        notifications.try_receive().unwrap();

        // A window on another network consumes the frame without replay.
        let sender = notifications.sender();
        let window = device.process_request(receive_request(0x2A), &sender);
        let drain = async {
            assert!(matches!(
                notifications.receive().await,
                PhyNotification::OpComplete {
                    status: PhyStatus(0),
                    handle: 1,
                    ..
                }
            ));
        };
        block_on(join(window, drain));

        let window = device.process_request(receive_request(91), &sender);
        let drain = async {
            assert!(matches!(
                notifications.receive().await,
                PhyNotification::OpComplete { handle: 1, .. }
            ));
        };
        block_on(join(window, drain));
    }

    #[test]
    fn modem_time_advances_with_receive_windows() {
        let notifications: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let mut device = initialized_device(notifications);
        let sender = notifications.sender();

        block_on(device.process_request(PhyRequest::QueryTime, &sender));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::TimeReported { time: 0, .. })
        ));

        let window = device.process_request(receive_request(91), &sender);
        let drain = async {
            notifications.receive().await;
        };
        block_on(join(window, drain));

        block_on(device.process_request(PhyRequest::QueryTime, &sender));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::TimeReported { time: 1_000, .. })
        ));
    }

    #[test]
    fn stop_and_link_configuration_requests_complete() {
        let notifications: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let mut device = initialized_device(notifications);
        let sender = notifications.sender();

        block_on(device.process_request(PhyRequest::RxStop { handle: 1 }, &sender));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::RxStopped {
                status: PhyStatus(0),
                handle: 1,
            })
        ));

        block_on(device.process_request(PhyRequest::ConfigureLink, &sender));
        assert!(matches!(
            notifications.try_receive(),
            Ok(PhyNotification::LinkConfigured { status: PhyStatus(0) })
        ));
    }
}
