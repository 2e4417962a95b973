//! # Simulator PHY Device - External Harness Connection
//!
//! A PHY device that owns no modem behavior at all: it pipes requests out to
//! an external simulation harness and pipes the notifications the harness
//! scripts back in. The harness decides what the modem does, which makes
//! multi-node scenarios and failure injection possible without touching the
//! control layer.
//!
//! The harness side holds the [`SimulatorOutputQueue`] receiver (requests
//! leaving this node) and the [`SimulatorInputQueue`] sender (notifications
//! for this node). Queue pairs are per node, so one harness can drive many
//! simulated modems.

use crate::phy::{PhyNotification, PhyRequest};
use crate::{PhyNotificationSender, PhyRequestReceiver, MAX_DEVICE_COUNT};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{log, Level};

const SIMULATOR_OUTPUT_QUEUE_SIZE: usize = 4;

/// Requests leaving the simulated modem for the harness.
pub type SimulatorOutputQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, PhyRequest, SIMULATOR_OUTPUT_QUEUE_SIZE>;
/// Used by the harness to consume the node's requests.
pub type SimulatorOutputQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    PhyRequest,
    SIMULATOR_OUTPUT_QUEUE_SIZE,
>;
/// Used by the device to hand requests to the harness.
pub type SimulatorOutputQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    PhyRequest,
    SIMULATOR_OUTPUT_QUEUE_SIZE,
>;

const SIMULATOR_INPUT_QUEUE_SIZE: usize = 4;

/// Notifications scripted by the harness for the simulated modem.
pub type SimulatorInputQueue = embassy_sync::channel::Channel<
    CriticalSectionRawMutex,
    PhyNotification,
    SIMULATOR_INPUT_QUEUE_SIZE,
>;
/// Used by the device to consume scripted notifications.
pub type SimulatorInputQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    PhyNotification,
    SIMULATOR_INPUT_QUEUE_SIZE,
>;
/// Used by the harness to script notifications.
pub type SimulatorInputQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    PhyNotification,
    SIMULATOR_INPUT_QUEUE_SIZE,
>;

#[embassy_executor::task(pool_size = MAX_DEVICE_COUNT)]
pub async fn phy_device_task(
    phy_device: PhyDevice,
    request_receiver: PhyRequestReceiver,
    notification_sender: PhyNotificationSender,
) -> ! {
    log!(Level::Info, "Simulated PHY device task started");
    phy_device.run(request_receiver, notification_sender).await
}

/// Queue endpoints connecting one simulated modem to the harness.
pub struct PhyDevice {
    output_queue_sender: SimulatorOutputQueueSender,
    input_queue_receiver: SimulatorInputQueueReceiver,
}

impl PhyDevice {
    pub const fn with(
        output_queue_sender: SimulatorOutputQueueSender,
        input_queue_receiver: SimulatorInputQueueReceiver,
    ) -> Self {
        PhyDevice {
            output_queue_sender,
            input_queue_receiver,
        }
    }

    pub(crate) async fn run(
        &self,
        request_receiver: PhyRequestReceiver,
        notification_sender: PhyNotificationSender,
    ) -> ! {
        loop {
            match select(
                self.input_queue_receiver.receive(),
                request_receiver.receive(),
            )
            .await
            {
                Either::First(notification) => {
                    log::trace!("Forwarding scripted notification");
                    notification_sender.send(notification).await;
                }
                Either::Second(request) => {
                    log::trace!("Forwarding request to harness");
                    self.output_queue_sender.send(request).await;
                }
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::phy::PhyStatus;
    use crate::{PhyNotificationQueue, PhyRequestQueue};
    use futures::executor::block_on;

    #[test]
    fn requests_and_notifications_pass_through() {
        let request_queue: &'static PhyRequestQueue = Box::leak(Box::new(PhyRequestQueue::new()));
        let notification_queue: &'static PhyNotificationQueue =
            Box::leak(Box::new(PhyNotificationQueue::new()));
        let output_queue: &'static SimulatorOutputQueue =
            Box::leak(Box::new(SimulatorOutputQueue::new()));
        let input_queue: &'static SimulatorInputQueue =
            Box::leak(Box::new(SimulatorInputQueue::new()));
        let device = PhyDevice::with(output_queue.sender(), input_queue.receiver());

        let pipe = device.run(request_queue.receiver(), notification_queue.sender());
        let script = async {
            request_queue.send(PhyRequest::QueryTime).await;
            assert!(matches!(
                output_queue.receive().await,
                PhyRequest::QueryTime
            ));
            input_queue
                .send(PhyNotification::TimeReported {
                    status: PhyStatus::OK,
                    time: 42,
                })
                .await;
            assert!(matches!(
                notification_queue.receive().await,
                PhyNotification::TimeReported { time: 42, .. }
            ));
        };
        // The pipe never completes on its own; the select unblocks once the
        // script has seen both directions.
        let _ = block_on(select(pipe, script));
    }
}
