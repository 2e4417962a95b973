//! # Modem Interface Vocabulary
//!
//! The request and notification types exchanged with the PHY device task.
//! The PHY itself is a black box: this layer submits one request at a time
//! over a channel and consumes the notifications the device emits back. One
//! enumeration covers every request the modem accepts, another covers every
//! notification kind it can raise, so dispatch anywhere in the crate is a
//! single `match`.
//!
//! All quantities use the modem's native units: time in modem ticks (see
//! [`MODEM_TIME_TICK_RATE_KHZ`]), signal strength as raw RSSI-2 readings
//! (converted by [`raw_to_dbm`](crate::raw_to_dbm)), temperatures in whole
//! degrees Celsius.

use crate::headers::HeaderBlock;
use crate::payload::RadioPayload;

/// Modem time base in kHz. One millisecond is this many modem ticks.
pub const MODEM_TIME_TICK_RATE_KHZ: u32 = 69_120;

/// Maximum number of device variants a capability report can carry.
pub const MAX_DEVICE_VARIANTS: usize = 4;

/// Completion status of a modem operation. Zero is success; nonzero codes
/// are modem-defined failures and are only logged, never interpreted, apart
/// from the ones this crate raises itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyStatus(pub u32);

impl PhyStatus {
    /// The operation completed successfully.
    pub const OK: PhyStatus = PhyStatus(0);
    /// The modem rejected the operation because it was never initialized.
    pub const NOT_INITIALIZED: PhyStatus = PhyStatus(1);

    pub fn is_ok(&self) -> bool {
        *self == PhyStatus::OK
    }
}

/// Signal measurements attached to reception notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    /// Raw RSSI-2 reading. See [`raw_to_dbm`](crate::raw_to_dbm) for the
    /// dBm law.
    pub rssi_2: i16,
}

/// Parameters of the one-time modem initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitParams {
    /// Lifetime of buffered HARQ RX data in microseconds.
    pub harq_rx_expiry_time_us: u32,
    /// Number of HARQ RX processes the modem reserves.
    pub harq_rx_process_count: u8,
}

/// Parameters of a transmit operation.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TxParams {
    /// Caller-chosen correlation value echoed in the completion.
    pub handle: u32,
    /// Full 32-bit network id; its low byte travels in the header.
    pub network_id: u32,
    /// Absolute channel number to transmit on.
    pub carrier: u16,
    pub header: HeaderBlock,
    pub payload: RadioPayload,
}

/// Reception filter. Frames not matching the short network id are dropped
/// by the modem before any notification is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFilter {
    /// Low byte of the network id to accept.
    pub short_network_id: u8,
    /// Receiver identity to accept, 0 to accept all.
    pub receiver_identity: u32,
}

/// Parameters of a receive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxParams {
    /// Caller-chosen correlation value echoed in the completion.
    pub handle: u32,
    /// Absolute channel number to listen on.
    pub carrier: u16,
    /// Window length in modem ticks.
    pub duration_ticks: u32,
    /// Full 32-bit network id used to derive descrambling.
    pub network_id: u32,
    /// Reception sensitivity threshold in dBm.
    pub rssi_level_dbm: i8,
    pub filter: RxFilter,
}

/// One hardware configuration the modem can operate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVariant {
    pub power_class: u8,
    pub rx_spatial_streams: u8,
    pub rx_tx_diversity: u8,
    pub rx_gain: i8,
    pub mcs_max: u8,
    pub harq_soft_buf_size: u32,
    pub harq_process_count_max: u8,
    pub harq_feedback_delay: u8,
    /// Subcarrier scaling factor µ.
    pub mu: u8,
    /// Fourier transform scaling factor β.
    pub beta: u8,
}

impl DeviceVariant {
    pub const EMPTY: DeviceVariant = DeviceVariant {
        power_class: 0,
        rx_spatial_streams: 0,
        rx_tx_diversity: 0,
        rx_gain: 0,
        mcs_max: 0,
        harq_soft_buf_size: 0,
        harq_process_count_max: 0,
        harq_feedback_delay: 0,
        mu: 0,
        beta: 0,
    };
}

/// Device capabilities reported by the modem. Only the first
/// `variant_count` entries of `variants` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityReport {
    /// DECT NR+ standard version the modem implements.
    pub dect_version: u8,
    pub variant_count: u8,
    pub variants: [DeviceVariant; MAX_DEVICE_VARIANTS],
}

impl CapabilityReport {
    pub const EMPTY: CapabilityReport = CapabilityReport {
        dect_version: 0,
        variant_count: 0,
        variants: [DeviceVariant::EMPTY; MAX_DEVICE_VARIANTS],
    };

    /// The reported variants, clamped to the storage capacity.
    pub fn active_variants(&self) -> &[DeviceVariant] {
        let count = (self.variant_count as usize).min(MAX_DEVICE_VARIANTS);
        &self.variants[..count]
    }
}

/// A request submitted to the PHY device task. Every request is answered by
/// exactly one completion notification of the matching kind.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PhyRequest {
    Init(InitParams),
    Deinit,
    Transmit(TxParams),
    Receive(RxParams),
    RxStop { handle: u32 },
    ConfigureLink,
    QueryTime,
    QueryCapabilities,
}

/// A notification raised by the PHY device task: either the completion of a
/// submitted request or an unsolicited reception event raised while a
/// receive window is open.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PhyNotification {
    /// Initialization finished. `temperature` is the calibration
    /// temperature in °C.
    InitDone { status: PhyStatus, temperature: i16 },
    /// De-initialization finished.
    DeinitDone { status: PhyStatus },
    /// A transmit or receive operation finished.
    OpComplete {
        status: PhyStatus,
        handle: u32,
        temperature: i16,
    },
    /// An rx-stop request finished.
    RxStopped { status: PhyStatus, handle: u32 },
    /// A physical control channel transmission was decoded.
    ControlReceived {
        header: HeaderBlock,
        signal: SignalInfo,
    },
    /// A control channel transmission failed its CRC.
    ControlCrcFailure { signal: SignalInfo },
    /// A physical data channel transmission was decoded.
    DataReceived {
        payload: RadioPayload,
        signal: SignalInfo,
    },
    /// A data channel transmission failed its CRC.
    DataCrcFailure { signal: SignalInfo },
    /// An RSSI measurement pass over `carrier` finished.
    RssiSample { carrier: u16 },
    /// A link configuration request finished.
    LinkConfigured { status: PhyStatus },
    /// A modem time query finished. `time` is in modem ticks.
    TimeReported { status: PhyStatus, time: u64 },
    /// A capability query finished.
    CapabilitiesReported {
        status: PhyStatus,
        report: CapabilityReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_classify_as_ok_or_failure() {
        assert!(PhyStatus::OK.is_ok());
        assert!(!PhyStatus::NOT_INITIALIZED.is_ok());
        assert!(!PhyStatus(0x5005).is_ok());
    }

    #[test]
    fn active_variants_follow_the_reported_count() {
        let mut report = CapabilityReport::EMPTY;
        assert!(report.active_variants().is_empty());

        report.variant_count = 2;
        report.variants[0].mcs_max = 4;
        report.variants[1].mcs_max = 9;
        let active = report.active_variants();
        assert_eq!(active.len(), 2);
        assert_eq!(active[1].mcs_max, 9);
    }

    #[test]
    fn oversized_variant_count_is_clamped_to_storage() {
        let mut report = CapabilityReport::EMPTY;
        report.variant_count = 9;
        assert_eq!(report.active_variants().len(), MAX_DEVICE_VARIANTS);
    }
}
