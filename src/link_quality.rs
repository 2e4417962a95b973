//! Link quality statistics for received frames
//!
//! This module converts the raw signal strength readings the modem reports
//! (signed values in half-dB steps, RSSI-2 per ETSI TS 103 636-2) into dBm
//! and maintains a running average over successful receptions.
//!
//! The average deliberately excludes CRC-failed receptions: their strength is
//! still converted so it can be logged, but a frame that did not decode says
//! nothing about the quality of a usable link.

/// Strongest reportable signal level (in dBm)
///
/// The modem's measurement report tops out here; a raw reading of -1 maps to
/// exactly this value. Used as the anchor of the affine conversion.
const RSSI_CEILING_DBM: f32 = -20.0;

/// Width of one raw reporting step (in dB)
///
/// Raw readings index half-dB steps below [`RSSI_CEILING_DBM`].
const RSSI_STEP_DB: f32 = 0.5;

/// Converts a raw half-dB signal reading to whole dBm
///
/// Applies `dBm = -20 - ((-raw - 1) * 0.5)` and truncates toward zero. The
/// fractional half-dB is kept only inside [`LinkQualityMonitor`]'s average.
///
/// # Arguments
/// * `raw` - The raw reading from a reception notification (negative,
///   half-dB steps)
///
/// # Returns
/// The signal strength in dBm as a signed integer
///
/// # Example
/// ```rust
/// use nrplus_radio_lib::raw_to_dbm;
///
/// // The strongest reportable reading
/// assert_eq!(raw_to_dbm(-1), -20);
///
/// // Two half-dB steps lower
/// assert_eq!(raw_to_dbm(-3), -21);
///
/// assert_eq!(raw_to_dbm(-41), -40);
/// ```
pub fn raw_to_dbm(raw: i16) -> i32 {
    convert(raw) as i32
}

fn convert(raw: i16) -> f32 {
    RSSI_CEILING_DBM - ((-(raw as f32)) - 1.0) * RSSI_STEP_DB
}

/// Running link quality statistics over one radio session
///
/// Keeps the count of successful receptions and their mean signal strength,
/// updated incrementally (`avg += (sample - avg) / n`) so no sample history
/// is stored. The mean stays a float; squeezing it through an integer after
/// every step would lose the half-dB fractions.
pub struct LinkQualityMonitor {
    sample_count: u32,
    average_dbm: f32,
}

impl LinkQualityMonitor {
    pub const fn new() -> Self {
        Self {
            sample_count: 0,
            average_dbm: 0.0,
        }
    }

    /// Converts a raw reading and, for successful receptions, folds it into
    /// the running average
    ///
    /// # Arguments
    /// * `raw` - The raw reading from the reception notification
    /// * `count_toward_average` - `true` for successful receptions; CRC
    ///   failures pass `false` so they are converted but never averaged
    ///
    /// # Returns
    /// The converted signal strength in dBm
    pub fn record(&mut self, raw: i16, count_toward_average: bool) -> i32 {
        let dbm = convert(raw);
        if count_toward_average {
            // 1. Grow the population, then 2. move the mean toward the new
            // sample by 1/n of the distance.
            self.sample_count += 1;
            self.average_dbm += (dbm - self.average_dbm) / self.sample_count as f32;
        }
        dbm as i32
    }

    /// Mean signal strength of the counted receptions, in dBm. Reads 0.0
    /// until the first counted sample arrives.
    pub fn average_dbm(&self) -> f32 {
        self.average_dbm
    }

    /// Number of receptions folded into the average.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_is_exact_on_the_reporting_grid() {
        assert_eq!(raw_to_dbm(-1), -20);
        assert_eq!(raw_to_dbm(-3), -21);
        assert_eq!(raw_to_dbm(-5), -22);
        assert_eq!(raw_to_dbm(-41), -40);
    }

    #[test]
    fn successful_samples_fold_into_the_average() {
        let mut monitor = LinkQualityMonitor::new();

        assert_eq!(monitor.record(-1, true), -20);
        assert_eq!(monitor.sample_count(), 1);
        assert_eq!(monitor.average_dbm(), -20.0);

        assert_eq!(monitor.record(-3, true), -21);
        assert_eq!(monitor.sample_count(), 2);
        assert_eq!(monitor.average_dbm(), -20.5);
    }

    #[test]
    fn failed_receptions_convert_without_moving_the_average() {
        let mut monitor = LinkQualityMonitor::new();
        monitor.record(-1, true);

        assert_eq!(monitor.record(-5, false), -22);
        assert_eq!(monitor.sample_count(), 1);
        assert_eq!(monitor.average_dbm(), -20.0);
    }

    #[test]
    fn monitor_starts_empty() {
        let monitor = LinkQualityMonitor::new();
        assert_eq!(monitor.sample_count(), 0);
        assert_eq!(monitor.average_dbm(), 0.0);
    }
}
