//! Battery telemetry and the binary log record.
//!
//! The collector reads the battery divider ADC and derives voltage /
//! percent / critical state.  [`LogRecord`] packs the fixed 24-byte entry
//! the match logger writes at high frequency — the core owns the byte
//! layout and checksum; file handling belongs to the logging collaborator.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: reads the real ADC channel.
//! On host/test: readings can be injected via `set_raw_for_test`.

use serde::Serialize;

use crate::config::SystemConfig;
use crate::control::drive::MotorStatus;
use crate::drivers::hw_init;
use crate::error::SafetyFault;
use crate::pins;

// ---------------------------------------------------------------------------
// Status flag byte (bit assignments shared with the log decoder)
// ---------------------------------------------------------------------------

pub const FLAG_ARMED: u8 = 0x01;
pub const FLAG_FAILSAFE: u8 = 0x02;
pub const FLAG_LOW_BATTERY: u8 = 0x04;
pub const FLAG_OVERTEMP: u8 = 0x08;
pub const FLAG_IMU_VALID: u8 = 0x10;
pub const FLAG_WIFI_CONNECTED: u8 = 0x20;

// ---------------------------------------------------------------------------
// Battery collector
// ---------------------------------------------------------------------------

/// Latest battery readings, serializable for the status endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatterySnapshot {
    pub voltage: f32,
    pub percent: u8,
}

pub struct TelemetryCollector {
    min_voltage: f32,
    max_voltage: f32,
    adc_ratio: f32,
    last: BatterySnapshot,
    has_reading: bool,
    #[cfg(not(target_os = "espidf"))]
    injected_raw: u16,
}

impl TelemetryCollector {
    pub fn new(cfg: &SystemConfig) -> Self {
        Self {
            min_voltage: cfg.battery_min_voltage,
            max_voltage: cfg.battery_max_voltage,
            adc_ratio: cfg.battery_adc_ratio,
            last: BatterySnapshot::default(),
            has_reading: false,
            #[cfg(not(target_os = "espidf"))]
            injected_raw: 0,
        }
    }

    /// Read the battery divider and update the snapshot.
    pub fn read_battery(&mut self) -> BatterySnapshot {
        let raw = self.read_raw();
        // 12-bit ADC, 3.3 V reference, divider ratio back to pack voltage.
        let voltage = f32::from(raw) / 4095.0 * 3.3 * self.adc_ratio;
        let span = self.max_voltage - self.min_voltage;
        let percent = ((voltage - self.min_voltage) / span * 100.0).clamp(0.0, 100.0) as u8;
        self.last = BatterySnapshot { voltage, percent };
        self.has_reading = true;
        self.last
    }

    /// Last snapshot without touching the hardware.
    pub fn last_battery(&self) -> BatterySnapshot {
        self.last
    }

    /// True when the pack has sagged below the emergency-stop threshold.
    /// Never true before the first ADC read — an empty snapshot is not a
    /// flat battery.
    pub fn is_battery_critical(&self) -> bool {
        self.has_reading && self.last.voltage < self.min_voltage
    }

    /// Build the status flag byte for the log record from the motor status
    /// and latched safety faults.
    pub fn status_flags(&self, motors: &MotorStatus, faults: u8) -> u8 {
        let mut flags = 0;
        if motors.armed {
            flags |= FLAG_ARMED;
        }
        if !motors.failsafe_ok || faults & SafetyFault::CommandTimeout.mask() != 0 {
            flags |= FLAG_FAILSAFE;
        }
        if self.is_battery_critical() || faults & SafetyFault::LowBattery.mask() != 0 {
            flags |= FLAG_LOW_BATTERY;
        }
        flags
    }

    #[cfg(target_os = "espidf")]
    fn read_raw(&self) -> u16 {
        hw_init::adc1_read(pins::BATTERY_ADC_CHANNEL)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_raw(&self) -> u16 {
        // Host builds have no ADC; fall back to the injected value (the
        // leaf stub exists so the call graph matches the target build).
        let _ = hw_init::adc1_read(pins::BATTERY_ADC_CHANNEL);
        self.injected_raw
    }

    /// Inject a raw ADC reading for host tests.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_raw_for_test(&mut self, raw: u16) {
        self.injected_raw = raw;
    }
}

// ---------------------------------------------------------------------------
// Log record (24 bytes, little-endian)
// ---------------------------------------------------------------------------

/// One fixed-layout log entry.
///
/// Layout: u32 timestamp_ms · i16 left · i16 right · i16 weapon ·
/// u16 battery (centivolts) · u16 current (mA) · i16 accel x/y/z (×100) ·
/// u8 flags · u8 error_code · u16 checksum (sum of all preceding field
/// values, masked to 16 bits).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecord {
    pub timestamp_ms: u32,
    pub left: i16,
    pub right: i16,
    pub weapon: i16,
    pub battery_centivolts: u16,
    pub current_ma: u16,
    pub accel: (i16, i16, i16),
    pub flags: u8,
    pub error_code: u8,
}

impl LogRecord {
    pub const SIZE: usize = 24;

    /// Assemble a record from the motor status and battery snapshot.
    pub fn from_status(
        timestamp_ms: u32,
        motors: &MotorStatus,
        battery: BatterySnapshot,
        flags: u8,
    ) -> Self {
        Self {
            timestamp_ms,
            left: motors.left,
            right: motors.right,
            weapon: motors.weapon,
            battery_centivolts: (battery.voltage * 100.0).clamp(0.0, 65535.0) as u16,
            current_ma: 0,
            accel: (0, 0, 0),
            flags,
            error_code: 0,
        }
    }

    /// Sum of every field value, masked to 16 bits.  Signed fields
    /// contribute their two's-complement low bits, so the decoder can
    /// recompute this from the parsed values alone.
    pub fn checksum(&self) -> u16 {
        let sum = i64::from(self.timestamp_ms)
            + i64::from(self.left)
            + i64::from(self.right)
            + i64::from(self.weapon)
            + i64::from(self.battery_centivolts)
            + i64::from(self.current_ma)
            + i64::from(self.accel.0)
            + i64::from(self.accel.1)
            + i64::from(self.accel.2)
            + i64::from(self.flags)
            + i64::from(self.error_code);
        (sum & 0xFFFF) as u16
    }

    /// Pack into the 24-byte wire layout, checksum included.
    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf[4..6].copy_from_slice(&self.left.to_le_bytes());
        buf[6..8].copy_from_slice(&self.right.to_le_bytes());
        buf[8..10].copy_from_slice(&self.weapon.to_le_bytes());
        buf[10..12].copy_from_slice(&self.battery_centivolts.to_le_bytes());
        buf[12..14].copy_from_slice(&self.current_ma.to_le_bytes());
        buf[14..16].copy_from_slice(&self.accel.0.to_le_bytes());
        buf[16..18].copy_from_slice(&self.accel.1.to_le_bytes());
        buf[18..20].copy_from_slice(&self.accel.2.to_le_bytes());
        buf[20] = self.flags;
        buf[21] = self.error_code;
        buf[22..24].copy_from_slice(&self.checksum().to_le_bytes());
        buf
    }

    /// Parse a packed record.  The trailing checksum is not checked here;
    /// use [`LogRecord::verify`] for that.
    pub fn unpack(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            timestamp_ms: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            left: i16::from_le_bytes([bytes[4], bytes[5]]),
            right: i16::from_le_bytes([bytes[6], bytes[7]]),
            weapon: i16::from_le_bytes([bytes[8], bytes[9]]),
            battery_centivolts: u16::from_le_bytes([bytes[10], bytes[11]]),
            current_ma: u16::from_le_bytes([bytes[12], bytes[13]]),
            accel: (
                i16::from_le_bytes([bytes[14], bytes[15]]),
                i16::from_le_bytes([bytes[16], bytes[17]]),
                i16::from_le_bytes([bytes[18], bytes[19]]),
            ),
            flags: bytes[20],
            error_code: bytes[21],
        }
    }

    /// Verify the trailing checksum of a packed record.
    pub fn verify(bytes: &[u8; Self::SIZE]) -> bool {
        let stored = u16::from_le_bytes([bytes[22], bytes[23]]);
        Self::unpack(bytes).checksum() == stored
    }
}

// ---------------------------------------------------------------------------
// Record buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity buffer of packed records awaiting flush to flash.
///
/// The flush task may stall mid-match (flash erase, wifi burst); when the
/// buffer fills, the oldest record is dropped so the control loop never
/// blocks on telemetry.
const RECORD_BUFFER_CAPACITY: usize = 32;

pub struct RecordBuffer {
    buf: heapless::Deque<[u8; LogRecord::SIZE], RECORD_BUFFER_CAPACITY>,
    dropped: u32,
}

impl RecordBuffer {
    pub const CAPACITY: usize = RECORD_BUFFER_CAPACITY;

    pub fn new() -> Self {
        Self {
            buf: heapless::Deque::new(),
            dropped: 0,
        }
    }

    /// Pack and enqueue a record, evicting the oldest on overflow.
    pub fn push(&mut self, record: &LogRecord) {
        if self.buf.is_full() {
            self.buf.pop_front();
            self.dropped = self.dropped.wrapping_add(1);
        }
        let _ = self.buf.push_back(record.pack());
    }

    /// Hand every buffered record to `sink`, oldest first.
    pub fn drain(&mut self, mut sink: impl FnMut(&[u8; LogRecord::SIZE])) {
        while let Some(rec) = self.buf.pop_front() {
            sink(&rec);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Records evicted before they could be flushed.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(left: i16, right: i16, weapon: i16, armed: bool, failsafe_ok: bool) -> MotorStatus {
        MotorStatus {
            left,
            right,
            weapon,
            armed,
            failsafe_ok,
        }
    }

    #[test]
    fn battery_voltage_from_raw() {
        let mut t = TelemetryCollector::new(&SystemConfig::default());
        // 12.0 V pack: raw = 12.0 / 5.7 / 3.3 * 4095 ≈ 2613
        t.set_raw_for_test(2613);
        let snap = t.read_battery();
        assert!((snap.voltage - 12.0).abs() < 0.05, "got {}", snap.voltage);
        assert!(snap.percent > 70 && snap.percent < 85);
        assert!(!t.is_battery_critical());
    }

    #[test]
    fn battery_critical_below_threshold() {
        let mut t = TelemetryCollector::new(&SystemConfig::default());
        // ~9.5 V — below the 10.0 V emergency threshold.
        t.set_raw_for_test(2069);
        let snap = t.read_battery();
        assert!(snap.voltage < 10.0);
        assert_eq!(snap.percent, 0);
        assert!(t.is_battery_critical());
    }

    #[test]
    fn not_critical_before_first_reading() {
        let t = TelemetryCollector::new(&SystemConfig::default());
        assert!(!t.is_battery_critical());
        assert_eq!(
            t.status_flags(&status(0, 0, 0, false, true), 0),
            0,
            "an unread battery must not raise the low-battery flag"
        );
    }

    #[test]
    fn checksum_sums_field_values() {
        // The decoder recomputes the checksum from parsed fields, so it is
        // the field-value sum (16-bit masked), not a byte sum.
        let rec = LogRecord {
            timestamp_ms: 256,
            left: -60,
            right: 100,
            weapon: 80,
            battery_centivolts: 1240,
            current_ma: 0,
            accel: (0, 0, 0),
            flags: FLAG_ARMED,
            error_code: 0,
        };
        // 256 - 60 + 100 + 80 + 1240 + 1 = 1617
        assert_eq!(rec.checksum(), 1617);

        let bytes = rec.pack();
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 1617);
        assert!(LogRecord::verify(&bytes));

        // Negative fields fold in as two's-complement low bits.
        let rec = LogRecord {
            timestamp_ms: 0,
            left: -1,
            ..LogRecord::default()
        };
        assert_eq!(rec.checksum(), 0xFFFF);
    }

    #[test]
    fn unpack_inverts_pack() {
        let rec = LogRecord {
            timestamp_ms: 98_765,
            left: -100,
            right: 100,
            weapon: 55,
            battery_centivolts: 1102,
            current_ma: 2500,
            accel: (-300, 12, 981),
            flags: FLAG_ARMED | FLAG_LOW_BATTERY,
            error_code: 7,
        };
        let parsed = LogRecord::unpack(&rec.pack());
        assert_eq!(parsed.timestamp_ms, rec.timestamp_ms);
        assert_eq!((parsed.left, parsed.right, parsed.weapon), (-100, 100, 55));
        assert_eq!(parsed.accel, (-300, 12, 981));
        assert_eq!(parsed.flags, rec.flags);
    }

    #[test]
    fn status_flags_reflect_state() {
        let t = TelemetryCollector::new(&SystemConfig::default());
        let f = t.status_flags(&status(0, 0, 50, true, true), 0);
        assert_eq!(f, FLAG_ARMED);

        let f = t.status_flags(&status(0, 0, 0, false, false), 0);
        assert_eq!(f, FLAG_FAILSAFE);

        let f = t.status_flags(
            &status(0, 0, 0, false, true),
            SafetyFault::LowBattery.mask(),
        );
        assert_eq!(f, FLAG_LOW_BATTERY);
    }

    #[test]
    fn log_record_packs_24_bytes_with_valid_checksum() {
        let rec = LogRecord {
            timestamp_ms: 123_456,
            left: -60,
            right: 100,
            weapon: 80,
            battery_centivolts: 1240,
            current_ma: 1500,
            accel: (10, -20, 98),
            flags: FLAG_ARMED | FLAG_FAILSAFE,
            error_code: 0,
        };
        let bytes = rec.pack();
        assert_eq!(bytes.len(), LogRecord::SIZE);
        assert!(LogRecord::verify(&bytes));

        // Field spot checks against the little-endian layout.
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 123_456);
        assert_eq!(i16::from_le_bytes(bytes[4..6].try_into().unwrap()), -60);
        assert_eq!(u16::from_le_bytes(bytes[10..12].try_into().unwrap()), 1240);
        assert_eq!(bytes[20], FLAG_ARMED | FLAG_FAILSAFE);
    }

    #[test]
    fn corrupted_record_fails_checksum() {
        let rec = LogRecord {
            timestamp_ms: 42,
            ..LogRecord::default()
        };
        let mut bytes = rec.pack();
        bytes[5] ^= 0xFF;
        assert!(!LogRecord::verify(&bytes));
    }

    #[test]
    fn record_buffer_evicts_oldest_on_overflow() {
        let mut buf = RecordBuffer::new();
        for i in 0..(RecordBuffer::CAPACITY as u32 + 4) {
            buf.push(&LogRecord {
                timestamp_ms: i,
                ..LogRecord::default()
            });
        }
        assert_eq!(buf.len(), RecordBuffer::CAPACITY);
        assert_eq!(buf.dropped(), 4);

        // Oldest surviving record is #4; order is preserved.
        let mut timestamps = Vec::new();
        buf.drain(|rec| {
            timestamps.push(u32::from_le_bytes(rec[0..4].try_into().unwrap()));
        });
        assert_eq!(timestamps.first(), Some(&4));
        assert_eq!(timestamps.last(), Some(&35));
        assert!(buf.is_empty());
    }

    #[test]
    fn record_from_status_carries_motor_fields() {
        let rec = LogRecord::from_status(
            1000,
            &status(-40, 40, 90, true, true),
            BatterySnapshot {
                voltage: 12.4,
                percent: 92,
            },
            FLAG_ARMED,
        );
        assert_eq!(rec.left, -40);
        assert_eq!(rec.right, 40);
        assert_eq!(rec.weapon, 90);
        // 12.4 V → ~1240 cV; allow for f32 truncation.
        assert!((1239..=1240).contains(&rec.battery_centivolts));
        assert_eq!(rec.flags, FLAG_ARMED);
    }
}
