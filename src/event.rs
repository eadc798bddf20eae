//! Inbound frames reinterpreted as typed events.
//!
//! The command code picks the decoder through [`crate::command::DISPATCH`];
//! codes missing from the table decode as plain remote events.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::command::{self, Decoder};
use crate::frame::Frame;

const MOTION_TICK_SECS: u64 = 5;

/// Sensor type field of a temperature frame (bits 6..4 of data1).
pub const SENSOR_TEMP: u8 = 0b001;
pub const SENSOR_TEMP_HUM: u8 = 0b010;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub channel: u8,
    pub cmd: u8,
    pub received_at: Instant,
    pub frame: Frame,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    Remote,
    TempHum(TempHum),
    Motion(Motion),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempHum {
    pub sensor_type: u8,
    pub temperature: f32,
    /// Only combined temperature/humidity sensors report this.
    pub humidity: Option<u8>,
    pub analog: u8,
    pub battery_low: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub active_for: Duration,
    pub battery_low: bool,
}

impl TempHum {
    pub fn decode(frame: &Frame) -> Self {
        let [d0, d1, d2, d3] = frame.data;
        let sensor_type = (d1 >> 4) & 0b111;
        Self {
            sensor_type,
            temperature: decode_temperature(d1, d0),
            humidity: (sensor_type == SENSOR_TEMP_HUM).then_some(d2),
            analog: d3,
            battery_low: battery_low(d1),
        }
    }
}

impl Motion {
    pub fn decode(frame: &Frame) -> Self {
        Self {
            active_for: Duration::from_secs(frame.data[0] as u64 * MOTION_TICK_SECS),
            battery_low: battery_low(frame.data[1]),
        }
    }
}

fn battery_low(d1: u8) -> bool {
    d1 & 0x80 != 0
}

/// 12-bit sign-magnitude value in tenths of a degree: low nibble of `d1`
/// followed by `d0`. Negative readings are stored as `4096 - |t|`.
pub fn decode_temperature(d1: u8, d0: u8) -> f32 {
    let raw = (((d1 & 0x0F) as u16) << 8) | d0 as u16;
    if raw & 0x800 == 0 {
        raw as f32 / 10.0
    } else {
        -((4096 - raw) as f32 / 10.0)
    }
}

impl Event {
    pub fn classify(frame: Frame, received_at: Instant) -> Self {
        let decoder = command::lookup(frame.cmd).map(|(_, d)| d);
        let kind = match decoder {
            Some(Decoder::TempHum) => EventKind::TempHum(TempHum::decode(&frame)),
            Some(Decoder::Motion) => EventKind::Motion(Motion::decode(&frame)),
            Some(Decoder::Remote) | None => EventKind::Remote,
        };
        Self {
            channel: frame.ch,
            cmd: frame.cmd,
            received_at,
            frame,
            kind,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        command::code_name(self.cmd)
    }

    pub fn is_motion(&self) -> bool {
        matches!(self.kind, EventKind::Motion(_))
    }

    /// Sensor events only; remote events carry no battery flag.
    pub fn battery_low(&self) -> Option<bool> {
        match self.kind {
            EventKind::TempHum(t) => Some(t.battery_low),
            EventKind::Motion(m) => Some(m.battery_low),
            EventKind::Remote => None,
        }
    }

    /// Motion events only: whether the sensor's active window covers `now`.
    pub fn is_active(&self, now: Instant) -> Option<bool> {
        match self.kind {
            EventKind::Motion(m) => Some(now < self.received_at + m.active_for),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch={} cmd={}({})",
            self.channel,
            self.cmd,
            self.name().unwrap_or("unknown")
        )?;
        match self.kind {
            EventKind::Remote => Ok(()),
            EventKind::TempHum(t) => {
                write!(f, " battery_low={} temp={:.1}", t.battery_low, t.temperature)?;
                if let Some(h) = t.humidity {
                    write!(f, " hum={h}")?;
                }
                Ok(())
            }
            EventKind::Motion(m) => write!(
                f,
                " battery_low={} active_for={}s",
                m.battery_low,
                m.active_for.as_secs()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{SENS_TEMP_HUMI, SWITCH, TEMPORARY_ON};

    fn inbound(ch: u8, cmd: u8, data: [u8; 4]) -> Frame {
        Frame {
            mode: 1,
            ch,
            cmd,
            data,
            ..Default::default()
        }
    }

    #[test]
    fn positive_temperature() {
        // sensor type 010, sign 0, magnitude 0x1_0E = 270 -> 27.0
        let f = inbound(5, SENS_TEMP_HUMI, [0x0E, 0b0010_0001, 48, 255]);
        let ev = Event::classify(f, Instant::now());
        let EventKind::TempHum(t) = ev.kind else {
            panic!("expected temperature event, got {:?}", ev.kind);
        };
        assert_eq!(t.sensor_type, SENSOR_TEMP_HUM);
        assert!((t.temperature - 27.0).abs() < 1e-4);
        assert_eq!(t.humidity, Some(48));
        assert_eq!(t.analog, 255);
        assert!(!t.battery_low);
        assert_eq!(ev.battery_low(), Some(false));
    }

    #[test]
    fn negative_temperature() {
        // 4096 - 0xF9C = 100 -> -10.0
        assert!((decode_temperature(0x0F, 0x9C) + 10.0).abs() < 1e-4);
        assert!((decode_temperature(0x0F, 0xFF) + 0.1).abs() < 1e-4);
    }

    #[test]
    fn temperature_only_sensor_has_no_humidity() {
        let f = inbound(5, SENS_TEMP_HUMI, [100, 0b1001_0000, 48, 0]);
        let EventKind::TempHum(t) = Event::classify(f, Instant::now()).kind else {
            panic!("expected temperature event");
        };
        assert_eq!(t.sensor_type, SENSOR_TEMP);
        assert_eq!(t.humidity, None);
        assert!(t.battery_low);
        assert!((t.temperature - 10.0).abs() < 1e-4);
    }

    #[test]
    fn motion_window() {
        let t0 = Instant::now();
        let ev = Event::classify(inbound(3, TEMPORARY_ON, [2, 0, 0, 0]), t0);
        let EventKind::Motion(m) = ev.kind else {
            panic!("expected motion event");
        };
        assert_eq!(m.active_for, Duration::from_secs(10));
        assert_eq!(ev.is_active(t0 + Duration::from_secs(9)), Some(true));
        assert_eq!(ev.is_active(t0 + Duration::from_secs(10)), Some(false));
        assert!(ev.is_motion());
    }

    #[test]
    fn unknown_and_plain_codes_are_remote() {
        let ev = Event::classify(inbound(1, SWITCH, [0; 4]), Instant::now());
        assert_eq!(ev.kind, EventKind::Remote);
        assert_eq!(ev.name(), Some("switch"));
        assert_eq!(ev.battery_low(), None);
        assert_eq!(ev.is_active(Instant::now()), None);

        let ev = Event::classify(inbound(1, 99, [0; 4]), Instant::now());
        assert_eq!(ev.kind, EventKind::Remote);
        assert_eq!(ev.name(), None);
        assert_eq!(ev.to_string(), "ch=1 cmd=99(unknown)");
    }
}
