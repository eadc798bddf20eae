use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{Error, Result};

pub const FRAME_LEN: usize = 17;

pub const OUT_START: u8 = 171;
pub const OUT_STOP: u8 = 172;
pub const IN_START: u8 = 173;
pub const IN_STOP: u8 = 174;

pub const FMT_NONE: u8 = 0;
pub const FMT_BRIGHTNESS: u8 = 1;
pub const FMT_DURATION: u8 = 2;

/// How long a sender waits for confirmation unless told otherwise.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub const MAX_REPEAT: u8 = 3;

pub const DURATION_TICK_SECS: u64 = 5;
const CONTROL_MASK: u8 = 0x1F;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad start marker {0}")]
    BadStart(u8),
    #[error("bad stop marker {0}")]
    BadStop(u8),
    #[error("checksum {calc}!={got}")]
    BadChecksum { calc: u8, got: u8 },
}

/// One 17-byte exchange with the adapter.
///
/// The checksum is never stored: it is derived from the other fields every
/// time the frame is encoded, so a frame cannot carry a stale one.
/// `ack_timeout` is local only and decides whether [`crate::link::Link::send`]
/// waits for a confirming frame (`None` = fire and forget).
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub start: u8,
    pub mode: u8,
    pub ctr: u8,
    pub toggle: u8,
    pub ch: u8,
    pub cmd: u8,
    pub fmt: u8,
    pub data: [u8; 4],
    pub id: [u8; 4],
    pub stop: u8,
    pub ack_timeout: Option<Duration>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            start: OUT_START,
            mode: 0,
            ctr: 0,
            toggle: 0,
            ch: 0,
            cmd: 0,
            fmt: FMT_NONE,
            data: [0; 4],
            id: [0; 4],
            stop: OUT_STOP,
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
        }
    }
}

// toggle and the local timeout take no part in equality
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.mode == other.mode
            && self.ctr == other.ctr
            && self.ch == other.ch
            && self.cmd == other.cmd
            && self.fmt == other.fmt
            && self.data == other.data
            && self.id == other.id
            && self.stop == other.stop
    }
}

impl Eq for Frame {}

impl Frame {
    pub fn command(ch: u8, cmd: u8) -> Self {
        Self {
            ch,
            cmd,
            ..Default::default()
        }
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.head())
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        let head = self.head();
        out[..15].copy_from_slice(&head);
        out[15] = checksum(&head);
        out[16] = self.stop;
        out
    }

    /// Structural parse only; see [`validate`] for marker/checksum checks.
    pub fn decode(bytes: &[u8; FRAME_LEN]) -> Self {
        Self {
            start: bytes[0],
            mode: bytes[1],
            ctr: bytes[2],
            toggle: bytes[3],
            ch: bytes[4],
            cmd: bytes[5],
            fmt: bytes[6],
            data: [bytes[7], bytes[8], bytes[9], bytes[10]],
            id: [bytes[11], bytes[12], bytes[13], bytes[14]],
            stop: bytes[16],
            ack_timeout: None,
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        let (fmt, d0, d1) = encode_duration(secs);
        self.fmt = fmt;
        self.data[0] = d0;
        self.data[1] = d1;
        self
    }

    pub fn with_brightness(mut self, percent: u8) -> Self {
        let (fmt, d0) = encode_brightness(percent);
        self.fmt = fmt;
        self.data[0] = d0;
        self
    }

    pub fn with_repeat(mut self, repeat: u8) -> Result<Self> {
        self.ctr = encode_repeat(self.ctr, repeat)?;
        Ok(self)
    }

    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    fn head(&self) -> [u8; 15] {
        [
            self.start,
            self.mode,
            self.ctr,
            self.toggle,
            self.ch,
            self.cmd,
            self.fmt,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
            self.id[0],
            self.id[1],
            self.id[2],
            self.id[3],
        ]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} ctr={} ch={} cmd={} fmt={} data={:?} id={:?}",
            self.mode, self.ctr, self.ch, self.cmd, self.fmt, self.data, self.id
        )
    }
}

pub fn checksum(head: &[u8]) -> u8 {
    head.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

pub fn is_start(b: u8) -> bool {
    b == OUT_START || b == IN_START
}

/// Checks markers and checksum of a raw frame. Either the outbound (171/172)
/// or the inbound (173/174) marker pair is accepted.
pub fn validate(bytes: &[u8; FRAME_LEN]) -> std::result::Result<(), FrameError> {
    let stop = match bytes[0] {
        OUT_START => OUT_STOP,
        IN_START => IN_STOP,
        other => return Err(FrameError::BadStart(other)),
    };
    if bytes[16] != stop {
        return Err(FrameError::BadStop(bytes[16]));
    }
    let calc = checksum(&bytes[..15]);
    if calc != bytes[15] {
        return Err(FrameError::BadChecksum {
            calc,
            got: bytes[15],
        });
    }
    Ok(())
}

/// Packs a duration as 5-second ticks, little-endian, into (fmt, d0, d1).
/// Durations past 0xFFFF ticks saturate.
pub fn encode_duration(secs: u64) -> (u8, u8, u8) {
    let ticks = (secs / DURATION_TICK_SECS).min(u16::MAX as u64) as u16;
    let [d0, d1] = ticks.to_le_bytes();
    (FMT_DURATION, d0, d1)
}

/// Maps 0..=100 % onto the device's native 40..=100 scale.
pub fn encode_brightness(percent: u8) -> (u8, u8) {
    let percent = percent.min(100) as u16;
    let native = 40 + (percent * 60 + 50) / 100;
    (FMT_BRIGHTNESS, native as u8)
}

pub fn encode_repeat(ctr: u8, repeat: u8) -> Result<u8> {
    if repeat > MAX_REPEAT {
        return Err(Error::Precondition(format!(
            "repeat count {repeat} exceeds {MAX_REPEAT}"
        )));
    }
    Ok((repeat << 6) | (ctr & CONTROL_MASK))
}
