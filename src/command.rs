use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{self, DEFAULT_ACK_TIMEOUT, DURATION_TICK_SECS, Frame, MAX_REPEAT};

// ---- Command codes ----
pub const OFF: u8 = 0;
pub const BRIGHT_DOWN: u8 = 1;
pub const ON: u8 = 2;
pub const BRIGHT_UP: u8 = 3;
pub const SWITCH: u8 = 4;
pub const BRIGHT_BACK: u8 = 5;
pub const SET_BRIGHTNESS: u8 = 6;
pub const LOAD_PRESET: u8 = 7;
pub const SAVE_PRESET: u8 = 8;
pub const UNBIND: u8 = 9;
pub const STOP_REG: u8 = 10;
pub const BRIGHT_STEP_DOWN: u8 = 11;
pub const BRIGHT_STEP_UP: u8 = 12;
pub const BRIGHT_REG: u8 = 13;
pub const BIND: u8 = 15;
pub const ROLL_COLOUR: u8 = 16;
pub const SWITCH_COLOUR: u8 = 17;
pub const SWITCH_MODE: u8 = 18;
pub const SPEED_MODE_BACK: u8 = 19;
pub const BATTERY_LOW: u8 = 20;
pub const SENS_TEMP_HUMI: u8 = 21;
pub const TEMPORARY_ON: u8 = 25;
pub const MODES: u8 = 26;
pub const READ_STATE: u8 = 128;
pub const WRITE_STATE: u8 = 129;
pub const SEND_STATE: u8 = 130;
pub const SERVICE: u8 = 131;
pub const CLEAR_MEMORY: u8 = 132;

/// Every "on" is sent as a temporary-on; a lost "off" still ends after this.
pub const DEFAULT_ON_DURATION: Duration = Duration::from_secs(12 * 60 * 60);

/// How an inbound frame with a given code is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Remote,
    TempHum,
    Motion,
}

/// Code -> (name, decoder). Protocol constant, keep in wire order.
pub static DISPATCH: &[(u8, &str, Decoder)] = &[
    (OFF, "off", Decoder::Remote),
    (BRIGHT_DOWN, "bright_down", Decoder::Remote),
    (ON, "on", Decoder::Remote),
    (BRIGHT_UP, "bright_up", Decoder::Remote),
    (SWITCH, "switch", Decoder::Remote),
    (BRIGHT_BACK, "bright_back", Decoder::Remote),
    (SET_BRIGHTNESS, "set_brightness", Decoder::Remote),
    (LOAD_PRESET, "load_preset", Decoder::Remote),
    (SAVE_PRESET, "save_preset", Decoder::Remote),
    (UNBIND, "unbind", Decoder::Remote),
    (STOP_REG, "stop_reg", Decoder::Remote),
    (BRIGHT_STEP_DOWN, "bright_step_down", Decoder::Remote),
    (BRIGHT_STEP_UP, "bright_step_up", Decoder::Remote),
    (BRIGHT_REG, "bright_reg", Decoder::Remote),
    (BIND, "bind", Decoder::Remote),
    (ROLL_COLOUR, "roll_colour", Decoder::Remote),
    (SWITCH_COLOUR, "switch_colour", Decoder::Remote),
    (SWITCH_MODE, "switch_mode", Decoder::Remote),
    (SPEED_MODE_BACK, "speed_mode_back", Decoder::Remote),
    (BATTERY_LOW, "battery_low", Decoder::Remote),
    (SENS_TEMP_HUMI, "sens_temp_humi", Decoder::TempHum),
    (TEMPORARY_ON, "temporary_on", Decoder::Motion),
    (MODES, "modes", Decoder::Remote),
    (READ_STATE, "read_state", Decoder::Remote),
    (WRITE_STATE, "write_state", Decoder::Remote),
    (SEND_STATE, "send_state", Decoder::Remote),
    (SERVICE, "service", Decoder::Remote),
    (CLEAR_MEMORY, "clear_memory", Decoder::Remote),
];

pub fn lookup(code: u8) -> Option<(&'static str, Decoder)> {
    DISPATCH
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, dec)| (*name, *dec))
}

pub fn code_name(code: u8) -> Option<&'static str> {
    lookup(code).map(|(name, _)| name)
}

/// Case-insensitive name -> code.
pub fn code_from_name(name: &str) -> Option<u8> {
    let name = name.trim();
    DISPATCH
        .iter()
        .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
        .map(|(c, _, _)| *c)
}

/// Adapter service operations with fixed field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    BindTx,
    BindRx,
    UnbindTx,
    UnbindRx,
    ResetAll,
}

const RESET_KEY: [u8; 4] = [170, 85, 170, 85];
const BIND_RX_WAIT: Duration = Duration::from_secs(40);

impl Service {
    fn apply(self, f: &mut Frame) {
        match self {
            Service::BindTx => {
                f.cmd = BIND;
                f.ack_timeout = None;
            }
            Service::BindRx => {
                f.mode = 1;
                f.ctr = 3;
                f.ack_timeout = Some(BIND_RX_WAIT);
            }
            Service::UnbindTx => {
                f.cmd = UNBIND;
                f.ack_timeout = None;
            }
            Service::UnbindRx => {
                f.mode = 1;
                f.ctr = 5;
                f.ack_timeout = None;
            }
            Service::ResetAll => {
                f.mode = 1;
                f.ctr = 6;
                f.data = RESET_KEY;
                f.ack_timeout = None;
            }
        }
    }
}

/// What the caller wants done on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Off,
    /// Always sent as temporary-on; `None` means [`DEFAULT_ON_DURATION`].
    On { duration: Option<Duration> },
    Brightness { percent: u8 },
    Raw(RawCommand),
    Service(Service),
}

/// Every frame field, for callers who address the protocol directly.
/// Deserialises from JSON where missing fields default to zero and
/// `commit` (ack timeout, seconds; `null` = no handshake) defaults to 5.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawCommand {
    pub mode: u8,
    pub ctr: u8,
    pub togl: u8,
    pub ch: u8,
    /// A code, or its table name (`"temporary_on"`).
    #[serde(deserialize_with = "code_or_name")]
    pub cmd: u8,
    pub fmt: u8,
    pub d0: u8,
    pub d1: u8,
    pub d2: u8,
    pub d3: u8,
    pub id0: u8,
    pub id1: u8,
    pub id2: u8,
    pub id3: u8,
    pub commit: Option<u64>,
    pub nrep: u8,
    pub br: u8,
    pub duration: u64,
}

impl Default for RawCommand {
    fn default() -> Self {
        Self {
            mode: 0,
            ctr: 0,
            togl: 0,
            ch: 0,
            cmd: 0,
            fmt: 0,
            d0: 0,
            d1: 0,
            d2: 0,
            d3: 0,
            id0: 0,
            id1: 0,
            id2: 0,
            id3: 0,
            commit: Some(DEFAULT_ACK_TIMEOUT.as_secs()),
            nrep: 0,
            br: 0,
            duration: 0,
        }
    }
}

fn code_or_name<'de, D>(de: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Num(u8),
        Name(String),
    }
    match Code::deserialize(de)? {
        Code::Num(c) => Ok(c),
        Code::Name(name) => code_from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown command {name:?}"))),
    }
}

impl RawCommand {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Precondition(format!("raw command: {e}")))
    }
}

// Shorter than one tick would encode as a zero-length temporary-on.
fn check_duration(secs: u64) -> Result<()> {
    if secs < DURATION_TICK_SECS {
        return Err(Error::Precondition(format!(
            "duration {secs}s is shorter than one {DURATION_TICK_SECS}s tick"
        )));
    }
    Ok(())
}

/// Builds checksummed frames for one channel.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    ch: u8,
    repeat: u8,
    ack_timeout: Option<Duration>,
}

impl CommandBuilder {
    pub fn new(ch: u8) -> Self {
        Self {
            ch,
            repeat: 0,
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
        }
    }

    /// Extra repeats the device performs itself (0..=3).
    pub fn repeat(mut self, repeat: u8) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn build(&self, intent: Intent) -> Result<Frame> {
        debug!(ch = self.ch, ?intent, repeat = self.repeat, "build command");
        if self.repeat > MAX_REPEAT {
            return Err(Error::Precondition(format!(
                "repeat count {} exceeds {MAX_REPEAT}",
                self.repeat
            )));
        }
        let base = Frame::command(self.ch, OFF).with_ack_timeout(self.ack_timeout);
        let frame = match intent {
            Intent::Off => base,
            Intent::On { duration } => {
                let secs = duration.unwrap_or(DEFAULT_ON_DURATION).as_secs();
                check_duration(secs)?;
                Frame {
                    cmd: TEMPORARY_ON,
                    ..base
                }
                .with_duration(secs)
            }
            Intent::Brightness { percent } => {
                if percent > 100 {
                    return Err(Error::Precondition(format!(
                        "brightness {percent}% out of range"
                    )));
                }
                Frame {
                    cmd: SET_BRIGHTNESS,
                    ..base
                }
                .with_brightness(percent)
            }
            Intent::Raw(raw) => return self.build_raw(raw),
            Intent::Service(service) => {
                let mut f = base;
                service.apply(&mut f);
                f
            }
        };
        frame.with_repeat(self.repeat)
    }

    /// A light request as the frames to send, in order.
    pub fn light(&self, on: bool, brightness: Option<u8>) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(2);
        if let Some(percent) = brightness {
            frames.push(self.build(Intent::Brightness { percent })?);
            if on {
                frames.push(self.build(Intent::On { duration: None })?);
            }
        } else if on {
            frames.push(self.build(Intent::On { duration: None })?);
        } else {
            frames.push(self.build(Intent::Off)?);
        }
        Ok(frames)
    }

    // Raw fields win over the builder, except that ch 0 falls back to ours.
    fn build_raw(&self, raw: RawCommand) -> Result<Frame> {
        if raw.nrep > MAX_REPEAT {
            return Err(Error::Precondition(format!(
                "repeat count {} exceeds {MAX_REPEAT}",
                raw.nrep
            )));
        }
        if raw.br > 100 {
            return Err(Error::Precondition(format!(
                "brightness {}% out of range",
                raw.br
            )));
        }
        let mut f = Frame {
            mode: raw.mode,
            ctr: raw.ctr,
            toggle: raw.togl,
            ch: if raw.ch == 0 { self.ch } else { raw.ch },
            cmd: raw.cmd,
            fmt: raw.fmt,
            data: [raw.d0, raw.d1, raw.d2, raw.d3],
            id: [raw.id0, raw.id1, raw.id2, raw.id3],
            ack_timeout: raw.commit.map(Duration::from_secs),
            ..Default::default()
        };
        if raw.duration > 0 {
            check_duration(raw.duration)?;
            f = f.with_duration(raw.duration);
        }
        if raw.br > 0 {
            f = f.with_brightness(raw.br);
        }
        let repeat = if raw.nrep > 0 { raw.nrep } else { self.repeat };
        f.ctr = frame::encode_repeat(f.ctr, repeat)?;
        Ok(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FMT_BRIGHTNESS, FMT_DURATION};

    #[test]
    fn table_covers_protocol_codes() {
        let codes: Vec<u8> = DISPATCH.iter().map(|(c, _, _)| *c).collect();
        assert_eq!(
            codes,
            vec![
                0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 15, 16, 17, 18, 19, 20, 21, 25, 26,
                128, 129, 130, 131, 132
            ]
        );
        assert_eq!(lookup(21), Some(("sens_temp_humi", Decoder::TempHum)));
        assert_eq!(lookup(25), Some(("temporary_on", Decoder::Motion)));
        assert_eq!(lookup(14), None);
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(code_from_name("Temporary_On"), Some(TEMPORARY_ON));
        assert_eq!(code_from_name(" off "), Some(OFF));
        assert_eq!(code_name(CLEAR_MEMORY), Some("clear_memory"));
        assert_eq!(code_from_name("nope"), None);
    }

    #[test]
    fn on_becomes_temporary_on_for_twelve_hours() {
        let f = CommandBuilder::new(4)
            .build(Intent::On { duration: None })
            .unwrap();
        assert_eq!(f.cmd, TEMPORARY_ON);
        assert_eq!(f.fmt, FMT_DURATION);
        let ticks = u16::from_le_bytes([f.data[0], f.data[1]]) as u64;
        assert_eq!(ticks * 5, 43_200);
        assert_eq!(f.ack_timeout, Some(DEFAULT_ACK_TIMEOUT));
    }

    #[test]
    fn brightness_then_on() {
        let frames = CommandBuilder::new(2).light(true, Some(100)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].cmd, SET_BRIGHTNESS);
        assert_eq!(frames[0].fmt, FMT_BRIGHTNESS);
        assert_eq!(frames[0].data[0], 100);
        assert_eq!(frames[1].cmd, TEMPORARY_ON);

        let frames = CommandBuilder::new(2).light(false, Some(0)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[0], 40);

        let frames = CommandBuilder::new(2).light(false, None).unwrap();
        assert_eq!(frames, vec![Frame::command(2, OFF)]);
    }

    #[test]
    fn repeat_is_validated() {
        let f = CommandBuilder::new(1).repeat(3).build(Intent::Off).unwrap();
        assert_eq!(f.ctr >> 6, 3);
        let err = CommandBuilder::new(1).repeat(4).build(Intent::Off);
        assert!(matches!(err, Err(Error::Precondition(_))));
        let err = CommandBuilder::new(1).build(Intent::Brightness { percent: 101 });
        assert!(matches!(err, Err(Error::Precondition(_))));
    }

    #[test]
    fn raw_from_json() {
        let raw = RawCommand::from_json(r#"{"cmd": 25, "duration": 60, "nrep": 1}"#).unwrap();
        assert_eq!(raw.commit, Some(5));
        let f = CommandBuilder::new(9).build(Intent::Raw(raw)).unwrap();
        assert_eq!(f.ch, 9);
        assert_eq!(f.cmd, TEMPORARY_ON);
        assert_eq!((f.fmt, f.data[0], f.data[1]), (FMT_DURATION, 12, 0));
        assert_eq!(f.ctr >> 6, 1);
        assert_eq!(f.ack_timeout, Some(Duration::from_secs(5)));

        let raw = RawCommand::from_json(r#"{"ch": 3, "commit": null}"#).unwrap();
        let f = CommandBuilder::new(9).build(Intent::Raw(raw)).unwrap();
        assert_eq!(f.ch, 3);
        assert_eq!(f.ack_timeout, None);

        let raw = RawCommand::from_json(r#"{"duration": 3}"#).unwrap();
        let err = CommandBuilder::new(9).build(Intent::Raw(raw));
        assert!(matches!(err, Err(Error::Precondition(_))));

        let raw = RawCommand::from_json(r#"{"nrep": 4}"#).unwrap();
        assert!(CommandBuilder::new(9).build(Intent::Raw(raw)).is_err());
        assert!(RawCommand::from_json(r#"{"ch": 300}"#).is_err());
    }

    #[test]
    fn raw_cmd_by_name() {
        let raw = RawCommand::from_json(r#"{"cmd": "temporary_on", "duration": 60}"#).unwrap();
        assert_eq!(raw.cmd, TEMPORARY_ON);
        let raw = RawCommand::from_json(r#"{"cmd": " Switch "}"#).unwrap();
        assert_eq!(raw.cmd, SWITCH);
        let err = RawCommand::from_json(r#"{"cmd": "warp_drive"}"#).unwrap_err();
        assert!(err.to_string().contains("warp_drive"));
    }

    #[test]
    fn sub_tick_duration_is_rejected() {
        let b = CommandBuilder::new(1);
        for secs in [0, 4] {
            let err = b.build(Intent::On {
                duration: Some(Duration::from_secs(secs)),
            });
            assert!(matches!(err, Err(Error::Precondition(_))));
        }
        let f = b
            .build(Intent::On {
                duration: Some(Duration::from_secs(5)),
            })
            .unwrap();
        assert_eq!(f.data[0], 1);
    }

    #[test]
    fn service_presets() {
        let b = CommandBuilder::new(6);
        let bind = b.build(Intent::Service(Service::BindRx)).unwrap();
        assert_eq!((bind.mode, bind.ctr), (1, 3));
        assert_eq!(bind.ack_timeout, Some(Duration::from_secs(40)));

        let tx = b.build(Intent::Service(Service::BindTx)).unwrap();
        assert_eq!(tx.cmd, BIND);
        assert_eq!(tx.ack_timeout, None);

        let reset = b.build(Intent::Service(Service::ResetAll)).unwrap();
        assert_eq!(reset.data, [170, 85, 170, 85]);
        assert_eq!(reset.ctr, 6);
    }
}
