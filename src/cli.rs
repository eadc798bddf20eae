use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};

use noolite_link::command::Service;
use noolite_link::config::SerialConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "noolite-link", about = "nooLite serial adapter: listen for events, send commands")]
pub struct Cli {
    /// JSON config file (defaults to $NOOLITE_CONFIG when set)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log level or filter, overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Print inbound events until interrupted
    Listen(ListenOpts),
    /// Send one command and wait for its confirmation
    Send(SendOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long)]
    pub dev: Option<String>,
    /// Baud rate
    #[arg(long)]
    pub baud: Option<u32>,
}

impl SerialOpts {
    pub fn apply(&self, cfg: &mut SerialConfig) {
        if let Some(dev) = &self.dev {
            cfg.port = dev.clone();
        }
        if let Some(baud) = self.baud {
            cfg.baud = baud;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListenOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Stats log interval in seconds (0 disables)
    #[arg(long, default_value_t = 60.0)]
    pub stats: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Target channel
    #[arg(long, short)]
    pub channel: u8,
    /// Extra repeats performed by the device (0..=3)
    #[arg(long, default_value_t = 0)]
    pub repeat: u8,
    /// Seconds to wait for confirmation (config default when omitted)
    #[arg(long, conflicts_with = "no_ack")]
    pub timeout: Option<f64>,
    /// Do not wait for confirmation
    #[arg(long, default_value_t = false)]
    pub no_ack: bool,
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Action {
    /// Temporary on (12 h unless --duration is given)
    On {
        /// Seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    Off,
    /// Set brightness in percent, optionally switching on afterwards
    Brightness {
        percent: u8,
        #[arg(long, default_value_t = false)]
        on: bool,
    },
    /// Frame fields as JSON, e.g. '{"cmd": 4, "nrep": 1}'
    Raw { json: String },
    /// Adapter service operation
    Service { kind: ServiceKind },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    BindTx,
    BindRx,
    UnbindTx,
    UnbindRx,
    ResetAll,
}

impl From<ServiceKind> for Service {
    fn from(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::BindTx => Service::BindTx,
            ServiceKind::BindRx => Service::BindRx,
            ServiceKind::UnbindTx => Service::UnbindTx,
            ServiceKind::UnbindRx => Service::UnbindRx,
            ServiceKind::ResetAll => Service::ResetAll,
        }
    }
}

/// Typed confirmation policy for the send command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AckPolicy {
    Default,
    None,
    Fixed(Duration),
}

impl AckPolicy {
    pub fn from_cli(timeout: Option<f64>, no_ack: bool) -> anyhow::Result<Self> {
        match (timeout, no_ack) {
            (_, true) => Ok(AckPolicy::None),
            (None, false) => Ok(AckPolicy::Default),
            (Some(secs), false) => {
                if !secs.is_finite() || secs <= 0.0 {
                    bail!("timeout must be a positive number of seconds");
                }
                Ok(AckPolicy::Fixed(Duration::from_secs_f64(secs)))
            }
        }
    }

    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            AckPolicy::Default => Some(default),
            AckPolicy::None => None,
            AckPolicy::Fixed(d) => Some(d),
        }
    }
}
