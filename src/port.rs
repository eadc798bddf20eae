use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio_serial::SerialStream;
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::error::{Error, Result};

/// Opens the adapter at 8N1 without flow control and drops whatever the OS
/// buffered before we got here. Must be called inside a tokio runtime.
pub fn open_port(cfg: &SerialConfig) -> Result<SerialStream> {
    debug!(port = %cfg.port, baud = cfg.baud, "opening serial port");
    let builder = serialport::new(&cfg.port, cfg.baud)
        .timeout(cfg.read_timeout())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    let port = SerialStream::open(&builder)
        .map_err(|e| Error::Transport(format!("open {}: {}", cfg.port, e)))?;
    port.clear(ClearBuffer::All)
        .map_err(|e| Error::Transport(format!("flush {}: {}", cfg.port, e)))?;

    info!(port = %cfg.port, baud = cfg.baud, "serial port open");
    Ok(port)
}
