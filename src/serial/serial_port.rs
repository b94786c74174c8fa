use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{error, info};

use crate::serial::error::SerialPortError;

/// How long to wait between attempts at opening the port.
pub const RETRY_PERIOD: Duration = Duration::from_secs(3);

/// Open the port 8N1 without flow control, which is what the instrument speaks.
pub fn try_open(path: &str, baud: u32) -> Result<SerialStream, SerialPortError> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| SerialPortError::IO(e.into()))
}

/// Keep trying to open the port until it works.
pub async fn open_with_retry(path: &str, baud: u32) -> SerialStream {
    info!(%path, %baud, "Attempting to open serial port");
    loop {
        match try_open(path, baud) {
            Ok(serial_stream) => {
                info!(%path, "Serial port open");
                return serial_stream;
            }
            Err(e) => {
                error!(?e, "Serial port open failed. Retrying in {RETRY_PERIOD:?}...");
                tokio::time::sleep(RETRY_PERIOD).await;
            }
        }
    }
}
