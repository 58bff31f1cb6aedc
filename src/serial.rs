//! Serial port transport for desktop using serialport crate

use crate::transport::RfidTransport;
use std::io::Write;
use std::time::Duration;

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`, 8N1 with no flow control.
    ///
    /// Readers of this family ship at 57600 baud.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(200))
            .open()?;
        port.clear(serialport::ClearBuffer::All)?;

        Ok(Self { port })
    }

    /// Names of the serial ports present on this machine
    pub fn available_ports() -> Result<Vec<String>, serialport::Error> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }
}

impl RfidTransport for SerialTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let waiting = self.port.bytes_to_read().map_err(std::io::Error::other)? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let len = waiting.min(buf.len());
        std::io::Read::read(&mut self.port, &mut buf[..len])
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(std::io::Error::other)
    }
}
