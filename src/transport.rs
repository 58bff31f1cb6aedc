/// Trait for reader communication backends.
/// Implement this trait for different transports (serial port, TCP socket, UART, etc.)
///
/// The engine only needs a raw duplex byte stream. Framing, CRC checking and
/// request/response matching all happen above this layer.
pub trait RfidTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Write data to the transport
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read whatever bytes are already available without blocking.
    ///
    /// Returns `Ok(0)` when nothing is pending; the caller sleeps between polls.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Clear the input buffer
    fn clear_input(&mut self) -> Result<(), Self::Error>;
}
