//! UART serial communication abstractions
//!
//! The TMC2209 configuration link is a single-wire, half-duplex UART: every
//! byte written is echoed back on the receive side before the reply.

/// UART transmitter
pub trait UartTx {
    /// Error type for transmit operations
    type Error;

    /// Write data to the UART
    ///
    /// Blocks until all data has been written or an error occurs.
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// UART receiver
pub trait UartRx {
    /// Error type for receive operations
    type Error;

    /// Read data from the UART
    ///
    /// Blocks until the buffer is filled, the implementation's timeout
    /// expires, or an error occurs. Returns the number of bytes read.
    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Discard `count` bytes (the echo of our own transmission on a
    /// single-wire bus)
    fn discard(&mut self, count: usize) -> Result<(), Self::Error> {
        let mut scratch = [0u8; 8];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            let read = self.read_blocking(&mut scratch[..chunk])?;
            if read == 0 {
                break;
            }
            remaining -= read;
        }
        Ok(())
    }
}

/// Combined UART interface
pub trait Uart: UartTx + UartRx {}

// Blanket implementation
impl<T: UartTx + UartRx> Uart for T {}
