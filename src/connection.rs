//! Byte transports for talking to the adaptor
//!
//! The driver only needs an ordered byte pipe: open, flush, close, write,
//! and a callback for received bytes. [`SerialTransport`] provides one over a
//! serial port.

use async_trait::async_trait;

use crate::Result;

/// Callback type for received data
pub type DataCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// Transport trait for the adaptor's byte stream
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying device
    async fn open(&mut self) -> Result<()>;

    /// Drain pending output
    async fn flush(&mut self) -> Result<()>;

    /// Close the underlying device
    async fn close(&mut self) -> Result<()>;

    /// Write raw bytes to the adaptor
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Check if the device is open
    fn is_open(&self) -> bool;

    /// Set the data receive callback; takes effect on the next `open`
    fn set_reader(&mut self, callback: DataCallback);
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

    use super::{DataCallback, Transport};
    use crate::config::Config;
    use crate::error::Error;
    use crate::Result;

    type SharedCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

    /// Serial port transport
    pub struct SerialTransport {
        device: String,
        baud_rate: u32,
        writer: Option<WriteHalf<SerialStream>>,
        read_task: Option<JoinHandle<()>>,
        callback: Option<SharedCallback>,
    }

    impl SerialTransport {
        /// Create a transport for the given device
        pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                device: device.into(),
                baud_rate,
                writer: None,
                read_task: None,
                callback: None,
            }
        }

        /// Create a transport from the device settings in `config`
        pub fn from_config(config: &Config) -> Self {
            Self::new(config.device.clone(), config.baud_rate)
        }
    }

    #[async_trait]
    impl Transport for SerialTransport {
        async fn open(&mut self) -> Result<()> {
            if self.writer.is_some() {
                return Err(Error::connection("serial port already open"));
            }

            let port = tokio_serial::new(&self.device, self.baud_rate)
                .open_native_async()
                .map_err(|e| Error::connection(format!("Failed to open serial port: {}", e)))?;
            // Whatever the adaptor printed before we attached is noise
            port.clear(tokio_serial::ClearBuffer::All)?;

            let (mut reader, writer) = tokio::io::split(port);
            let callback = self.callback.clone();
            let device = self.device.clone();

            self.read_task = Some(tokio::spawn(async move {
                let mut read_buf = [0u8; 1024];

                loop {
                    match reader.read(&mut read_buf).await {
                        Ok(0) => {
                            tracing::info!(device, "serial port closed");
                            break;
                        }
                        Ok(n) => {
                            if let Some(cb) = callback.as_ref() {
                                cb(read_buf[..n].to_vec());
                            }
                        }
                        Err(e) => {
                            tracing::error!(device, "serial read failed: {}", e);
                            break;
                        }
                    }
                }
            }));
            self.writer = Some(writer);

            tracing::debug!(device = self.device, baud_rate = self.baud_rate, "serial port open");
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
            writer.flush().await?;
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            if let Some(mut writer) = self.writer.take() {
                writer.shutdown().await?;
            }
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> Result<()> {
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
            writer
                .write_all(data)
                .await
                .map_err(|e| Error::connection(format!("Failed to send: {}", e)))?;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.writer.is_some()
        }

        fn set_reader(&mut self, callback: DataCallback) {
            self.callback = Some(Arc::from(callback));
        }
    }

}
