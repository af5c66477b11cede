use crate::config::Config;
use crate::connection::SerialTransport;
use crate::WsunAdaptor;

impl WsunAdaptor {
    /// Create a driver for an adaptor on the serial device named in `config`.
    ///
    /// The port is opened by [`open`](WsunAdaptor::open).
    pub fn serial(config: Config) -> WsunAdaptor {
        let transport = SerialTransport::from_config(&config);
        WsunAdaptor::new(transport, config)
    }
}
