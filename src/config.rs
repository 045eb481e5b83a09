use futures::{Stream, Sink};
use tokio::{net::TcpStream, io::{AsyncRead, AsyncWrite}};
use tokio_serial::{SerialStream, SerialPortBuilderExt};
use tokio_util::codec::Framed;
use url::Url;
use anyhow::{Result, Context, bail};

use crate::protocol::codec::{RxFrame, TxFrame, ToshibaCodec};


/// Line speed of the indoor unit's serial interface.
pub const BAUD_RATE: u32 = 9600;


pub enum Port {
    Serial(SerialStream),
    TcpRaw(TcpStream)
}


/// Raw byte link to the indoor unit.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Link for T
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{}


/// Frame level view of a port, for tools that only watch the link.
pub trait PortStream: Stream<Item = std::io::Result<RxFrame>> + Sink<TxFrame, Error = std::io::Error> + Send + Unpin {}

impl<T> PortStream for T
where
    T: Stream<Item = std::io::Result<RxFrame>> + Sink<TxFrame, Error = std::io::Error> + Send + Unpin,
{}


impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        match url.scheme() {
            "serial" => {
                let path = url.path();

                let port = tokio_serial::new(path, BAUD_RATE)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .stop_bits(tokio_serial::StopBits::One)
                    .parity(tokio_serial::Parity::Even)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {path}"))
                    ?;

                Ok(Self::Serial(port))
            },
            "tcp+raw" => {
                let host = url.host_str()
                    .with_context(|| format!("tcp+raw requires a host to be specified in the url: {url}"))?;

                let port = url.port()
                    .with_context(|| format!("tcp+raw requires a port number to be specified in the url: {url}"))?;

                let stream = TcpStream::connect((host, port)).await
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::TcpRaw(stream))
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn link(self) -> Box<dyn Link> {
        match self {
            Port::Serial(port) => Box::new(port),
            Port::TcpRaw(stream) => Box::new(stream),
        }
    }

    pub fn framed(self) -> Box<dyn PortStream> {
        Box::new(Framed::new(self.link(), ToshibaCodec::new()))
    }
}


/// Tuning of the adaptive thermostat and the unit's capabilities.
#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Gain applied to the difference between target and room temperature
    #[arg(long, default_value_t = 4.0)]
    pub multiplier: f64,

    /// Push the unit's setpoint to its limit while the room is far off target
    #[arg(long)]
    pub runaway_protection: bool,

    /// Reject cool and dry modes, falling back to fan only
    #[arg(long = "disable-cooling")]
    pub cooling_disabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            multiplier: 4.0,
            runaway_protection: false,
            cooling_disabled: false,
        }
    }
}
