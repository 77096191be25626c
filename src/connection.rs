use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

use crate::decode::{self, DecodeError, Reading};
use crate::modbus::{self, FrameError, InvalidAddress, ModbusRtuCodec};
use crate::registers::RegisterIndex;

/// Transport-level failures. Any of these ends the poll pass; the serial
/// handle is dropped (and the port released) when the connection goes out of
/// scope.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open {1:?} for reading and writing")]
    OpenDevice(#[source] tokio_serial::Error, PathBuf),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the serial line")]
    Receive(#[source] std::io::Error),
    #[error("the serial line closed mid-poll")]
    Disconnected,
}

/// Failures scoped to a single register read. The poll pass reports these
/// and moves on to the next register.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error(transparent)]
    Address(#[from] InvalidAddress),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Path to the serial device the charge controller is attached to.
    ///
    /// RS485 transceiver direction control is the driver's business; the
    /// XR-USB adapters the controller ships with hard-code it.
    #[arg(long, short = 'd')]
    pub device: PathBuf,

    /// The modbus device ID to address on the bus.
    #[arg(long, short = 'i', default_value_t = 0x01)]
    pub device_id: u8,

    /// Consider a register read failed if the response is not complete
    /// within this amount of time.
    #[arg(long, default_value = "1s")]
    pub read_timeout: humantime::Duration,

    /// The baudrate the controller communicates at.
    #[arg(long, default_value_t = 115200)]
    pub baudrate: u32,
}

/// One serial line to one controller. Exactly one request/response cycle is
/// in flight at a time; the line is half-duplex and interleaved writes would
/// corrupt framing.
pub struct Connection<T> {
    io: Framed<T, ModbusRtuCodec>,
    device_id: u8,
    read_timeout: Duration,
}

/// The outcome of reading one catalog register during a poll pass.
#[derive(Debug)]
pub struct PollRecord {
    pub register: RegisterIndex,
    pub outcome: Result<Vec<Reading>, ReadError>,
}

impl Connection<tokio_serial::SerialStream> {
    /// Open and configure the serial device: 8 data bits, no parity, one
    /// stop bit, no software flow control.
    pub fn open(args: &Args) -> Result<Self, Error> {
        use tokio_serial::SerialPortBuilderExt as _;
        let port = tokio_serial::new(args.device.to_string_lossy(), args.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::OpenDevice(e, args.device.clone()))?;
        info!(message = "opened serial device", device = ?args.device, baudrate = args.baudrate);
        Ok(Self::new(port, args.device_id, *args.read_timeout))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    pub fn new(io: T, device_id: u8, read_timeout: Duration) -> Self {
        Self {
            io: Framed::new(io, ModbusRtuCodec {}),
            device_id,
            read_timeout,
        }
    }

    /// Perform one build→send→receive→parse→combine→decode cycle.
    ///
    /// The outer `Result` is the transport; the inner one is the register.
    pub async fn query(
        &mut self,
        register: RegisterIndex,
    ) -> Result<Result<Vec<Reading>, ReadError>, Error> {
        let request = modbus::Request {
            device_id: self.device_id,
            address: register.address(),
            words: register.word_count(),
        };
        // An uncovered address must fail before anything touches the wire.
        if let Err(e) = request.function_code() {
            return Ok(Err(e.into()));
        }
        self.io.send(&request).await.map_err(Error::Send)?;

        let response = match tokio::time::timeout(self.read_timeout, self.io.next()).await {
            Err(_elapsed) => {
                // Whatever accumulated was not a complete frame. Drop it so
                // the stragglers cannot be mistaken for the next response.
                self.io.read_buffer_mut().clear();
                return Ok(Err(FrameError::Incomplete.into()));
            }
            Ok(None) => return Err(Error::Disconnected),
            Ok(Some(Err(e))) => return Err(Error::Receive(e)),
            Ok(Some(Ok(Err(frame_error)))) => {
                self.io.read_buffer_mut().clear();
                return Ok(Err(frame_error.into()));
            }
            Ok(Some(Ok(Ok(response)))) => response,
        };
        trace!(
            message = "response",
            address = register.address(),
            device_id = response.device_id,
            function_code = response.function_code,
        );

        let expected = 2 * usize::from(register.word_count());
        if response.payload.len() != expected {
            let got = response.payload.len();
            return Ok(Err(FrameError::PayloadLength { expected, got }.into()));
        }
        let raw = match decode::combine_words(&response.payload) {
            Ok(raw) => raw,
            Err(e) => return Ok(Err(e.into())),
        };
        Ok(register
            .decoder()
            .decode(register.address(), raw, register.scale())
            .map_err(ReadError::from))
    }

    /// Sweep the whole catalog in ascending address order.
    ///
    /// Register-scoped failures are yielded inside their `PollRecord`;
    /// a transport failure ends the stream with an error. Each call starts a
    /// fresh pass.
    pub fn poll_all(&mut self) -> impl futures::Stream<Item = Result<PollRecord, Error>> + '_ {
        async_stream::try_stream! {
            for register in RegisterIndex::all() {
                let outcome = self.query(register).await?;
                if let Err(error) = &outcome {
                    debug!(
                        message = "register read failed",
                        address = register.address(),
                        name = register.name(),
                        error = %error,
                    );
                }
                yield PollRecord { register, outcome };
            }
        }
    }
}
