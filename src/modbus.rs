use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::crc;

/// Upper bound on how many bytes a response may occupy.
///
/// The largest catalog read is two words (9 bytes on the wire); anything
/// approaching this limit means the line is feeding us garbage rather than a
/// frame, so the read is cut off and handed to validation.
pub const MAX_RESPONSE_BYTES: usize = 100;

/// Device id, function code, payload byte count.
pub const RESPONSE_HEADER_BYTES: usize = 3;
pub const CRC_BYTES: usize = 2;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("register address {0:#06x} is not covered by any read function")]
pub struct InvalidAddress(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
}

/// The function code is determined entirely by which address window the
/// register lives in. Addresses between the coil block and the input
/// register blocks do not exist on this device and are rejected before any
/// traffic is generated.
pub fn function_code(address: u16) -> Result<FunctionCode, InvalidAddress> {
    if address < 0x15 {
        Ok(FunctionCode::ReadCoils)
    } else if (0x1000..0x9000).contains(&address) {
        Ok(FunctionCode::ReadInputRegisters)
    } else if address >= 0x9000 {
        Ok(FunctionCode::ReadHoldingRegisters)
    } else {
        Err(InvalidAddress(address))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub address: u16,
    pub words: u8,
}

impl Request {
    pub fn function_code(&self) -> Result<FunctionCode, InvalidAddress> {
        function_code(self.address)
    }

    /// Serialize into the fixed 8-byte wire frame, folding the checksum over
    /// the leading bytes as they are laid down. The checksum trailer goes out
    /// low byte first.
    pub fn frame(&self) -> Result<[u8; 8], InvalidAddress> {
        let code = self.function_code()?;
        let [address_high, address_low] = self.address.to_be_bytes();
        let mut frame = [
            self.device_id,
            code as u8,
            address_high,
            address_low,
            0x00,
            self.words,
            0,
            0,
        ];
        let mut crc = crc::INITIAL;
        for &byte in &frame[..6] {
            crc = crc::step(byte, crc);
        }
        let [low, high] = crc.to_le_bytes();
        frame[6] = low;
        frame[7] = high;
        Ok(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub function_code: u8,
    pub payload: Vec<u8>,
}

/// Ways a received byte sequence can fail to be a usable response.
///
/// All of these are scoped to the one register being read; the line itself is
/// still healthy and the poll pass continues.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("response of {got} bytes is shorter than its header and checksum require ({expected})")]
    TooShort { expected: usize, got: usize },
    #[error("response checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch { computed: u16, received: u16 },
    #[error("response claims a frame larger than the {MAX_RESPONSE_BYTES} byte read budget")]
    Oversized,
    #[error("response carries {got} payload bytes where {expected} were requested")]
    PayloadLength { expected: usize, got: usize },
    #[error("no complete response arrived within the read timeout")]
    Incomplete,
}

/// Wire codec for the controller's RTU-style serial framing.
///
/// Frame-level problems are surfaced as items rather than stream errors so
/// that one corrupted response does not tear down the connection: the decoder
/// consumes the offending bytes and the caller decides how to proceed.
pub struct ModbusRtuCodec {}

impl Encoder<&Request> for ModbusRtuCodec {
    type Error = std::io::Error;

    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = req
            .frame()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&frame);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusRtuCodec {
    type Item = Result<Response, FrameError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        trace!(message = "attempt at decoding", buffer = ?src);
        if src.len() < RESPONSE_HEADER_BYTES {
            return Ok(None);
        }
        let byte_count = usize::from(src[2]);
        let total = RESPONSE_HEADER_BYTES + byte_count + CRC_BYTES;
        if total > MAX_RESPONSE_BYTES {
            src.advance(src.len());
            return Ok(Some(Err(FrameError::Oversized)));
        }
        if src.len() < total {
            return Ok(None);
        }
        let computed = crc::checksum(&src[..total - CRC_BYTES]);
        let received = u16::from_le_bytes([src[total - 2], src[total - 1]]);
        if computed != received {
            src.advance(total);
            return Ok(Some(Err(FrameError::CrcMismatch { computed, received })));
        }
        let device_id = src[0];
        let function_code = src[1];
        let payload = src[RESPONSE_HEADER_BYTES..total - CRC_BYTES].to_vec();
        src.advance(total);
        trace!(message = "decoded response", device_id, function_code, bytes = payload.len());
        Ok(Some(Ok(Response { device_id, function_code, payload })))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => {
                let got = src.len();
                let expected = if got < RESPONSE_HEADER_BYTES {
                    RESPONSE_HEADER_BYTES + CRC_BYTES
                } else {
                    RESPONSE_HEADER_BYTES + usize::from(src[2]) + CRC_BYTES
                };
                src.advance(got);
                Ok(Some(Err(FrameError::TooShort { expected, got })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn respond(device_id: u8, function_code: u8, payload: &[u8]) -> Vec<u8> {
        let mut raw = vec![device_id, function_code, payload.len() as u8];
        raw.extend_from_slice(payload);
        let crc = crc::checksum(&raw);
        raw.extend_from_slice(&crc.to_le_bytes());
        raw
    }

    #[test]
    fn coil_addresses_use_function_0x01() {
        for address in 0x00..0x15 {
            assert_eq!(function_code(address), Ok(FunctionCode::ReadCoils));
        }
    }

    #[test]
    fn input_register_addresses_use_function_0x04() {
        for address in [0x1000, 0x2000, 0x2FFF, 0x3000, 0x3302, 0x8FFF] {
            assert_eq!(function_code(address), Ok(FunctionCode::ReadInputRegisters));
        }
    }

    #[test]
    fn holding_register_addresses_use_function_0x03() {
        for address in [0x9000, 0x9070, 0xFFFF] {
            assert_eq!(function_code(address), Ok(FunctionCode::ReadHoldingRegisters));
        }
    }

    #[test]
    fn the_gap_between_coils_and_registers_is_rejected() {
        for address in [0x15, 0x16, 0x0800, 0x0FFF] {
            assert_eq!(function_code(address), Err(InvalidAddress(address)));
        }
    }

    #[test]
    fn request_frame_layout() {
        let request = Request { device_id: 0x01, address: 0x3100, words: 1 };
        let frame = request.frame().unwrap();
        assert_eq!(&frame[..6], &[0x01, 0x04, 0x31, 0x00, 0x00, 0x01]);
        // The trailer must be the checksum of the leading bytes, low byte
        // first, which is equivalent to a zero residue over the whole frame.
        assert_eq!(u16::from_le_bytes([frame[6], frame[7]]), crc::checksum(&frame[..6]));
        assert_eq!(crc::checksum(&frame), 0x0000);
    }

    #[test]
    fn request_frame_refuses_uncovered_addresses() {
        let request = Request { device_id: 0x01, address: 0x0020, words: 1 };
        assert_eq!(request.frame(), Err(InvalidAddress(0x0020)));
    }

    #[test]
    fn well_formed_response_yields_the_exact_payload() {
        let mut src = BytesMut::from(&respond(0x01, 0x04, &[0x12, 0x34])[..]);
        let mut codec = ModbusRtuCodec {};
        let response = codec.decode(&mut src).unwrap().unwrap().unwrap();
        assert_eq!(response.device_id, 0x01);
        assert_eq!(response.function_code, 0x04);
        assert_eq!(response.payload, vec![0x12, 0x34]);
        assert!(src.is_empty());
    }

    #[test]
    fn partial_response_waits_for_more_bytes() {
        let raw = respond(0x01, 0x04, &[0x12, 0x34]);
        let mut src = BytesMut::from(&raw[..raw.len() - 1]);
        let mut codec = ModbusRtuCodec {};
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn corrupted_checksum_is_reported_and_consumed() {
        let mut raw = respond(0x01, 0x04, &[0x12, 0x34]);
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let mut src = BytesMut::from(&raw[..]);
        let mut codec = ModbusRtuCodec {};
        let item = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(item, Err(FrameError::CrcMismatch { .. })));
        assert!(src.is_empty());
    }

    #[test]
    fn truncated_response_fails_at_end_of_input() {
        let raw = respond(0x01, 0x04, &[0x12, 0x34, 0x56, 0x78]);
        let mut src = BytesMut::from(&raw[..4]);
        let mut codec = ModbusRtuCodec {};
        let item = codec.decode_eof(&mut src).unwrap().unwrap();
        assert_eq!(item, Err(FrameError::TooShort { expected: 9, got: 4 }));
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn absurd_byte_count_is_cut_off() {
        let mut src = BytesMut::from(&[0x01, 0x04, 0xFF][..]);
        let mut codec = ModbusRtuCodec {};
        let item = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(item, Err(FrameError::Oversized));
    }
}
