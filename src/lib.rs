//! Protocol core and CLI plumbing for polling a Commander-class MPPT solar
//! charge controller over an RS485 serial line.

pub mod commands;
pub mod connection;
pub mod crc;
pub mod decode;
pub mod modbus;
pub mod output;
pub mod registers;
