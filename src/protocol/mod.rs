//! Wire protocol and transports for the light organ

mod client;
mod messages;

pub use client::{list_serial_ports, ClientError, ConsoleTransport, LampTransport, SerialTransport};
pub use messages::*;
