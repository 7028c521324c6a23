//! Protocol Buffers messages for persisted array schemas.

use protobuf::Message;
use std::io::{Read, Write};

use crate::error::Error;

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));

/// Reads a message from a given reader.
pub fn read_message<M, R>(r: &mut R) -> Result<M, Error>
where
    M: Message,
    R: Read,
{
    Ok(M::parse_from_reader(r)?)
}

/// Writes a message to a given writer.
pub fn write_message<M, W>(message: &M, w: &mut W) -> Result<(), Error>
where
    M: Message,
    W: Write,
{
    Ok(message.write_to_writer(w)?)
}
