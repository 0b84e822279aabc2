use std::io::{ErrorKind, Read};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::{Result, SpecBoxError};

/// Forward every byte from the controller link into the command queue,
/// blocking for as long as the queue is full. Returns the number of bytes
/// forwarded once the link reaches EOF.
///
/// Must run on a plain thread, never inside the runtime.
pub fn pump_commands(mut link: impl Read, commands: &mpsc::Sender<u8>) -> Result<usize> {
    let mut buffer = [0u8; 64];
    let mut forwarded = 0;
    loop {
        let read = match link.read(&mut buffer) {
            Ok(0) => return Ok(forwarded),
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        for &byte in &buffer[..read] {
            debug!("Command byte {}", byte);
            if commands.blocking_send(byte).is_err() {
                warn!("Command queue closed");
                return Err(SpecBoxError::ChannelClosed);
            }
            forwarded += 1;
        }
    }
}
