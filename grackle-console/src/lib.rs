//! Buffered console host for the grackle virtual machine
#![warn(missing_docs)]
use std::collections::VecDeque;
use std::io::Write;

use log::error;
use vm::{Fault, Host};

/// Host which buffers program output and replays queued input
///
/// Output accumulates in memory until it is taken with [`Console::stdout`]
/// or written out with [`Console::flush`], so callers decide when bytes hit
/// the terminal. Fault codes are logged as they arrive and kept for later
/// inspection.
#[derive(Default)]
pub struct Console {
    stdout: Vec<u8>,
    input: VecDeque<u8>,
    faults: Vec<u8>,
}

impl Console {
    /// Builds a new console with empty buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the program to read, oldest first
    pub fn queue_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Takes the buffered output, leaving the buffer empty
    pub fn stdout(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stdout)
    }

    /// Fault codes reported so far, in order
    pub fn faults(&self) -> &[u8] {
        &self.faults
    }

    /// Writes the buffered output to the real stdout and empties the buffer
    pub fn flush(&mut self) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(&self.stdout)?;
        out.flush()?;
        self.stdout.clear();
        Ok(())
    }
}

impl Host for Console {
    fn log_error(&mut self, code: u8) {
        match Fault::from_code(code) {
            Some(f) => error!("vm fault {code}: {f:?}"),
            None => error!("vm fault {code}"),
        }
        self.faults.push(code);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
    }

    fn put_char(&mut self, byte: u8) {
        self.stdout.push(byte);
    }

    fn get_char(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffers_output() {
        let mut c = Console::new();
        c.write_bytes(b"hello");
        c.put_char(b'!');
        assert_eq!(c.stdout(), b"hello!");
        assert_eq!(c.stdout(), b"");
    }

    #[test]
    fn queued_input_feeds_get_char() {
        let mut c = Console::new();
        c.queue_input(b"ab");
        assert_eq!(c.get_char(), Some(b'a'));
        assert_eq!(c.get_char(), Some(b'b'));
        assert_eq!(c.get_char(), None);
    }

    #[test]
    fn records_fault_codes() {
        let mut c = Console::new();
        c.log_error(2);
        c.log_error(6);
        assert_eq!(c.faults(), [2, 6]);
    }
}
