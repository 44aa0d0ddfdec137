//! Scripted in-memory port used by unit tests.
//!
//! Device output is replayed from a script of byte chunks and idle reads. An
//! idle read blocks for the port timeout, like a real port with no data.
//! Everything the host writes is recorded. `discard_input` only counts calls:
//! scripted output stands for bytes the device sends after the discard.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

const IDLE_READ: Duration = Duration::from_millis(10);

#[derive(Debug)]
enum Event {
    Bytes(Vec<u8>),
    Idle,
}

#[derive(Debug)]
pub(crate) struct ScriptedPort {
    script: VecDeque<Event>,
    written: Vec<u8>,
    discards: usize,
    closed: bool,
    timeout: Duration,
}

impl ScriptedPort {
    pub(crate) fn new() -> Self {
        Self {
            script: VecDeque::new(),
            written: Vec::new(),
            discards: 0,
            closed: false,
            timeout: IDLE_READ,
        }
    }

    /// Queue raw device output.
    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.script.push_back(Event::Bytes(bytes.to_vec()));
        self
    }

    /// Queue a device token or text line exactly as given.
    pub(crate) fn push_token(&mut self, token: &[u8]) -> &mut Self {
        self.push_bytes(token)
    }

    /// Queue one read that times out.
    pub(crate) fn push_idle(&mut self) -> &mut Self {
        self.script.push_back(Event::Idle);
        self
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn discards(&self) -> usize {
        self.discards
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.script.is_empty()
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.script.pop_front() {
            Some(Event::Idle) => {
                thread::sleep(self.timeout);
                Err(io::Error::new(io::ErrorKind::TimedOut, "idle"))
            },
            Some(Event::Bytes(mut bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.script.push_front(Event::Bytes(rest));
                }
                Ok(n)
            },
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "script exhausted",
            )),
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn name(&self) -> &str {
        "scripted"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.discards += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
