//! Host-side mocks shared by the unit tests

use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use embedded_hal::i2c::{self, ErrorKind as I2cErrorKind, I2c, NoAcknowledgeSource, Operation};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

static CLOCK: Mutex<()> = Mutex::new(());

/// Hold while a test depends on the global mock clock.
///
/// `MockDriver` time is process-wide, so a test that advances it must not
/// overlap with one that waits on a deadline.
pub fn clock() -> MutexGuard<'static, ()> {
    CLOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll a future once without an executor
pub fn poll_step<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    future.poll(&mut Context::from_waker(Waker::noop()))
}

/// NACK raised by [`RegisterBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl i2c::Error for BusFault {
    fn kind(&self) -> I2cErrorKind {
        I2cErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

#[derive(Debug, Default)]
struct BusState {
    regs: [u8; 16],
    commands: Vec<u8>,
    faulted: bool,
    pointer: usize,
}

/// TSL2561-like register file behind a fake I2C bus.
///
/// Clones share the same registers so a test keeps a handle after moving the
/// bus into a driver.
#[derive(Clone, Debug)]
pub struct RegisterBus {
    address: u8,
    state: Rc<RefCell<BusState>>,
}

impl RegisterBus {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            state: Rc::new(RefCell::new(BusState::default())),
        }
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.state.borrow().regs[usize::from(reg & 0x0F)]
    }

    pub fn set_register(&self, reg: u8, value: u8) {
        self.state.borrow_mut().regs[usize::from(reg & 0x0F)] = value;
    }

    pub fn set_channels(&self, ch0: u16, ch1: u16) {
        let [c0_lo, c0_hi] = ch0.to_le_bytes();
        let [c1_lo, c1_hi] = ch1.to_le_bytes();
        let mut state = self.state.borrow_mut();
        state.regs[0x0C] = c0_lo;
        state.regs[0x0D] = c0_hi;
        state.regs[0x0E] = c1_lo;
        state.regs[0x0F] = c1_hi;
    }

    /// Make every following transaction NACK (or recover)
    pub fn set_faulted(&self, faulted: bool) {
        self.state.borrow_mut().faulted = faulted;
    }

    /// Command bytes seen so far, in order
    pub fn commands(&self) -> Vec<u8> {
        self.state.borrow().commands.clone()
    }
}

impl i2c::ErrorType for RegisterBus {
    type Error = BusFault;
}

impl I2c for RegisterBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.faulted || address != self.address {
            return Err(BusFault);
        }

        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    let (command, data) = bytes.split_first().ok_or(BusFault)?;
                    state.commands.push(*command);
                    state.pointer = usize::from(command & 0x0F);
                    for (i, byte) in data.iter().enumerate() {
                        let reg = (state.pointer + i) % 16;
                        state.regs[reg] = *byte;
                    }
                }
                Operation::Read(buf) => {
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = state.regs[(state.pointer + i) % 16];
                    }
                }
            }
        }
        Ok(())
    }
}

/// Byte stream that replays a scripted request and records the response.
///
/// Every read and write yields once so concurrent connections interleave
/// when joined on one executor.
pub struct ScriptedStream {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    fail_writes: bool,
    stall: bool,
    pub output: Vec<u8>,
    pub flushed: bool,
}

impl ScriptedStream {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            chunk: usize::MAX,
            fail_writes: false,
            stall: false,
            output: Vec::new(),
            flushed: false,
        }
    }

    /// Deliver the request at most `chunk` bytes per read
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Once the input is used up, reads never complete instead of
    /// reporting end of stream
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn output_str(&self) -> &str {
        core::str::from_utf8(&self.output).expect("response is UTF-8")
    }
}

impl ErrorType for ScriptedStream {
    type Error = ErrorKind;
}

impl Read for ScriptedStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        embassy_futures::yield_now().await;
        if self.stall && self.pos == self.input.len() {
            core::future::pending::<()>().await;
        }
        let remaining = &self.input[self.pos..];
        let n = remaining.len().min(buf.len()).min(self.chunk);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        embassy_futures::yield_now().await;
        if self.fail_writes {
            return Err(ErrorKind::ConnectionReset);
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushed = true;
        Ok(())
    }
}
