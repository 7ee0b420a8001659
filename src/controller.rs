/// Hardware-register collaborator consumed by the command engine
///
/// A `Controller` is the thin layer over the controller's register file:
/// command/parameter transmission, the interrupt flag register with its
/// response FIFO, the sector data port and the vertical-sync counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::command::IntrResult;

/// One controller interrupt together with the response bytes latched with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqPacket {
    /// Interrupt class
    pub kind: IntrResult,
    /// Response FIFO contents; usually starts with the status byte
    pub response: Vec<u8>,
}

impl IrqPacket {
    /// Create a packet
    pub fn new(kind: IntrResult, response: Vec<u8>) -> Self {
        Self { kind, response }
    }

    /// First response byte, the status byte for most commands
    pub fn status_byte(&self) -> Option<u8> {
        self.response.first().copied()
    }
}

/// Register-level access to a CD-ROM controller
pub trait Controller {
    /// Write the parameter FIFO and the command register
    fn send(&mut self, opcode: u8, params: &[u8]);

    /// Read and acknowledge the next pending interrupt, if any
    fn poll_irq(&mut self) -> Option<IrqPacket>;

    /// Copy the pending sector from the data port into `buf`, blocking until
    /// the transfer completes; returns the number of bytes transferred
    fn get_sector(&mut self, buf: &mut [u8]) -> usize;

    /// Start a background transfer of the pending sector
    fn get_sector_dma(&mut self, buf: &mut [u8]) -> usize {
        self.get_sector(buf)
    }

    /// Whether a background sector transfer is still running
    fn dma_busy(&self) -> bool {
        false
    }

    /// Wait for the next vertical blank
    fn vsync(&mut self);
}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn send(&mut self, opcode: u8, params: &[u8]) {
        (**self).send(opcode, params)
    }

    fn poll_irq(&mut self) -> Option<IrqPacket> {
        (**self).poll_irq()
    }

    fn get_sector(&mut self, buf: &mut [u8]) -> usize {
        (**self).get_sector(buf)
    }

    fn get_sector_dma(&mut self, buf: &mut [u8]) -> usize {
        (**self).get_sector_dma(buf)
    }

    fn dma_busy(&self) -> bool {
        (**self).dma_busy()
    }

    fn vsync(&mut self) {
        (**self).vsync()
    }
}

/// Process-wide "media changed" flag
///
/// Set by the platform's lid/disc-swap detector, read and cleared by the
/// filesystem layer. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct MediaFlag(Arc<AtomicBool>);

impl MediaFlag {
    /// Create a flag, initially clear
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the media as changed
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag after the filesystem has been re-read
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether the media changed since the flag was last cleared
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
