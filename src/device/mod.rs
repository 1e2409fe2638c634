#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
pub use self::darwin::Utun;
#[cfg(target_os = "linux")]
pub use self::linux::LinuxTun;

// Mock device for testing
#[cfg(test)]
pub mod mock;
#[cfg(test)]
pub use self::mock::{MockDevice, MockLink};

use std::io;

/// The TUN backend for the build target.
#[cfg(target_os = "linux")]
pub type PlatformDevice = LinuxTun;
#[cfg(target_os = "macos")]
pub type PlatformDevice = Utun;

/// An open TUN handle exchanging raw IP packets, one per call.
pub trait Device: Send + Sync {
    /// Kernel name of the interface backing this handle.
    fn name(&self) -> &str;

    /// Receive a packet from the device
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send a packet to the device
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Switch the handle to non-blocking reads.
    fn set_nonblocking(&self) -> io::Result<()>;

    /// Force a reader blocked in `recv` to return before the handle is
    /// released. Backends whose reads end on close leave this a no-op.
    fn wake_reader(&self) -> io::Result<()> {
        Ok(())
    }
}
