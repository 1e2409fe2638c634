//! Cross-platform TUN tunnels: open a kernel TUN device, give it a
//! point-to-point address and a route, then move raw IP packets through it.
//!
//! ```no_run
//! use tunnel::{Config, PlatformTunnel, ReadMode};
//!
//! let config = Config::from_cidr(0, "10.8.0.1/24")?.with_read_mode(ReadMode::Cancellable);
//! let tun = PlatformTunnel::new(config)?;
//! let mut buf = vec![0u8; tun.mtu() as usize];
//! let n = tun.read(&mut buf)?;
//! tun.write(&buf[..n])?;
//! tun.close()?;
//! # Ok::<(), tunnel::TunnelError>(())
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod netcfg;
mod reader;
pub mod tunnel;


pub use config::{Config, ReadMode};
pub use device::Device;
pub use error::{Result, TunnelError};
pub use netcfg::{CommandOutput, CommandRunner, ShellRunner};
pub use tunnel::{State, Tunnel};

#[cfg(any(target_os = "linux", target_os = "macos"))]
pub use device::PlatformDevice;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub use tunnel::PlatformTunnel;
