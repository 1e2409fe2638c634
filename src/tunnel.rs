//! The tunnel instance: open handle, configuration and lifecycle.
//!
//! A `Tunnel` moves through `Created -> Open -> Closed` exactly once. The
//! transition to `Closed` is a single atomic update, so however many threads
//! race on [`Tunnel::close`] only one of them tears the device down.
//!
//! Teardown order:
//! 1. stop the read loop (cancellable mode),
//! 2. wake a reader blocked in the kernel (direct mode),
//! 3. drop the instance's reference to the handle. A reader still inside
//!    `recv` holds its own reference, so the descriptor is released after it
//!    returns, never underneath it.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ipnet::Ipv4Net;

use crate::config::{Config, ReadMode};
use crate::device::Device;
use crate::error::{Result, TunnelError};
use crate::netcfg::{self, host, CommandRunner, Configurator, Interface};
use crate::reader::{ReadLoop, ReadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Device opened, setup still running.
    Created = 0,
    Open = 1,
    Closed = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Created,
            1 => State::Open,
            _ => State::Closed,
        }
    }
}

/// Tunnel backed by the TUN implementation of the build target.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub type PlatformTunnel = Tunnel<crate::device::PlatformDevice>;

pub struct Tunnel<D: Device + 'static> {
    config: Config,
    name: String,
    gateway: Ipv4Net,
    network: Ipv4Net,
    device: Mutex<Option<Arc<D>>>,
    reader: Option<ReadLoop>,
    runner: Box<dyn CommandRunner>,
    state: AtomicU8,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl Tunnel<crate::device::PlatformDevice> {
    /// Opens the platform TUN device described by `config`, assigns its
    /// address and installs the route to its network.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_backend(config, netcfg::ShellRunner, open_platform)
    }
}

#[cfg(target_os = "linux")]
fn open_platform(config: &Config) -> io::Result<crate::device::LinuxTun> {
    crate::device::LinuxTun::open(&config.interface_name())
}

#[cfg(target_os = "macos")]
fn open_platform(config: &Config) -> io::Result<crate::device::Utun> {
    crate::device::Utun::open(config.device_index)
}

impl<D: Device + 'static> Tunnel<D> {
    /// Builds a tunnel on top of a caller-chosen device and command runner.
    ///
    /// `config` is validated before `open` is called; nothing is opened for
    /// a rejected config. If any later step fails the device is released
    /// before the error is returned.
    pub fn with_backend<R, F>(config: Config, runner: R, open: F) -> Result<Self>
    where
        R: CommandRunner + 'static,
        F: FnOnce(&Config) -> io::Result<D>,
    {
        config.validate()?;
        let gateway = config.gateway_net()?;
        let requested = config.interface_name();

        let device = open(&config).map_err(|e| TunnelError::device_open(&requested, e))?;
        let name = device.name().to_string();
        if name != requested {
            tracing::warn!(requested = %requested, iface = %name, "kernel picked a different interface name");
        }
        tracing::debug!(iface = %name, index = config.device_index, "device opened");

        let mut tunnel = Self {
            config,
            name,
            gateway,
            network: gateway.trunc(),
            device: Mutex::new(Some(Arc::new(device))),
            reader: None,
            runner: Box::new(runner),
            state: AtomicU8::new(State::Created as u8),
        };

        if let Err(err) = tunnel.start() {
            tracing::debug!(iface = %tunnel.name, error = %err, "setup failed, releasing device");
            tunnel.teardown(false);
            return Err(err);
        }
        Ok(tunnel)
    }

    fn start(&mut self) -> Result<()> {
        if self.config.read_mode == ReadMode::Cancellable {
            let device = self.device().ok_or(TunnelError::Closed)?;
            device
                .set_nonblocking()
                .map_err(|e| TunnelError::device_open(&self.name, e))?;
            self.reader = Some(ReadLoop::spawn(device, self.config.read_backoff)?);
        }

        if self
            .state
            .compare_exchange(
                State::Created as u8,
                State::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(TunnelError::Closed);
        }

        let iface = Interface {
            name: &self.name,
            gateway: self.gateway,
            mtu: self.config.effective_mtu(),
        };
        self.configurator().apply(&host::setup(&iface))?;

        tracing::info!(
            iface = %self.name,
            network = %self.network,
            mtu = iface.mtu,
            mode = ?self.config.read_mode,
            "tunnel up"
        );
        Ok(())
    }

    /// Reads the next packet into `buf`.
    ///
    /// Returns `Ok(0)` (end-of-stream) once the tunnel is closed or closing.
    /// In direct mode a read that was in flight when `close` ran reports
    /// end-of-stream even if the kernel handed it a packet, because that
    /// packet may be the wake-up datagram.
    ///
    /// An empty `buf` is rejected while the tunnel is open, since `Ok(0)`
    /// would read as end-of-stream and a packet would be consumed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            if self.is_closed() {
                return Ok(0);
            }
            return Err(TunnelError::Read(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read buffer is empty",
            )));
        }

        if let Some(reader) = &self.reader {
            return match reader.read(buf) {
                ReadOutcome::Data(n) => Ok(n),
                ReadOutcome::Failed(_) if self.is_closed() => Ok(0),
                ReadOutcome::Failed(err) => Err(TunnelError::Read(err)),
                ReadOutcome::Stopped => Ok(0),
            };
        }

        let Some(device) = self.device() else {
            return Ok(0);
        };
        let result = device.recv(buf);
        drop(device);

        if self.is_closed() {
            return Ok(0);
        }
        result.map_err(TunnelError::Read)
    }

    /// Writes one packet. Fails with [`TunnelError::Closed`] after `close`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let device = self.device().ok_or(TunnelError::Closed)?;
        let n = device.send(buf).map_err(TunnelError::Write)?;
        tracing::trace!(iface = %self.name, bytes = n, "packet written");
        Ok(n)
    }

    /// Routes `cidr` through this interface. A target that is not a valid
    /// CIDR is handed to the route command as given.
    pub fn route(&self, cidr: &str) -> Result<()> {
        if self.is_closed() {
            return Err(TunnelError::Closed);
        }
        let target = netcfg::normalize_cidr(cidr);
        self.configurator().exec(&host::route(&self.name, &target))
    }

    /// Closes the tunnel. Safe to call from any thread, any number of times,
    /// concurrently with a pending `read`; only the first call does work.
    pub fn close(&self) -> Result<()> {
        self.teardown(true);
        Ok(())
    }

    fn teardown(&self, wake_reader: bool) -> bool {
        let closed = State::Closed as u8;
        if self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != closed).then_some(closed)
            })
            .is_err()
        {
            return false;
        }
        tracing::debug!(iface = %self.name, "closing");

        if let Some(reader) = &self.reader {
            reader.stop();
        }

        let device = lock(&self.device).take();
        if let Some(device) = device {
            if wake_reader && self.config.read_mode == ReadMode::Direct {
                if let Err(err) = device.wake_reader() {
                    tracing::warn!(iface = %self.name, error = %err, "failed to wake reader");
                }
            }
            drop(device);
        }

        tracing::info!(iface = %self.name, "tunnel closed");
        true
    }

    fn device(&self) -> Option<Arc<D>> {
        lock(&self.device).clone()
    }

    fn configurator(&self) -> Configurator<'_> {
        Configurator::new(self.runner.as_ref(), self.config.debug)
    }

    /// Interface name as reported by the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Network routed through the tunnel, e.g. `10.8.0.0/24`.
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    pub fn mtu(&self) -> u16 {
        self.config.effective_mtu()
    }

    pub fn read_mode(&self) -> ReadMode {
        self.config.read_mode
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }
}

impl<D: Device + 'static> Drop for Tunnel<D> {
    fn drop(&mut self) {
        // Exclusive access: no reader can be blocked on the handle.
        self.teardown(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
