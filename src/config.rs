//! Caller-supplied tunnel configuration.
//!
//! A `Config` is built once and handed to [`Tunnel`](crate::Tunnel) by
//! value; the tunnel never mutates it afterwards.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;

use crate::error::{Result, TunnelError};

/// MTU used when the configured value is zero.
pub const DEFAULT_MTU: u16 = 1500;

/// Smallest MTU an IPv4 interface must support (RFC 791).
pub const MIN_MTU: u16 = 68;

pub const DEFAULT_NAME_TEMPLATE: &str = "utun%d";

/// Wait between retries when a non-blocking read has nothing to deliver.
pub const DEFAULT_READ_BACKOFF: Duration = Duration::from_millis(500);

/// Linux `IFNAMSIZ` minus the trailing NUL.
const MAX_IFACE_NAME: usize = 15;

/// How `Tunnel::read` reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Read straight from the handle on the calling thread.
    #[default]
    Direct,
    /// Hand reads to a dedicated thread that can be stopped by `close`.
    Cancellable,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Index substituted into `name_template` (and the utun unit on macOS).
    pub device_index: u32,
    /// Point-to-point address; acts as both local and peer endpoint.
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Interface MTU, `0` selects [`DEFAULT_MTU`].
    pub mtu: u16,
    /// Interface name pattern, `%d` or `{}` is replaced by `device_index`.
    pub name_template: String,
    pub read_mode: ReadMode,
    /// Log configuration commands and their output at `info` level.
    pub debug: bool,
    pub read_backoff: Duration,
}

impl Config {
    pub fn new(device_index: u32, gateway: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            device_index,
            gateway,
            netmask,
            mtu: DEFAULT_MTU,
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            read_mode: ReadMode::default(),
            debug: false,
            read_backoff: DEFAULT_READ_BACKOFF,
        }
    }

    /// Builds a config from a gateway in CIDR form, e.g. `10.8.0.1/24`.
    pub fn from_cidr(device_index: u32, cidr: &str) -> Result<Self> {
        let net: Ipv4Net = cidr
            .parse()
            .map_err(|e| TunnelError::invalid_config("gateway", format!("{cidr}: {e}")))?;
        Ok(Self::new(device_index, net.addr(), net.netmask()))
    }

    #[must_use]
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    #[must_use]
    pub fn with_name_template(mut self, template: impl Into<String>) -> Self {
        self.name_template = template.into();
        self
    }

    #[must_use]
    pub const fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_read_backoff(mut self, backoff: Duration) -> Self {
        self.read_backoff = backoff;
        self
    }

    pub fn effective_mtu(&self) -> u16 {
        if self.mtu == 0 {
            DEFAULT_MTU
        } else {
            self.mtu
        }
    }

    /// Expands `name_template` with `device_index`. A template without a
    /// placeholder is used verbatim.
    pub fn interface_name(&self) -> String {
        let index = self.device_index.to_string();
        if self.name_template.contains("%d") {
            self.name_template.replacen("%d", &index, 1)
        } else {
            self.name_template.replacen("{}", &index, 1)
        }
    }

    /// Gateway address paired with its prefix length, e.g. `10.8.0.1/24`.
    pub fn gateway_net(&self) -> Result<Ipv4Net> {
        Ipv4Net::with_netmask(self.gateway, self.netmask).map_err(|_| {
            TunnelError::invalid_config(
                "netmask",
                format!("{} is not a contiguous network mask", self.netmask),
            )
        })
    }

    /// The network reachable through the tunnel, e.g. `10.8.0.0/24`.
    pub fn network(&self) -> Result<Ipv4Net> {
        Ok(self.gateway_net()?.trunc())
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.interface_name();
        if name.is_empty() {
            return Err(TunnelError::invalid_config(
                "name_template",
                "interface name cannot be empty",
            ));
        }
        if name.len() > MAX_IFACE_NAME {
            return Err(TunnelError::invalid_config(
                "name_template",
                format!("interface name '{name}' exceeds {MAX_IFACE_NAME} bytes"),
            ));
        }
        if name.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(TunnelError::invalid_config(
                "name_template",
                format!("interface name '{name}' contains invalid characters"),
            ));
        }

        if self.mtu != 0 && self.mtu < MIN_MTU {
            return Err(TunnelError::invalid_config(
                "mtu",
                format!("MTU must be at least {MIN_MTU} bytes"),
            ));
        }

        if self.read_mode == ReadMode::Cancellable && self.read_backoff.is_zero() {
            return Err(TunnelError::invalid_config(
                "read_backoff",
                "backoff must be non-zero in cancellable mode",
            ));
        }

        self.gateway_net().map(|_| ())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(0, Ipv4Addr::new(10, 8, 0, 1), Ipv4Addr::new(255, 255, 255, 0))
    }
}
