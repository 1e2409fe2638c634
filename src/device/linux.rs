use crate::device::Device;
use nix::sys::socket::{setsockopt, sockopt};
use std::ffi::OsString;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// Wake-up datagram destination. TEST-NET-1 is never a local address, so
/// the kernel cannot short-circuit delivery even on a /32 tunnel.
const WAKE_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
/// Discard.
const WAKE_PORT: u16 = 9;

// LinuxTun wraps an interface created through /dev/net/tun
pub struct LinuxTun {
    device: tun_tap::Iface,
    ifindex: u32,
}

impl LinuxTun {
    /// Creates (or attaches to) `name` in TUN mode without the packet
    /// information header.
    pub fn open(name: &str) -> io::Result<Self> {
        let device = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tun)?;
        let ifindex = nix::net::if_::if_nametoindex(device.name()).map_err(io::Error::from)?;
        tracing::debug!(iface = device.name(), ifindex, "TUN device created");
        Ok(Self { device, ifindex })
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }
}

impl Device for LinuxTun {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.device.send(buf) // Direct passthrough
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.device.set_non_blocking()
    }

    /// A read blocked on a TUN fd does not return when the fd is closed.
    /// One datagram forced out through this interface makes the kernel hand
    /// a packet to the reader.
    fn wake_reader(&self) -> io::Result<()> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        setsockopt(&socket, sockopt::BindToDevice, &OsString::from(self.name()))?;
        socket.send_to(&[1], SocketAddrV4::new(WAKE_ADDR, WAKE_PORT))?;
        Ok(())
    }
}
