use crate::device::Device;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

const UTUN_CONTROL_NAME: &[u8] = b"com.apple.net.utun_control\0";
const CTLIOCGINFO: libc::c_ulong = 0xc064_4e03;
const SYSPROTO_CONTROL: libc::c_int = 2;
const AF_SYS_CONTROL: u16 = 2;

/// utun prefixes every packet with the address family in network order.
const AF_HEADER_LEN: usize = 4;

#[repr(C)]
struct CtlInfo {
    ctl_id: u32,
    ctl_name: [u8; 96],
}

#[repr(C)]
struct SockaddrCtl {
    sc_len: u8,
    sc_family: u8,
    ss_sysaddr: u16,
    sc_id: u32,
    sc_unit: u32,
    sc_reserved: [u32; 5],
}

// Utun wraps a utun kernel control socket
pub struct Utun {
    fd: OwnedFd,
    name: String,
}

impl Utun {
    /// Connects to utun unit `index + 1`, which the kernel names `utun{index}`.
    pub fn open(index: u32) -> io::Result<Self> {
        let unit = control_unit(index)?;
        let raw = unsafe { libc::socket(libc::PF_SYSTEM, libc::SOCK_DGRAM, SYSPROTO_CONTROL) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Owned from here on so every error path below closes it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut info = CtlInfo {
            ctl_id: 0,
            ctl_name: [0; 96],
        };
        info.ctl_name[..UTUN_CONTROL_NAME.len()].copy_from_slice(UTUN_CONTROL_NAME);
        if unsafe { libc::ioctl(fd.as_raw_fd(), CTLIOCGINFO, &mut info as *mut CtlInfo) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let addr = SockaddrCtl {
            sc_len: mem::size_of::<SockaddrCtl>() as u8,
            sc_family: libc::AF_SYSTEM as u8,
            ss_sysaddr: AF_SYS_CONTROL,
            sc_id: info.ctl_id,
            sc_unit: unit,
            sc_reserved: [0; 5],
        };
        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const SockaddrCtl as *const libc::sockaddr,
                mem::size_of::<SockaddrCtl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let name = format!("utun{index}");
        tracing::debug!(iface = %name, "utun device created");
        Ok(Self { fd, name })
    }
}

/// Kernel control unit for `utun{index}`.
fn control_unit(index: u32) -> io::Result<u32> {
    index.checked_add(1).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("utun index {index} out of range"),
        )
    })
}

impl Device for Utun {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut header = [0u8; AF_HEADER_LEN];
        let mut iov = [
            libc::iovec {
                iov_base: header.as_mut_ptr().cast(),
                iov_len: header.len(),
            },
            libc::iovec {
                iov_base: buf.as_mut_ptr().cast(),
                iov_len: buf.len(),
            },
        ];
        let n = unsafe { libc::readv(self.fd.as_raw_fd(), iov.as_mut_ptr(), iov.len() as libc::c_int) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((n as usize).saturating_sub(AF_HEADER_LEN))
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let family = match buf.first().map(|b| b >> 4) {
            Some(6) => libc::AF_INET6,
            _ => libc::AF_INET,
        };
        let header = (family as u32).to_be_bytes();
        let iov = [
            libc::iovec {
                iov_base: header.as_ptr() as *mut libc::c_void,
                iov_len: header.len(),
            },
            libc::iovec {
                iov_base: buf.as_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            },
        ];
        let n = unsafe { libc::writev(self.fd.as_raw_fd(), iov.as_ptr(), iov.len() as libc::c_int) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((n as usize).saturating_sub(AF_HEADER_LEN))
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        let fd = self.fd.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// A pending read on the control socket ends once the socket stops
    /// receiving. Shutting it down keeps the descriptor itself alive until
    /// the last reader lets go of the handle.
    fn wake_reader(&self) -> io::Result<()> {
        if unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RD) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
