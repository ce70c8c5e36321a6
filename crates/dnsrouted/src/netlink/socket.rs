//! NETLINK_ROUTE socket and interface lookups
//!
//! Linux builds talk to the kernel through `netlink-sys` and `nix`; other
//! targets get a stand-in whose constructors fail, so the daemon logic and
//! its tests still build there.

use dnsroute_types::{InterfaceConfig, IpAddress};
use std::collections::BTreeMap;

/// getifaddrs(3) view of one interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub config: InterfaceConfig,
    /// Broadcast or peer address announced with each local address
    pub remotes: BTreeMap<IpAddress, IpAddress>,
}

#[cfg(target_os = "linux")]
mod linux {
    use super::InterfaceSnapshot;
    use crate::error::{Result, RoutedError};
    use dnsroute_types::{InterfaceConfig, IpAddress};
    use std::collections::BTreeMap;
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use nix::errno::Errno;
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::{InterfaceFlags, if_nametoindex};
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use nix::sys::socket::SockaddrStorage;
    use std::io;
    use std::os::fd::{AsRawFd, BorrowedFd};
    use tracing::{debug, instrument, warn};

    /// Largest datagram the kernel sends on a route socket
    const RECV_DATAGRAM_SIZE: usize = 64 * 1024;

    /// Bound NETLINK_ROUTE socket with a reusable receive buffer.
    pub struct RouteSocket {
        socket: Socket,
        buffer: Vec<u8>,
    }

    impl RouteSocket {
        /// Opens a socket subscribed to the `RTMGRP_*` bitmask in `groups`.
        ///
        /// A `recv_buffer_size` of 0 keeps the kernel default SO_RCVBUF.
        #[instrument]
        pub fn open(groups: u32, recv_buffer_size: usize) -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| RoutedError::netlink("failed to create socket", e))?;
            socket
                .bind(&SocketAddr::new(0, groups))
                .map_err(|e| RoutedError::netlink("failed to bind socket", e))?;

            let route_socket = Self {
                socket,
                buffer: Vec::with_capacity(RECV_DATAGRAM_SIZE),
            };
            if recv_buffer_size > 0 {
                route_socket.set_recv_buffer(recv_buffer_size);
            }
            debug!(groups = format_args!("{:#x}", groups), "Route socket bound");
            Ok(route_socket)
        }

        fn set_recv_buffer(&self, size: usize) {
            let value = size.min(libc::c_int::MAX as usize) as libc::c_int;
            let ret = unsafe {
                libc::setsockopt(
                    self.socket.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_RCVBUF,
                    &value as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                warn!(
                    error = %io::Error::last_os_error(),
                    "Failed to set SO_RCVBUF, using default buffer size"
                );
            } else {
                debug!(size, "Set socket receive buffer");
            }
        }

        /// Waits up to `timeout_ms` for a datagram.
        ///
        /// Returns `Ok(false)` on timeout or when the wait was interrupted by a
        /// signal.
        pub fn wait_readable(&self, timeout_ms: u16) -> Result<bool> {
            // SAFETY: the descriptor is owned by `self.socket` and outlives this call
            let fd = unsafe { BorrowedFd::borrow_raw(self.socket.as_raw_fd()) };
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(0) => Ok(false),
                Ok(_) => Ok(true),
                Err(Errno::EINTR) => Ok(false),
                Err(errno) => Err(RoutedError::netlink(
                    "poll failed",
                    io::Error::from_raw_os_error(errno as i32),
                )),
            }
        }

        /// Blocks until one datagram arrives and returns its bytes.
        pub fn recv(&mut self) -> Result<&[u8]> {
            self.buffer.clear();
            self.socket
                .recv(&mut self.buffer, 0)
                .map_err(|e| RoutedError::netlink("failed to receive", e))?;
            Ok(&self.buffer)
        }

        /// Non-blocking receive; `Ok(None)` when nothing is queued.
        pub fn try_recv(&mut self) -> Result<Option<&[u8]>> {
            self.buffer.clear();
            match self.socket.recv(&mut self.buffer, libc::MSG_DONTWAIT) {
                Ok(_) => Ok(Some(&self.buffer)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(RoutedError::netlink("failed to receive", e)),
            }
        }

        /// Sends one message to the kernel and returns the number of bytes written.
        pub fn send(&self, message: &[u8]) -> io::Result<usize> {
            self.socket.send_to(message, &SocketAddr::new(0, 0), 0)
        }
    }

    /// Resolves an interface name to its kernel index.
    pub fn interface_index(name: &str) -> Result<u32> {
        if_nametoindex(name).map_err(|_| RoutedError::InterfaceNotFound(name.to_string()))
    }

    fn sockaddr_ip(addr: &SockaddrStorage) -> Option<IpAddress> {
        if let Some(sin) = addr.as_sockaddr_in() {
            return Some(IpAddress::from(sin.ip()));
        }
        addr.as_sockaddr_in6().map(|sin6| IpAddress::from(sin6.ip()))
    }

    /// Reads the current state and addresses of `name` via getifaddrs(3).
    ///
    /// Returns `Ok(None)` when no entry for the interface exists.
    #[instrument]
    pub fn interface_snapshot(name: &str) -> Result<Option<InterfaceSnapshot>> {
        let addrs = getifaddrs().map_err(|errno| {
            RoutedError::netlink(
                "getifaddrs failed",
                io::Error::from_raw_os_error(errno as i32),
            )
        })?;

        let mut found = false;
        let mut config = InterfaceConfig::default();
        let mut remotes = BTreeMap::new();
        for entry in addrs.filter(|entry| entry.interface_name == name) {
            found = true;
            let flags = entry.flags;
            config = config
                .set_state(
                    flags.contains(InterfaceFlags::IFF_UP)
                        && flags.contains(InterfaceFlags::IFF_RUNNING),
                )
                .set_type(flags.contains(InterfaceFlags::IFF_POINTOPOINT));

            let local = entry.address.as_ref().and_then(sockaddr_ip);
            if let Some(local) = local {
                config = config.add_local_ip(local);
            }
            let remote = if config.is_ptp() {
                entry.destination.as_ref()
            } else {
                entry.broadcast.as_ref()
            };
            if let Some(remote) = remote.and_then(sockaddr_ip) {
                config = config.add_remote_ip(remote);
                if let Some(local) = local {
                    remotes.insert(local, remote);
                }
            }
        }

        if found {
            debug!(%config, "Interface snapshot");
            Ok(Some(InterfaceSnapshot { config, remotes }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod mock {
    use super::InterfaceSnapshot;
    use crate::error::{Result, RoutedError};
    use std::io;

    fn unsupported() -> RoutedError {
        RoutedError::netlink(
            "netlink is only available on Linux",
            io::Error::from(io::ErrorKind::Unsupported),
        )
    }

    pub struct RouteSocket;

    impl RouteSocket {
        pub fn open(_groups: u32, _recv_buffer_size: usize) -> Result<Self> {
            Err(unsupported())
        }

        pub fn wait_readable(&self, _timeout_ms: u16) -> Result<bool> {
            Ok(false)
        }

        pub fn recv(&mut self) -> Result<&[u8]> {
            Err(unsupported())
        }

        pub fn try_recv(&mut self) -> Result<Option<&[u8]>> {
            Ok(None)
        }

        pub fn send(&self, _message: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    pub fn interface_index(name: &str) -> Result<u32> {
        Err(RoutedError::InterfaceNotFound(name.to_string()))
    }

    pub fn interface_snapshot(_name: &str) -> Result<Option<InterfaceSnapshot>> {
        Err(unsupported())
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
pub use mock::*;
