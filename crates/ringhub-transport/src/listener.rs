//! Listening socket: TCP on "host:port" or a UNIX-domain stream path.

use ringhub_core::{AddressFamily, HubError};
use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

#[derive(Debug)]
pub struct Listener {
    socket: Socket,
    local: bool,
}

impl Listener {
    pub fn bind(name: &str, family: AddressFamily, backlog: i32) -> Result<Self, HubError> {
        let (socket, local) = match family {
            AddressFamily::Inet => {
                let addr: SocketAddr = name
                    .parse()
                    .map_err(|_| HubError::Config(format!("unparsable bind address {}", name)))?;
                let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
                socket.set_reuse_address(true)?;
                socket.bind(&addr.into())?;
                (socket, false)
            }
            AddressFamily::Unix => {
                // A stale socket file blocks rebinding.
                let _ = std::fs::remove_file(name);
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
                socket.bind(&SockAddr::unix(name)?)?;
                (socket, true)
            }
        };
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        tracing::info!(address = name, "listening");
        Ok(Self { socket, local })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Accepts one pending connection, already switched to non-blocking.
    /// Returns `None` once the backlog is drained.
    pub fn accept(&self) -> io::Result<Option<OwnedFd>> {
        match self.socket.accept() {
            Ok((socket, _peer)) => {
                socket.set_nonblocking(true)?;
                Ok(Some(socket.into()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
