// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Seqpacket Unix-domain socket plumbing.
//!
//! The co-simulation link needs preserved message boundaries, so it uses
//! `SOCK_SEQPACKET`, which std does not expose; the handful of calls needed
//! are made through `libc` behind an RAII wrapper. A leading `@` in the
//! socket path selects the abstract namespace.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// A connected seqpacket endpoint. For the server role this also holds the
/// listening socket; for the client (and test pairs) both fds coincide.
#[derive(Debug)]
pub struct SeqPacketConn {
    socket_fd: libc::c_int,
    peer_fd: libc::c_int,
    role: Role,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_len(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn sockaddr_un(path: &str) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_bytes();
    if bytes.is_empty() || bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path length out of range",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    if addr.sun_path[0] == b'@' as libc::c_char {
        addr.sun_path[0] = 0; // abstract namespace
    }

    let base = std::mem::size_of::<libc::sa_family_t>();
    Ok((addr, (base + bytes.len()) as libc::socklen_t))
}

impl SeqPacketConn {
    /// Open the well-known address: bind-and-listen first; if another
    /// process already owns it, fall back to connecting as its client.
    /// Exactly one of the two cooperating processes ends up server.
    pub fn open(path: &str) -> io::Result<Self> {
        let fd = cvt(unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) })?;
        let (addr, addr_len) = match sockaddr_un(path) {
            Ok(v) => v,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let bound = cvt(unsafe {
            libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len)
        });
        match bound {
            Ok(_) => {
                tracing::info!("bound {}, listening", path);
                if let Err(e) = cvt(unsafe { libc::listen(fd, 1) }) {
                    unsafe { libc::close(fd) };
                    return Err(e);
                }
                let peer = match cvt(unsafe {
                    libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut())
                }) {
                    Ok(peer) => peer,
                    Err(e) => {
                        unsafe { libc::close(fd) };
                        return Err(e);
                    }
                };
                tracing::info!("peer connected");
                Ok(Self {
                    socket_fd: fd,
                    peer_fd: peer,
                    role: Role::Server,
                })
            }
            Err(e) if e.raw_os_error() == Some(libc::EADDRINUSE) => {
                tracing::info!("{} in use, connecting as client", path);
                if let Err(e) = cvt(unsafe {
                    libc::connect(fd, &addr as *const _ as *const libc::sockaddr, addr_len)
                }) {
                    unsafe { libc::close(fd) };
                    return Err(e);
                }
                Ok(Self {
                    socket_fd: fd,
                    peer_fd: fd,
                    role: Role::Client,
                })
            }
            Err(e) => {
                unsafe { libc::close(fd) };
                Err(e)
            }
        }
    }

    /// Connected socket pair for tests.
    pub fn pair() -> io::Result<(Self, Self)> {
        let mut fds = [0 as libc::c_int; 2];
        cvt(unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0, fds.as_mut_ptr())
        })?;
        let make = |fd| Self {
            socket_fd: fd,
            peer_fd: fd,
            role: Role::Client,
        };
        Ok((make(fds[0]), make(fds[1])))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Blocking receive of one packet. `Ok(Some(n))` is a complete record of
    /// `n` bytes (zero-length keep-alives included: a real record carries
    /// `MSG_EOR`); `Ok(None)` means the peer closed the connection.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.recv_flags(buf, 0)
    }

    /// Non-blocking variant; `WouldBlock` when nothing is queued.
    pub fn recv_nonblocking(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.recv_flags(buf, libc::MSG_DONTWAIT)
    }

    fn recv_flags(&self, buf: &mut [u8], flags: libc::c_int) -> io::Result<Option<usize>> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        let n = cvt_len(unsafe { libc::recvmsg(self.peer_fd, &mut msg, flags) })?;
        if n == 0 && msg.msg_flags & libc::MSG_EOR == 0 {
            return Ok(None);
        }
        Ok(Some(n))
    }

    /// Send one packet, record-terminated.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        cvt_len(unsafe {
            libc::send(
                self.peer_fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_EOR,
            )
        })
    }

    /// Unblock any in-flight receive/send from another thread.
    pub fn shutdown(&self) {
        unsafe {
            libc::shutdown(self.peer_fd, libc::SHUT_RDWR);
            if self.socket_fd != self.peer_fd {
                libc::shutdown(self.socket_fd, libc::SHUT_RDWR);
            }
        }
    }
}

impl Drop for SeqPacketConn {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.peer_fd);
            if self.socket_fd != self.peer_fd {
                libc::close(self.socket_fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_preserves_message_boundaries() {
        let (a, b) = SeqPacketConn::pair().expect("socketpair");
        a.send(b"one").unwrap();
        a.send(b"two!").unwrap();

        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf).unwrap().expect("record");
        assert_eq!(&buf[..n], b"one");
        let n = b.recv(&mut buf).unwrap().expect("record");
        assert_eq!(&buf[..n], b"two!");
    }

    #[test]
    fn test_peer_close_reads_as_none() {
        let (a, b) = SeqPacketConn::pair().expect("socketpair");
        drop(a);
        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_shutdown_unblocks_receiver() {
        let (a, b) = SeqPacketConn::pair().expect("socketpair");
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            b.recv(&mut buf)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        a.shutdown();
        let res = handle.join().unwrap();
        // Either a closed-peer read or an error, but never a hang.
        match res {
            Ok(outcome) => assert_eq!(outcome, None),
            Err(_) => {}
        }
    }

    #[test]
    fn test_bad_path_rejected() {
        let long = format!("@{}", "x".repeat(200));
        assert!(SeqPacketConn::open(&long).is_err());
    }
}
