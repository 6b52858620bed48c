//! Nonblocking fd adapters.
//!
//! Thin shims that hand an iobuf's window straight to a syscall and
//! advance `lo` by the bytes transferred. Every function assumes the fd
//! is already nonblocking and surfaces the raw OS result untransformed:
//! `EAGAIN` arrives as [`io::ErrorKind::WouldBlock`] and `EINTR` as
//! [`io::ErrorKind::Interrupted`], leaving retry policy to the caller.
//!
//! Platform-conditional capabilities (`recvmmsg(2)`, `MSG_NOSIGNAL`
//! sends) follow a factory pattern: availability is decided once and a
//! token carrying the actual operations is returned, so the interface is
//! uniform across platforms.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, BorrowedFd};

use crate::access::{Readable, Seek, Writable};
use crate::iobuf::Iobuf;

/// Maps the `-1` error return to `last_os_error`, tracing the failure.
macro_rules! syscall {
    ($name:literal, $call:expr) => {{
        let ret = $call;
        if ret == -1 {
            let err = io::Error::last_os_error();
            tracing::trace!(target: "iobuf::unix", syscall = $name, error = %err, "syscall failed");
            Err(err)
        } else {
            Ok(ret)
        }
    }};
}

/// Reads into the window `[lo, hi)` and advances `lo` by the bytes read.
pub fn read_assume_fd_is_nonblocking<A: Writable>(
    t: &mut Iobuf<A, Seek>,
    fd: BorrowedFd<'_>,
) -> io::Result<usize> {
    // SAFETY: the window pointer is valid for `length` writable bytes and
    // the storage cannot move during the call.
    let n = syscall!("read", unsafe {
        libc::read(fd.as_raw_fd(), t.window_ptr().cast(), t.length())
    })? as usize;
    // SAFETY: read(2) returns at most the count it was given.
    unsafe { t.unsafe_advance(n) };
    tracing::trace!(target: "iobuf::unix", bytes = n, "read");
    Ok(n)
}

/// Positional read into the window; advances `lo` by the bytes read.
pub fn pread_assume_fd_is_nonblocking<A: Writable>(
    t: &mut Iobuf<A, Seek>,
    fd: BorrowedFd<'_>,
    offset: u64,
) -> io::Result<usize> {
    // The offset is cast; an out-of-range value comes back as EINVAL.
    // SAFETY: as in `read_assume_fd_is_nonblocking`.
    let n = syscall!("pread", unsafe {
        libc::pread(
            fd.as_raw_fd(),
            t.window_ptr().cast(),
            t.length(),
            offset as libc::off_t,
        )
    })? as usize;
    // SAFETY: pread(2) returns at most the count it was given.
    unsafe { t.unsafe_advance(n) };
    tracing::trace!(target: "iobuf::unix", bytes = n, offset, "pread");
    Ok(n)
}

/// Writes the window `[lo, hi)` and advances `lo` by the bytes written.
pub fn write_assume_fd_is_nonblocking<A: Readable>(
    t: &mut Iobuf<A, Seek>,
    fd: BorrowedFd<'_>,
) -> io::Result<usize> {
    // SAFETY: the window pointer is valid for `length` readable bytes.
    let n = syscall!("write", unsafe {
        libc::write(fd.as_raw_fd(), t.window_ptr().cast(), t.length())
    })? as usize;
    // SAFETY: write(2) returns at most the count it was given.
    unsafe { t.unsafe_advance(n) };
    tracing::trace!(target: "iobuf::unix", bytes = n, "write");
    Ok(n)
}

/// Positional write of the window; advances `lo` by the bytes written.
pub fn pwrite_assume_fd_is_nonblocking<A: Readable>(
    t: &mut Iobuf<A, Seek>,
    fd: BorrowedFd<'_>,
    offset: u64,
) -> io::Result<usize> {
    // SAFETY: as in `write_assume_fd_is_nonblocking`.
    let n = syscall!("pwrite", unsafe {
        libc::pwrite(
            fd.as_raw_fd(),
            t.window_ptr().cast(),
            t.length(),
            offset as libc::off_t,
        )
    })? as usize;
    // SAFETY: pwrite(2) returns at most the count it was given.
    unsafe { t.unsafe_advance(n) };
    tracing::trace!(target: "iobuf::unix", bytes = n, offset, "pwrite");
    Ok(n)
}

/// Receives a datagram into the window, advancing `lo` by the bytes
/// received, and returns the byte count together with the peer address.
pub fn recvfrom_assume_fd_is_nonblocking<A: Writable>(
    t: &mut Iobuf<A, Seek>,
    fd: BorrowedFd<'_>,
) -> io::Result<(usize, SocketAddr)> {
    // SAFETY: zeroed sockaddr_storage is a valid value of the type.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut addrlen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: the window pointer is valid for `length` writable bytes;
    // `storage`/`addrlen` are live locals the kernel fills in.
    let n = syscall!("recvfrom", unsafe {
        libc::recvfrom(
            fd.as_raw_fd(),
            t.window_ptr().cast(),
            t.length(),
            0,
            (&raw mut storage).cast(),
            &raw mut addrlen,
        )
    })? as usize;
    // SAFETY: recvfrom(2) returns at most the count it was given.
    unsafe { t.unsafe_advance(n) };
    let peer = sockaddr_to_socket_addr(&storage)?;
    tracing::trace!(target: "iobuf::unix", bytes = n, %peer, "recvfrom");
    Ok((n, peer))
}

/// Capability token for `recvmmsg(2)`, returned by
/// [`recvmmsg_assume_fd_is_nonblocking`] only where the platform provides
/// the syscall.
pub struct RecvMmsg {
    _priv: (),
}

/// Capability token for sends that suppress `SIGPIPE`, returned by
/// [`send_nonblocking_no_sigpipe`] only where `MSG_NOSIGNAL` exists.
pub struct SendNoSigpipe {
    _priv: (),
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Detects `recvmmsg(2)` support. `Some` on Linux and Android,
        /// `None` elsewhere.
        pub fn recvmmsg_assume_fd_is_nonblocking() -> Option<RecvMmsg> {
            Some(RecvMmsg { _priv: () })
        }

        /// Detects `MSG_NOSIGNAL` support. `Some` on Linux and Android,
        /// `None` elsewhere.
        pub fn send_nonblocking_no_sigpipe() -> Option<SendNoSigpipe> {
            Some(SendNoSigpipe { _priv: () })
        }

        impl RecvMmsg {
            /// Scatter-receives up to `bufs.len()` datagrams, one per
            /// iobuf, advancing each filled iobuf's `lo` by the bytes it
            /// received. Returns the number of datagrams received. When
            /// `srcs` is given, the peer address of datagram `i` is
            /// stored in `srcs[i]`.
            pub fn recvmmsg<A: Writable>(
                &self,
                fd: BorrowedFd<'_>,
                bufs: &mut [Iobuf<A, Seek>],
                mut srcs: Option<&mut [Option<SocketAddr>]>,
            ) -> io::Result<usize> {
                let count = bufs.len();
                let mut iovecs: Vec<libc::iovec> = bufs
                    .iter_mut()
                    .map(|b| libc::iovec {
                        iov_base: b.window_ptr().cast(),
                        iov_len: b.length(),
                    })
                    .collect();
                // SAFETY: zeroed sockaddr_storage is a valid value.
                let mut addrs: Vec<libc::sockaddr_storage> = vec![unsafe { mem::zeroed() }; count];
                let mut hdrs: Vec<libc::mmsghdr> = Vec::with_capacity(count);
                for i in 0..count {
                    // SAFETY: zeroed mmsghdr is a valid value.
                    let mut hdr: libc::mmsghdr = unsafe { mem::zeroed() };
                    // `iovecs` and `addrs` were sized upfront and are not
                    // reallocated, so these pointers stay valid across
                    // the syscall below.
                    // SAFETY: index `i` is within `iovecs`.
                    hdr.msg_hdr.msg_iov = unsafe { iovecs.as_mut_ptr().add(i) };
                    hdr.msg_hdr.msg_iovlen = 1;
                    hdr.msg_hdr.msg_name = (&raw mut addrs[i]).cast();
                    hdr.msg_hdr.msg_namelen =
                        mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                    hdrs.push(hdr);
                }
                // SAFETY: `hdrs` holds `count` initialized headers whose
                // iovecs point at live, writable windows.
                let n = syscall!("recvmmsg", unsafe {
                    libc::recvmmsg(
                        fd.as_raw_fd(),
                        hdrs.as_mut_ptr(),
                        count as libc::c_uint,
                        0,
                        core::ptr::null_mut(),
                    )
                })? as usize;
                for i in 0..n {
                    let got = hdrs[i].msg_len as usize;
                    // SAFETY: the kernel wrote at most iov_len bytes into
                    // buf i's window.
                    unsafe { bufs[i].unsafe_advance(got) };
                    if let Some(slots) = srcs.as_mut() {
                        if let Some(slot) = slots.get_mut(i) {
                            *slot = sockaddr_to_socket_addr(&addrs[i]).ok();
                        }
                    }
                }
                tracing::trace!(target: "iobuf::unix", datagrams = n, "recvmmsg");
                Ok(n)
            }
        }

        impl SendNoSigpipe {
            /// Sends the window on a connected socket without raising
            /// `SIGPIPE`, advancing `lo` by the bytes sent.
            pub fn send<A: Readable>(
                &self,
                t: &mut Iobuf<A, Seek>,
                fd: BorrowedFd<'_>,
            ) -> io::Result<usize> {
                // SAFETY: the window pointer is valid for `length`
                // readable bytes.
                let n = syscall!("send", unsafe {
                    libc::send(
                        fd.as_raw_fd(),
                        t.window_ptr().cast(),
                        t.length(),
                        libc::MSG_NOSIGNAL,
                    )
                })? as usize;
                // SAFETY: send(2) returns at most the count it was given.
                unsafe { t.unsafe_advance(n) };
                tracing::trace!(target: "iobuf::unix", bytes = n, "send");
                Ok(n)
            }

            /// Sends the window as a datagram to `addr` without raising
            /// `SIGPIPE`, advancing `lo` by the bytes sent.
            pub fn sendto<A: Readable>(
                &self,
                t: &mut Iobuf<A, Seek>,
                fd: BorrowedFd<'_>,
                addr: &SocketAddr,
            ) -> io::Result<usize> {
                let (storage, addrlen) = socket_addr_to_sockaddr(addr);
                // SAFETY: the window pointer is valid for `length`
                // readable bytes; `storage` is a live local of `addrlen`
                // initialized bytes.
                let n = syscall!("sendto", unsafe {
                    libc::sendto(
                        fd.as_raw_fd(),
                        t.window_ptr().cast(),
                        t.length(),
                        libc::MSG_NOSIGNAL,
                        (&raw const storage).cast(),
                        addrlen,
                    )
                })? as usize;
                // SAFETY: sendto(2) returns at most the count it was
                // given.
                unsafe { t.unsafe_advance(n) };
                tracing::trace!(target: "iobuf::unix", bytes = n, %addr, "sendto");
                Ok(n)
            }
        }

        fn socket_addr_to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
            // SAFETY: zeroed sockaddr_storage is a valid value of the type.
            let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
            match addr {
                SocketAddr::V4(v4) => {
                    let sin = libc::sockaddr_in {
                        sin_family: libc::AF_INET as libc::sa_family_t,
                        sin_port: v4.port().to_be(),
                        sin_addr: libc::in_addr {
                            s_addr: u32::from(*v4.ip()).to_be(),
                        },
                        sin_zero: [0; 8],
                    };
                    // SAFETY: sockaddr_storage is sized and aligned to
                    // hold any sockaddr type.
                    unsafe { (&raw mut storage).cast::<libc::sockaddr_in>().write(sin) };
                    (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
                }
                SocketAddr::V6(v6) => {
                    let sin6 = libc::sockaddr_in6 {
                        sin6_family: libc::AF_INET6 as libc::sa_family_t,
                        sin6_port: v6.port().to_be(),
                        sin6_flowinfo: v6.flowinfo(),
                        sin6_addr: libc::in6_addr {
                            s6_addr: v6.ip().octets(),
                        },
                        sin6_scope_id: v6.scope_id(),
                    };
                    // SAFETY: as above.
                    unsafe { (&raw mut storage).cast::<libc::sockaddr_in6>().write(sin6) };
                    (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
                }
            }
        }
    } else {
        /// Detects `recvmmsg(2)` support. `Some` on Linux and Android,
        /// `None` elsewhere.
        pub fn recvmmsg_assume_fd_is_nonblocking() -> Option<RecvMmsg> {
            None
        }

        /// Detects `MSG_NOSIGNAL` support. `Some` on Linux and Android,
        /// `None` elsewhere.
        pub fn send_nonblocking_no_sigpipe() -> Option<SendNoSigpipe> {
            None
        }

        impl RecvMmsg {
            /// Unreachable: the token cannot be constructed on this
            /// platform.
            pub fn recvmmsg<A: Writable>(
                &self,
                fd: BorrowedFd<'_>,
                bufs: &mut [Iobuf<A, Seek>],
                srcs: Option<&mut [Option<SocketAddr>]>,
            ) -> io::Result<usize> {
                let _ = (fd, bufs, srcs);
                Err(io::Error::from(io::ErrorKind::Unsupported))
            }
        }

        impl SendNoSigpipe {
            /// Unreachable: the token cannot be constructed on this
            /// platform.
            pub fn send<A: Readable>(
                &self,
                t: &mut Iobuf<A, Seek>,
                fd: BorrowedFd<'_>,
            ) -> io::Result<usize> {
                let _ = (t, fd);
                Err(io::Error::from(io::ErrorKind::Unsupported))
            }

            /// Unreachable: the token cannot be constructed on this
            /// platform.
            pub fn sendto<A: Readable>(
                &self,
                t: &mut Iobuf<A, Seek>,
                fd: BorrowedFd<'_>,
                addr: &SocketAddr,
            ) -> io::Result<usize> {
                let _ = (t, fd, addr);
                Err(io::Error::from(io::ErrorKind::Unsupported))
            }
        }
    }
}

fn sockaddr_to_socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            // SAFETY: for AF_INET the kernel filled a sockaddr_in, which
            // sockaddr_storage is sized and aligned to hold.
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: for AF_INET6 the kernel filled a sockaddr_in6.
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {other}"),
        )),
    }
}
