//! Drives the fd adapters against real pipes, sockets, and files.

#![cfg(unix)]

use std::io::{self, Read, Seek as _, SeekFrom, Write};
use std::net::UdpSocket;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};

use iobuf::unix::{
    pread_assume_fd_is_nonblocking, pwrite_assume_fd_is_nonblocking,
    read_assume_fd_is_nonblocking, recvfrom_assume_fd_is_nonblocking,
    recvmmsg_assume_fd_is_nonblocking, send_nonblocking_no_sigpipe,
    write_assume_fd_is_nonblocking,
};
use iobuf::Iobuf;

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` points at two writable c_ints.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe failed: {}", io::Error::last_os_error());
    // SAFETY: both fds are freshly created and exclusively ours.
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

fn set_nonblocking(fd: BorrowedFd<'_>) {
    // SAFETY: fcntl queries on a valid, open fd.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    assert!(flags >= 0);
    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    assert_eq!(rc, 0);
}

/// Retries `f` on `WouldBlock` until a generous deadline, for the
/// in-flight moment between a localhost send and its arrival.
fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match f() {
            Ok(v) => return v,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("io error: {e}"),
        }
    }
}

#[test]
fn pipe_write_then_read() {
    let (r, w) = pipe();
    set_nonblocking(r.as_fd());
    set_nonblocking(w.as_fd());

    let mut src = Iobuf::of_string("hello pipe");
    let sent = write_assume_fd_is_nonblocking(&mut src, w.as_fd()).unwrap();
    assert_eq!(sent, 10);
    assert!(src.is_empty());

    let mut dst = Iobuf::create(32);
    let got = read_assume_fd_is_nonblocking(&mut dst, r.as_fd()).unwrap();
    assert_eq!(got, 10);
    dst.flip_lo();
    assert_eq!(dst.consume_bytes(10).unwrap(), b"hello pipe");
}

#[test]
fn empty_pipe_reports_would_block() {
    let (r, _w) = pipe();
    set_nonblocking(r.as_fd());

    let mut dst = Iobuf::create(16);
    let err = read_assume_fd_is_nonblocking(&mut dst, r.as_fd()).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    // The window did not move.
    assert_eq!(dst.length(), 16);
}

#[test]
fn partial_write_loop_drains_the_window() {
    let (r, w) = pipe();
    set_nonblocking(r.as_fd());
    set_nonblocking(w.as_fd());
    let mut reader = std::fs::File::from(r);

    let payload = vec![0xAB; 256 * 1024];
    let mut src = Iobuf::of_bytes(&payload);
    let mut drained = Vec::new();
    let mut scratch = [0u8; 64 * 1024];
    // The pipe is smaller than the payload, so the writer fills it, hits
    // WouldBlock, and resumes from wherever `lo` stopped once the reader
    // makes room.
    while !src.is_empty() {
        match write_assume_fd_is_nonblocking(&mut src, w.as_fd()) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => match reader.read(&mut scratch) {
                Ok(n) => drained.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("read failed: {e}"),
            },
            Err(e) => panic!("write failed: {e}"),
        }
    }
    while drained.len() < payload.len() {
        match reader.read(&mut scratch) {
            Ok(n) => drained.extend_from_slice(&scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    assert_eq!(drained, payload);
}

#[test]
fn pread_pwrite_round_trip() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"abcdefghij").unwrap();

    let mut dst = Iobuf::create(4);
    let got = pread_assume_fd_is_nonblocking(&mut dst, file.as_fd(), 2).unwrap();
    assert_eq!(got, 4);
    dst.flip_lo();
    assert_eq!(dst.consume_bytes(4).unwrap(), b"cdef");

    let mut patch = Iobuf::of_string("XY");
    let put = pwrite_assume_fd_is_nonblocking(&mut patch, file.as_fd(), 8).unwrap();
    assert_eq!(put, 2);
    assert!(patch.is_empty());

    let mut back = Vec::new();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.read_to_end(&mut back).unwrap();
    assert_eq!(back, b"abcdefghXY");
}

#[test]
fn udp_recvfrom_reports_peer() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();

    sender
        .send_to(b"datagram", receiver.local_addr().unwrap())
        .unwrap();

    let mut buf = Iobuf::create(64);
    let (n, peer) = retry(|| recvfrom_assume_fd_is_nonblocking(&mut buf, receiver.as_fd()));
    assert_eq!(n, 8);
    assert_eq!(peer, sender.local_addr().unwrap());
    buf.flip_lo();
    assert_eq!(buf.consume_bytes(8).unwrap(), b"datagram");
}

#[test]
fn recvmmsg_scatters_across_iobufs() {
    let Some(token) = recvmmsg_assume_fd_is_nonblocking() else {
        return;
    };

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();

    let expected = [&b"one"[..], &b"two"[..], &b"three"[..]];
    for msg in expected {
        sender.send_to(msg, receiver.local_addr().unwrap()).unwrap();
    }

    let mut received: Vec<Vec<u8>> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < expected.len() {
        assert!(Instant::now() < deadline, "datagrams never arrived");
        let mut bufs: Vec<Iobuf> = (0..4).map(|_| Iobuf::create(64)).collect();
        let mut srcs: Vec<Option<std::net::SocketAddr>> = vec![None; 4];
        match token.recvmmsg(receiver.as_fd(), &mut bufs, Some(&mut srcs)) {
            Ok(n) => {
                for (i, buf) in bufs.iter_mut().take(n).enumerate() {
                    buf.flip_lo();
                    let len = buf.length();
                    received.push(buf.consume_bytes(len).unwrap());
                    assert_eq!(srcs[i], Some(sender.local_addr().unwrap()));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("recvmmsg failed: {e}"),
        }
    }
    received.sort();
    let mut wanted: Vec<Vec<u8>> = expected.iter().map(|m| m.to_vec()).collect();
    wanted.sort();
    assert_eq!(received, wanted);
}

#[test]
fn no_sigpipe_send_and_sendto() {
    let Some(token) = send_nonblocking_no_sigpipe() else {
        return;
    };

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();

    // Connected send.
    let connected = UdpSocket::bind("127.0.0.1:0").unwrap();
    connected.connect(receiver.local_addr().unwrap()).unwrap();
    let mut src = Iobuf::of_string("via send");
    let n = token.send(&mut src, connected.as_fd()).unwrap();
    assert_eq!(n, 8);
    assert!(src.is_empty());

    let mut buf = Iobuf::create(64);
    let (n, _) = retry(|| recvfrom_assume_fd_is_nonblocking(&mut buf, receiver.as_fd()));
    buf.flip_lo();
    assert_eq!(buf.consume_bytes(n).unwrap(), b"via send");

    // Unconnected sendto.
    let loose = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut src = Iobuf::of_string("via sendto");
    let n = token
        .sendto(&mut src, loose.as_fd(), &receiver.local_addr().unwrap())
        .unwrap();
    assert_eq!(n, 10);

    let mut buf = Iobuf::create(64);
    let (n, peer) = retry(|| recvfrom_assume_fd_is_nonblocking(&mut buf, receiver.as_fd()));
    assert_eq!(peer, loose.local_addr().unwrap());
    buf.flip_lo();
    assert_eq!(buf.consume_bytes(n).unwrap(), b"via sendto");
}
