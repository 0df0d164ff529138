//! Synchronization pipe between the parent and the namespaced child.
//!
//! A connected socketpair carrying length-framed JSON records. The channel
//! survives `unshare`, `setns`, and `chroot` because it is nothing but an
//! inherited file descriptor; the parent half-closes its write side after
//! the bootstrap payload so the child observes EOF as the go signal.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vessel_common::error::{Result, VesselError};
use vessel_common::state::InitError;

/// Upper bound on a single frame body; larger frames are refused rather
/// than allocated.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One end of the parent↔child synchronization channel.
///
/// Both ends are created CLOEXEC; the spawn path re-inherits the child end
/// at a fixed descriptor number. Closing is idempotent.
#[derive(Debug)]
pub struct SyncPipe {
    stream: Option<UnixStream>,
}

impl SyncPipe {
    /// Allocates a connected pipe, returning `(parent_end, child_end)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socketpair cannot be created.
    pub fn new() -> Result<(Self, Self)> {
        let (parent, child) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|errno| VesselError::Pipe {
            source: std::io::Error::from_raw_os_error(errno as i32),
        })?;
        Ok((Self::from_owned(parent), Self::from_owned(child)))
    }

    fn from_owned(fd: OwnedFd) -> Self {
        Self {
            stream: Some(UnixStream::from(fd)),
        }
    }

    /// Adopts an inherited descriptor as a pipe end (the child side).
    ///
    /// # Safety
    ///
    /// `fd` must be an open socketpair end that no other owner will close.
    #[must_use]
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            stream: Some(UnixStream::from_raw_fd(fd)),
        }
    }

    /// Returns the raw descriptor of this end, if still open.
    #[must_use]
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Serializes `payload` and writes it as one length-framed record.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::PipeClosed`] when the peer end is gone, or
    /// [`VesselError::Pipe`] on any other I/O failure.
    pub fn send<T: Serialize>(&mut self, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(VesselError::Pipe {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds limit", body.len()),
                ),
            });
        }
        let stream = self.stream_mut()?;
        // Checked against MAX_FRAME_LEN above, so the cast is exact.
        let len = body.len() as u32;
        stream
            .write_all(&len.to_be_bytes())
            .map_err(map_send_err)?;
        stream.write_all(&body).map_err(map_send_err)
    }

    /// Reads one framed record; `Ok(None)` is a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated frames, oversized frames, I/O
    /// failure, or undecodable JSON.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let stream = self.stream_mut()?;
        let mut len_bytes = [0u8; 4];
        match stream.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(VesselError::Pipe { source: err }),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(VesselError::Pipe {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds limit"),
                ),
            });
        }
        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .map_err(|err| VesselError::Pipe { source: err })?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Shuts down the write direction, signalling end-of-stream to the peer
    /// while keeping the read direction open.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown syscall fails.
    pub fn half_close_write(&mut self) -> Result<()> {
        let stream = self.stream_mut()?;
        stream
            .shutdown(std::net::Shutdown::Write)
            .map_err(|err| VesselError::Pipe { source: err })
    }

    /// Closes this end. Safe to call more than once.
    pub fn close(&mut self) {
        self.stream = None;
    }

    /// Child-side convenience: report a structured init failure to the
    /// parent. Errors are swallowed — when the parent is already gone there
    /// is nobody left to tell.
    pub fn report_error(&mut self, err: &InitError) {
        if let Err(send_err) = self.send(err) {
            tracing::warn!(error = %send_err, "could not deliver init error to parent");
        }
    }

    fn stream_mut(&mut self) -> Result<&mut UnixStream> {
        self.stream.as_mut().ok_or(VesselError::PipeClosed)
    }
}

fn map_send_err(err: std::io::Error) -> VesselError {
    if err.kind() == std::io::ErrorKind::BrokenPipe
        || err.kind() == std::io::ErrorKind::ConnectionReset
    {
        VesselError::PipeClosed
    } else {
        VesselError::Pipe { source: err }
    }
}
