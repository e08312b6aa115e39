//! Pseudo-terminal allocation for interactive children.
//!
//! Programs under test see a terminal, so stdio stays line-buffered and
//! prompts without a trailing newline are flushed before a read.

use crate::config::types::{HarnessError, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, SpecialCharacterIndices};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

/// Upper bound for pushing input into a full terminal buffer
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one non-blocking read from the master side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Nothing available right now
    Empty,
    /// Every slave descriptor is closed
    Closed,
}

/// Master side of a pseudo-terminal pair
pub struct PseudoTerminal {
    master: PtyMaster,
    eof_char: u8,
}

impl std::fmt::Debug for PseudoTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PseudoTerminal")
            .field("fd", &self.master.as_raw_fd())
            .finish()
    }
}

impl PseudoTerminal {
    /// Allocate a pty pair with echo disabled.
    /// Returns the master and an open handle on the slave for the child's stdio.
    pub fn open() -> Result<(Self, File)> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| HarnessError::Process(format!("posix_openpt: {}", e)))?;
        grantpt(&master).map_err(|e| HarnessError::Process(format!("grantpt: {}", e)))?;
        unlockpt(&master).map_err(|e| HarnessError::Process(format!("unlockpt: {}", e)))?;
        let slave_name =
            ptsname_r(&master).map_err(|e| HarnessError::Process(format!("ptsname: {}", e)))?;

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_name)
            .map_err(|e| {
                HarnessError::Process(format!("Failed to open pty slave {}: {}", slave_name, e))
            })?;

        let mut termios = tcgetattr(slave.as_raw_fd())
            .map_err(|e| HarnessError::Process(format!("tcgetattr: {}", e)))?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(slave.as_raw_fd(), SetArg::TCSANOW, &termios)
            .map_err(|e| HarnessError::Process(format!("tcsetattr: {}", e)))?;
        let eof_char = termios.control_chars[SpecialCharacterIndices::VEOF as usize];

        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| HarnessError::Process(format!("fcntl(F_SETFD): {}", e)))?;
        let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| HarnessError::Process(format!("fcntl(F_GETFL): {}", e)))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(flags))
            .map_err(|e| HarnessError::Process(format!("fcntl(F_SETFL): {}", e)))?;

        log::debug!("Allocated pty {}", slave_name);
        Ok((Self { master, eof_char }, slave))
    }

    /// Read whatever is available without blocking
    pub fn read_available(&mut self, buf: &mut [u8]) -> io::Result<ReadState> {
        match self.master.read(buf) {
            Ok(0) => Ok(ReadState::Closed),
            Ok(n) => Ok(ReadState::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadState::Empty),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadState::Empty),
            // Linux reports a hung-up slave as EIO on the master.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(ReadState::Closed),
            Err(e) => Err(e),
        }
    }

    /// Write all of `bytes`, retrying while the terminal buffer is full
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let deadline = Instant::now() + WRITE_TIMEOUT;
        let mut written = 0;
        while written < bytes.len() {
            match self.master.write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    if Instant::now() > deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "terminal input buffer stayed full",
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Send the terminal's end-of-file character
    pub fn send_eof(&mut self) -> io::Result<()> {
        let eof = [self.eof_char];
        self.send(&eof)
    }
}
