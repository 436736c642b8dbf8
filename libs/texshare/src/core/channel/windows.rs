// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Message-mode named pipe transport (`\\.\pipe\<name>`).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
use std::time::Instant;

use windows::Win32::Foundation::{ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, HANDLE};
use windows::Win32::Storage::FileSystem::PIPE_ACCESS_DUPLEX;
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_WAIT,
    SetNamedPipeHandleState,
};
use windows::core::HSTRING;

use super::{ChannelRole, HandshakeChannel, MAX_LINE_LEN, framed, strip_terminator, validate_name};
use crate::core::{Result, ShareError, Timeout};

const CONNECT_POLL: std::time::Duration = std::time::Duration::from_millis(10);
const PIPE_BUFFER: u32 = 4096;

pub fn pipe_path(name: &str) -> String {
    format!(r"\\.\pipe\{name}")
}

/// Normalizes pipe creation, whose binding returns either a raw handle or a
/// `Result`, into a `Result`.
trait IntoPipeHandle {
    fn into_pipe_handle(self) -> windows::core::Result<HANDLE>;
}

impl IntoPipeHandle for HANDLE {
    fn into_pipe_handle(self) -> windows::core::Result<HANDLE> {
        if self.is_invalid() {
            Err(windows::core::Error::from_win32())
        } else {
            Ok(self)
        }
    }
}

impl IntoPipeHandle for windows::core::Result<HANDLE> {
    fn into_pipe_handle(self) -> windows::core::Result<HANDLE> {
        self
    }
}

/// Server end waiting for the single consumer connection.
#[derive(Debug)]
pub struct ChannelListener {
    pipe: File,
    name: String,
}

impl ChannelListener {
    pub fn create(name: &str) -> Result<Self> {
        validate_name(name)?;
        let path = pipe_path(name);
        let handle = unsafe {
            CreateNamedPipeW(
                &HSTRING::from(path.as_str()),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                1,
                PIPE_BUFFER,
                PIPE_BUFFER,
                0,
                None,
            )
        }
        .into_pipe_handle()
        .map_err(|e| ShareError::Protocol(format!("failed to create pipe {path}: {e}")))?;

        // SAFETY: the handle was just created and is owned by nothing else.
        let pipe = unsafe { File::from_raw_handle(handle.0 as RawHandle) };
        tracing::info!("Channel: listening on {}", path);
        Ok(Self {
            pipe,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks for exactly one connection. The pipe allows a single instance,
    /// so a second client never gets in.
    pub fn accept(self) -> Result<Channel> {
        let handle = HANDLE(self.pipe.as_raw_handle());
        if let Err(e) = unsafe { ConnectNamedPipe(handle, None) } {
            // The client may connect between creation and this call.
            if e.code() != ERROR_PIPE_CONNECTED.to_hresult() {
                return Err(ShareError::Protocol(format!(
                    "accept on pipe '{}' failed: {e}",
                    self.name
                )));
            }
        }
        tracing::info!("Channel: consumer connected on '{}'", self.name);
        Channel::from_file(self.pipe, ChannelRole::Producer)
    }
}

/// Connected end of a handshake channel.
#[derive(Debug)]
pub struct Channel {
    reader: BufReader<File>,
    writer: File,
    role: ChannelRole,
}

impl Channel {
    pub fn connect(name: &str, timeout: Timeout) -> Result<Self> {
        validate_name(name)?;
        let path = pipe_path(name);
        let started = Instant::now();
        let file = loop {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => break file,
                Err(e)
                    if e.kind() == ErrorKind::NotFound
                        || e.raw_os_error() == Some(ERROR_PIPE_BUSY.0 as i32) =>
                {
                    if let Some(limit) = timeout.as_duration() {
                        if started.elapsed() >= limit {
                            return Err(ShareError::ChannelClosed(format!(
                                "no producer on {path} after {limit:?}"
                            )));
                        }
                    }
                    std::thread::sleep(CONNECT_POLL);
                }
                Err(e) => {
                    return Err(ShareError::Protocol(format!(
                        "failed to connect to {path}: {e}"
                    )));
                }
            }
        };

        let mode = PIPE_READMODE_MESSAGE;
        unsafe {
            SetNamedPipeHandleState(
                HANDLE(file.as_raw_handle()),
                Some(&mode as *const _),
                None,
                None,
            )
        }
        .map_err(|e| ShareError::Protocol(format!("failed to set message mode: {e}")))?;

        tracing::info!("Channel: connected to {}", path);
        Self::from_file(file, ChannelRole::Consumer)
    }

    fn from_file(file: File, role: ChannelRole) -> Result<Self> {
        let writer = file.try_clone()?;
        Ok(Self {
            reader: BufReader::new(file),
            writer,
            role,
        })
    }
}

fn closed_or_io(e: std::io::Error) -> ShareError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            ShareError::ChannelClosed(format!("peer went away: {e}"))
        }
        _ => ShareError::Io(e),
    }
}

impl HandshakeChannel for Channel {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(&framed(line)).map_err(closed_or_io)?;
        self.writer.flush().map_err(closed_or_io)?;
        tracing::debug!("Channel: {:?} sent {:?}", self.role, line.trim_end());
        Ok(())
    }

    fn recv_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .map_err(closed_or_io)?;

        if read == 0 {
            return Err(ShareError::ChannelClosed(
                "end of stream before any data".into(),
            ));
        }
        if line.last() != Some(&b'\n') {
            if line.len() > MAX_LINE_LEN {
                return Err(ShareError::Protocol(format!(
                    "handshake line exceeds {MAX_LINE_LEN} bytes"
                )));
            }
            return Err(ShareError::ChannelClosed(format!(
                "end of stream inside a line ({} bytes buffered)",
                line.len()
            )));
        }

        let line = strip_terminator(line);
        tracing::debug!(
            "Channel: {:?} received {:?}",
            self.role,
            String::from_utf8_lossy(&line)
        );
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_lines_over_a_pipe() {
        let name = format!("texshare-test-pipe-{}", std::process::id());
        let listener = ChannelListener::create(&name).unwrap();
        let client = std::thread::spawn({
            let name = name.clone();
            move || {
                let mut ch = Channel::connect(&name, Timeout::from_millis(2000)).unwrap();
                assert_eq!(ch.recv_line().unwrap(), b"5 6 7 Ev");
                ch.send_line("OK").unwrap();
            }
        });
        let mut server = listener.accept().unwrap();
        server.send_line("5 6 7 Ev").unwrap();
        assert_eq!(server.recv_line().unwrap(), b"OK");
        client.join().unwrap();
    }
}
