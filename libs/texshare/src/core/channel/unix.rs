// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Unix-domain socket transport, one line per message.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ChannelRole, HandshakeChannel, MAX_LINE_LEN, framed, strip_terminator, validate_name};
use crate::core::{Result, ShareError, Timeout};

const CONNECT_POLL: std::time::Duration = std::time::Duration::from_millis(10);

/// Socket file location for a channel name.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}

/// Removes the socket file when the server side goes away.
#[derive(Debug)]
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!("Channel: removed {}", self.0.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Channel: failed to remove {}: {}", self.0.display(), e),
        }
    }
}

/// Server end waiting for the single consumer connection.
#[derive(Debug)]
pub struct ChannelListener {
    listener: UnixListener,
    name: String,
    file: SocketFile,
}

impl ChannelListener {
    pub fn create(name: &str) -> Result<Self> {
        validate_name(name)?;
        let path = socket_path(name);
        // A stale socket from a crashed run would make bind fail.
        if path.exists() {
            tracing::warn!("Channel: replacing stale socket {}", path.display());
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path).map_err(|e| {
            ShareError::Protocol(format!("failed to create channel {}: {e}", path.display()))
        })?;
        tracing::info!("Channel: listening on {}", path.display());
        Ok(Self {
            listener,
            name: name.to_string(),
            file: SocketFile(path),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.file.0
    }

    /// Blocks for exactly one connection and stops listening.
    pub fn accept(self) -> Result<Channel> {
        let (stream, _) = self.listener.accept().map_err(|e| {
            ShareError::Protocol(format!("accept on channel '{}' failed: {e}", self.name))
        })?;
        tracing::info!("Channel: consumer connected on '{}'", self.name);
        Channel::from_stream(stream, ChannelRole::Producer, Some(self.file))
    }
}

/// Connected end of a handshake channel.
#[derive(Debug)]
pub struct Channel {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    role: ChannelRole,
    _file: Option<SocketFile>,
}

impl Channel {
    /// Connects to a producer's channel, retrying until it exists or
    /// `timeout` runs out.
    pub fn connect(name: &str, timeout: Timeout) -> Result<Self> {
        validate_name(name)?;
        let path = socket_path(name);
        let started = Instant::now();
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => {
                    tracing::info!("Channel: connected to {}", path.display());
                    return Self::from_stream(stream, ChannelRole::Consumer, None);
                }
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                    if let Some(limit) = timeout.as_duration() {
                        if started.elapsed() >= limit {
                            return Err(ShareError::ChannelClosed(format!(
                                "no producer on {} after {:?}",
                                path.display(),
                                limit
                            )));
                        }
                    }
                    std::thread::sleep(CONNECT_POLL);
                }
                Err(e) => {
                    return Err(ShareError::Protocol(format!(
                        "failed to connect to {}: {e}",
                        path.display()
                    )));
                }
            }
        }
    }

    fn from_stream(stream: UnixStream, role: ChannelRole, file: Option<SocketFile>) -> Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            role,
            _file: file,
        })
    }
}

impl HandshakeChannel for Channel {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let bytes = framed(line);
        self.writer.write_all(&bytes).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
                ShareError::ChannelClosed(format!("peer went away during write: {e}"))
            }
            _ => ShareError::Io(e),
        })?;
        self.writer.flush()?;
        tracing::debug!("Channel: {:?} sent {:?}", self.role, line.trim_end());
        Ok(())
    }

    fn recv_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .map_err(|e| match e.kind() {
                ErrorKind::ConnectionReset => {
                    ShareError::ChannelClosed(format!("peer went away during read: {e}"))
                }
                _ => ShareError::Io(e),
            })?;

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

    fn unique(name: &str) -> String {
        format!("texshare-test-{name}-{}", std::process::id())
    }

    #[test]
    fn exchanges_lines_and_cleans_up() {
        let name = unique("lines");
        let listener = ChannelListener::create(&name).unwrap();
        let path = listener.path().to_path_buf();
        assert!(path.exists());

        let client = std::thread::spawn({
            let name = name.clone();
            move || {
                let mut ch = Channel::connect(&name, Timeout::from_millis(2000)).unwrap();
                assert_eq!(ch.role(), ChannelRole::Consumer);
                let line = ch.recv_line().unwrap();
                assert_eq!(line, b"1 2 3 Ev");
                ch.send_line("OK").unwrap();
            }
        });

        let mut server = listener.accept().unwrap();
        assert_eq!(server.role(), ChannelRole::Producer);
        server.send_line("1 2 3 Ev").unwrap();
        assert_eq!(server.recv_line().unwrap(), b"OK");
        client.join().unwrap();

        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn eof_is_channel_closed() {
        let name = unique("eof");
        let listener = ChannelListener::create(&name).unwrap();
        let client = std::thread::spawn({
            let name = name.clone();
            move || {
                let ch = Channel::connect(&name, Timeout::from_millis(2000)).unwrap();
                drop(ch);
            }
        });
        let mut server = listener.accept().unwrap();
        client.join().unwrap();
        assert!(matches!(
            server.recv_line(),
            Err(ShareError::ChannelClosed(_))
        ));
    }

    #[test]
    fn oversized_line_is_a_protocol_fault() {
        let name = unique("long");
        let listener = ChannelListener::create(&name).unwrap();
        let client = std::thread::spawn({
            let name = name.clone();
            move || {
                let mut ch = Channel::connect(&name, Timeout::from_millis(2000)).unwrap();
                let long = "9".repeat(MAX_LINE_LEN + 10);
                ch.send_line(&long).unwrap();
            }
        });
        let mut server = listener.accept().unwrap();
        client.join().unwrap();
        assert!(matches!(server.recv_line(), Err(ShareError::Protocol(_))));
    }

    #[test]
    fn connect_times_out_without_producer() {
        let err = Channel::connect(&unique("absent"), Timeout::from_millis(30)).unwrap_err();
        assert!(matches!(err, ShareError::ChannelClosed(_)));
    }
}
