// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log capture collector: interposes on the process's stdout
//! and stderr file descriptors so that anything the monitored program
//! writes there is also shipped to the server as `log` packets, while still
//! reaching the original destination (terminal, redirected file, …).
//!
//! An `AsyncFd`-over-a-raw-fd pattern: a `nix::unistd::pipe` is spliced in
//! with `dup2`, and a background task reads the pipe non-blocking and tees
//! each chunk back out to a duplicate of the original fd. Every call here
//! has a safe signature, so this module never needs `#[allow(unsafe_code)]`.
//!
//! Once enabled, disabling is a no-op ("capture cannot be
//! un-spliced safely once the fd has been redirected"): the fds stay
//! redirected for the life of the process.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::collectors::periodic::CollectorStatus;
use crate::collectors::Collector;
use crate::packet::{now_unix_millis, LogLine};
use crate::transport::Transport;

#[cfg(unix)]
mod unix_impl {
    use std::io;
    use std::os::fd::{AsRawFd, OwnedFd, RawFd};

    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::unistd::{dup, dup2, pipe, read, write};
    use tokio::io::unix::AsyncFd;

    pub struct CaptureFd(pub OwnedFd);

    impl AsRawFd for CaptureFd {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    fn io_err(e: nix::errno::Errno) -> io::Error {
        io::Error::from_raw_os_error(e as i32)
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
        Ok(())
    }

    /// Splice a pipe into `target_fd` (1 for stdout, 2 for stderr),
    /// returning the async-readable pipe end and an owned duplicate of the
    /// original fd to tee writes through to.
    pub fn splice(target_fd: RawFd) -> io::Result<(AsyncFd<CaptureFd>, OwnedFd)> {
        let original = dup(target_fd).map_err(io_err)?;
        let (read_end, write_end) = pipe().map_err(io_err)?;
        dup2(write_end.as_raw_fd(), target_fd).map_err(io_err)?;
        drop(write_end);

        set_nonblocking(read_end.as_raw_fd())?;
        let afd = AsyncFd::new(CaptureFd(read_end))?;
        Ok((afd, original))
    }

    pub async fn read_chunk(afd: &AsyncFd<CaptureFd>, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = afd.readable().await?;
            match guard.try_io(|inner| read(inner.as_raw_fd(), buf).map_err(io_err)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub fn tee(original: &OwnedFd, data: &[u8]) {
        let _ = write(original, data);
    }

    /// `OwnedFd`'s `Drop` impl already closes the descriptor; this just
    /// names the point in the reader loop where that happens.
    pub fn close_owned(fd: OwnedFd) {
        drop(fd);
    }
}

/// Wire-tags used on captured lines, mirroring the original destination in
/// `LogLine.source`.
const SOURCE_STDOUT: &str = "/dev/stdout";
const SOURCE_STDERR: &str = "/dev/stderr";

/// Captures stdout/stderr by fd interposition on Unix; a no-op elsewhere,
/// since there is no portable fd-capture story for Windows — run the
/// monitored program under `outrig-logwrap` there instead.
pub struct LogCaptureCollector {
    transport: Transport,
    enabled: Arc<AtomicBool>,
    linenum: Arc<AtomicI64>,
}

impl LogCaptureCollector {
    pub fn new(transport: Transport) -> Self {
        Self { transport, enabled: Arc::new(AtomicBool::new(false)), linenum: Arc::new(AtomicI64::new(0)) }
    }

    fn emit_line(transport: &Transport, linenum: &AtomicI64, source: &'static str, msg: String) {
        let line = LogLine { linenum: linenum.fetch_add(1, Ordering::Relaxed) + 1, ts: now_unix_millis(), msg, source: source.to_owned() };
        if let Err(err) = transport.send("log", line) {
            warn!(%err, source, "failed to enqueue captured log line");
        }
    }

    #[cfg(unix)]
    fn spawn_reader(transport: Transport, linenum: Arc<AtomicI64>, target_fd: i32, source: &'static str) {
        let (afd, original) = match unix_impl::splice(target_fd) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, source, "failed to splice capture pipe, log capture disabled for this fd");
                return;
            }
        };

        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            let mut partial = Vec::new();
            loop {
                match unix_impl::read_chunk(&afd, &mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        unix_impl::tee(&original, &buf[..n]);
                        partial.extend_from_slice(&buf[..n]);
                        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
                            let line_bytes: Vec<u8> = partial.drain(..=pos).collect();
                            let text = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
                            Self::emit_line(&transport, &linenum, source, text);
                        }
                    }
                    Err(err) => {
                        warn!(%err, source, "log capture read failed, stopping capture for this fd");
                        break;
                    }
                }
            }
            if !partial.is_empty() {
                let text = String::from_utf8_lossy(&partial).into_owned();
                Self::emit_line(&transport, &linenum, source, text);
            }
            unix_impl::close_owned(original);
        });
    }
}

#[async_trait::async_trait]
impl Collector for LogCaptureCollector {
    fn name(&self) -> &'static str {
        "logcapture"
    }

    #[cfg(unix)]
    async fn enable(&self) {
        if self.enabled.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::spawn_reader(self.transport.clone(), Arc::clone(&self.linenum), 1, SOURCE_STDOUT);
        Self::spawn_reader(self.transport.clone(), Arc::clone(&self.linenum), 2, SOURCE_STDERR);
    }

    #[cfg(not(unix))]
    async fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        warn!("fd-level log capture is not supported on this platform; run the monitored program under outrig-logwrap instead");
    }

    async fn disable(&self) {
        // intentionally not reversible: see module docs.
    }

    async fn status(&self) -> CollectorStatus {
        CollectorStatus { running: self.enabled.load(Ordering::Acquire), ..Default::default() }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn transport_pair() -> (Transport, tokio::net::UnixListener, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lc.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let targets = crate::transport::ConnectTargets { domain_socket: Some(path.to_string_lossy().into_owned()), tcp_addr: None, docker_probe_addr: None };
        let transport = Transport::spawn(
            targets,
            uuid::Uuid::new_v4(),
            crate::packet::AppInfoPacket {
                apprunid: uuid::Uuid::new_v4(),
                appname: "t".into(),
                modulename: String::new(),
                executable: String::new(),
                args: Vec::new(),
                env: Vec::new(),
                starttime: 0,
                pid: 1,
                user: String::new(),
                hostname: String::new(),
                buildinfo: crate::packet::BuildInfo::default(),
                outrigsdkversion: String::new(),
            },
            CancellationToken::new(),
            false,
        );
        (transport, listener, dir)
    }

    #[tokio::test]
    async fn emit_line_assigns_increasing_linenums() {
        let (transport, listener, _dir) = transport_pair();
        let (mut stream, _) = listener.accept().await.unwrap();
        let linenum = AtomicI64::new(0);

        LogCaptureCollector::emit_line(&transport, &linenum, SOURCE_STDOUT, "first".into());
        LogCaptureCollector::emit_line(&transport, &linenum, SOURCE_STDOUT, "second".into());

        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut reader = BufReader::new(&mut stream);
        let mut header = String::new();
        reader.read_line(&mut header).await.unwrap();
        let mut appinfo = String::new();
        reader.read_line(&mut appinfo).await.unwrap();

        let mut first = String::new();
        reader.read_line(&mut first).await.unwrap();
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["data"]["linenum"], 1);

        let mut second = String::new();
        reader.read_line(&mut second).await.unwrap();
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["data"]["linenum"], 2);
    }
}
