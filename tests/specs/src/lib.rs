// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `apiary` binary as a subprocess and exercises the
//! newline-delimited stdio transport.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// Resolve the path to the compiled `apiary` binary.
pub fn apiary_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("apiary")
}

/// A running `apiary` process speaking NDJSON on stdio, killed on drop.
pub struct ApiaryProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    _data_dir: tempfile::TempDir,
}

impl ApiaryProcess {
    /// Spawn the binary in stdio mode with an isolated data directory.
    pub fn start() -> anyhow::Result<Self> {
        let binary = apiary_binary();
        anyhow::ensure!(binary.exists(), "apiary binary not found at {}", binary.display());
        let data_dir = tempfile::tempdir()?;

        let mut child = Command::new(&binary)
            .args([
                "--stdio",
                "--log-format",
                "text",
                "--log-level",
                "warn",
                "--data-dir",
            ])
            .arg(data_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no child stdout"))?;
        Ok(Self { child, stdin, stdout: BufReader::new(stdout), _data_dir: data_dir })
    }

    /// Send one command frame.
    pub fn send(&mut self, frame: &serde_json::Value) -> anyhow::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| anyhow::anyhow!("stdin already closed"))?;
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        stdin.write_all(line.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    /// Read the next frame of the given `type` tag, skipping others.
    pub fn read_frame(&mut self, frame_type: &str) -> anyhow::Result<serde_json::Value> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            anyhow::ensure!(Instant::now() < deadline, "timed out waiting for {frame_type}");
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line)?;
            anyhow::ensure!(read > 0, "server closed stdout waiting for {frame_type}");
            let frame: serde_json::Value = serde_json::from_str(line.trim_end())?;
            if frame["type"] == frame_type {
                return Ok(frame);
            }
        }
    }

    /// Send a command and return its response frame.
    pub fn request(&mut self, frame: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.send(frame)?;
        self.read_frame("response")
    }

    /// Close stdin (EOF triggers graceful shutdown in stdio-only mode) and
    /// wait for the process to exit.
    pub fn finish(&mut self) -> anyhow::Result<std::process::ExitStatus> {
        drop(self.stdin.take());
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            anyhow::ensure!(Instant::now() < deadline, "apiary did not exit after stdin EOF");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for ApiaryProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
