//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use proxsave_notify::Report;
use proxsave_notify::notify::process::{ProcessOutput, ProcessRunner};

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn load_report() -> Report {
    let content = std::fs::read_to_string(fixture_path("report.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

/// Empty file standing in for a system binary.
pub fn fake_binary(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl RecordedCall {
    pub fn stdin_text(&self) -> String {
        String::from_utf8_lossy(self.stdin.as_deref().unwrap_or_default()).into_owned()
    }
}

/// Runner answering from per-program queues; the last answer repeats and
/// unknown programs are reported as missing.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    answers: Mutex<HashMap<String, VecDeque<ProcessOutput>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, program: &str, output: ProcessOutput) -> Self {
        self.answers
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: stdin.map(<[u8]>::to_vec),
        });

        let mut answers = self.answers.lock().unwrap();
        let queue = answers
            .get_mut(program)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, program.to_string()))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_else(|| ProcessOutput::ok("")))
        } else {
            Ok(queue.front().cloned().unwrap_or_else(|| ProcessOutput::ok("")))
        }
    }
}
