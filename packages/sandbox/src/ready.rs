// ABOUTME: Dev server readiness detection from process output
// ABOUTME: Recognises the startup banners of common dev servers and emits a ready event once

use crate::runtime::{ProcessEvents, StreamType};
use once_cell::sync::Lazy;
use regex::Regex;
use shipyard_core::ServedOrigin;
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use tracing::debug;

static ANSI_ESCAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").ok());

// Most specific first. Vite prints the port in bold, so escapes are stripped first.
static READY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Local:\s+https?://(?:localhost|127\.0\.0\.1|\[::1\]|0\.0\.0\.0):(\d+)", // Vite, Next.js 13+
        r"ready - started server on .*:(\d+)", // Next.js 12
        r"Server ready at https?://localhost:(\d+)",
        r"Running at https?://localhost:(\d+)",
        r"(?i)server (?:is )?(?:running|listening) on (?:port )?(\d+)", // Express
        r"(?i)listening on (?:port )?(\d+)",
        r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Strip terminal color and cursor escapes from a line
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    match ANSI_ESCAPE.as_ref() {
        Some(regex) => regex.replace_all(line, ""),
        None => Cow::Borrowed(line),
    }
}

/// Extract the port a dev server announced in one line of output
pub fn detect_port(line: &str) -> Option<u16> {
    let line = strip_ansi(line);
    READY_PATTERNS.iter().find_map(|regex| {
        regex
            .captures(&line)
            .and_then(|captures| captures.get(1))
            .and_then(|port| port.as_str().parse::<u16>().ok())
            .filter(|port| *port != 0)
    })
}

/// Fires at most once per process
#[derive(Debug, Default)]
pub struct ReadyDetector {
    fired: bool,
}

impl ReadyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the announced port the first time a ready banner is seen
    pub fn observe(&mut self, line: &str) -> Option<u16> {
        if self.fired {
            return None;
        }
        let port = detect_port(line)?;
        self.fired = true;
        Some(port)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// Maps a port announced inside the sandbox to the origin the host can reach
pub type OriginMapper = Arc<dyn Fn(u16) -> ServedOrigin + Send + Sync>;

/// Forwards output lines to a process event stream and emits readiness.
///
/// Clones share one detector so stdout and stderr together fire once.
#[derive(Clone)]
pub struct LineScanner {
    events: ProcessEvents,
    detector: Arc<Mutex<ReadyDetector>>,
    to_origin: OriginMapper,
}

impl LineScanner {
    pub fn new(events: ProcessEvents, to_origin: OriginMapper) -> Self {
        Self {
            events,
            detector: Arc::new(Mutex::new(ReadyDetector::new())),
            to_origin,
        }
    }

    pub fn line(&self, stream: StreamType, line: &str) {
        self.events.output(stream, line);

        let port = self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(line);

        if let Some(port) = port {
            let origin = (self.to_origin)(port);
            debug!("Dev server announced port {}, serving at {}", port, origin.url);
            self.events.ready(origin);
        }
    }

    pub fn exited(&self, code: i32) {
        self.events.exited(code);
    }

    pub fn events(&self) -> &ProcessEvents {
        &self.events
    }
}

/// Splits arbitrary output chunks into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
