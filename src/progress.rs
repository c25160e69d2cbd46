//! Run progress reporting.
//!
//! Reports observable progress during `uplift run` so users see which file
//! and chunk is in flight and how each file ended. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts. Reporters consume
//! [`Event`]s from the run's [`EventBus`](crate::events::EventBus).

use std::io::Write;

use tokio::sync::broadcast;

use crate::events::{Event, EventType};

/// Renders run events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &Event);

    /// Called when the reporter fell behind and `missed` events were dropped.
    fn lagged(&self, _missed: u64) {}
}

/// Human-friendly progress on stderr: "uplift llm        running  chunk 2/5 of a.py".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &Event) {
        let label = match event.kind {
            EventType::Status => event.status().unwrap_or("status"),
            EventType::Log => "log",
            EventType::Summary => "summary",
            EventType::Change => "changed",
        };
        let line = format!("uplift {:<10} {:<9} {}\n", event.stage, label, event.message());
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }

    fn lagged(&self, missed: u64) {
        let _ = writeln!(
            std::io::stderr().lock(),
            "uplift progress   ({} events skipped)",
            format_number(missed)
        );
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &Event) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }

    fn lagged(&self, missed: u64) {
        let obj = serde_json::json!({ "event": "lagged", "missed": missed });
        let _ = writeln!(std::io::stderr().lock(), "{}", obj);
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &Event) {}
}

/// Feed every event from `rx` to `reporter` until the bus closes.
pub async fn forward(mut rx: broadcast::Receiver<Event>, reporter: Box<dyn ProgressReporter>) {
    loop {
        match rx.recv().await {
            Ok(event) => reporter.report(&event),
            Err(broadcast::error::RecvError::Lagged(missed)) => reporter.lagged(missed),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// `1234567` as `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl ProgressReporter for Collect {
        fn report(&self, event: &Event) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(event.message().to_string());
            }
        }
    }

    #[tokio::test]
    async fn test_forward_until_bus_closes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new(8);
        let task = tokio::spawn(forward(bus.subscribe(), Box::new(Collect(seen.clone()))));
        bus.log("run", "one");
        bus.log("run", "two");
        drop(bus);
        task.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }
}
