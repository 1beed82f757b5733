//! Output sinks for lines written by `Emit` activities
//!
//! Sinks are shared by every instance in a run. Each `write_line` call must land
//! as one whole line; ordering between instances is not guaranteed.

use parking_lot::Mutex;
use std::io::Write;

/// Destination for emitted lines.
pub trait OutputSink: Send + Sync {
    /// Write one line. Called concurrently from many instance tasks.
    fn write_line(&self, line: &str);
}

/// Writes to standard output, holding the stdout lock for the whole line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not fault the workflow.
        let _ = writeln!(out, "{}", line);
    }
}

/// Captures lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line written so far, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_line(&self, _line: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn memory_sink_keeps_whole_lines_under_contention() {
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        sink.write_line(&format!("worker-{}-line-{}", worker, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 800);
        assert!(lines.iter().all(|line| line.starts_with("worker-")));
    }
}
