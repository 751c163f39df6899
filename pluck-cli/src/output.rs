use std::io::Write;

use pluck_core::{EventSink, NoteEvent};

/// Prints each onset as it arrives, as text or as one JSON object per line.
pub struct PrintSink {
    json: bool,
}

impl PrintSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// The line printed for `event`, or `None` if it could not be serialized.
    fn render(&self, event: &NoteEvent) -> Option<String> {
        if !self.json {
            return Some(format_event(event));
        }
        match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(e) => {
                log::warn!("Could not serialize event: {}", e);
                None
            }
        }
    }
}

impl EventSink for PrintSink {
    fn accept(&mut self, event: &NoteEvent) {
        let Some(line) = self.render(event) else {
            return;
        };

        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_err() {
            log::warn!("stdout closed, dropping event");
        }
    }
}

pub fn format_event(event: &NoteEvent) -> String {
    format!(
        "{:>9.3}s  {:<4} {:>+6.1} cents  ({:.1} Hz, volume {:.4})",
        event.timestamp, event.note, event.cents, event.frequency, event.volume
    )
}
