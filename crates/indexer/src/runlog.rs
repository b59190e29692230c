// Copyright 2026 Gardens Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory run-log capture: a `tracing` layer that buffers formatted
//! event lines so a run's log can be pinned to the content store for
//! postmortems, independent of live log output.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Shared line buffer; cloned handles append to the same run log.
#[derive(Clone, Default)]
pub struct RunLogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }

    /// Take the buffered lines, leaving the buffer empty for the next run.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap().is_empty()
    }
}

/// Layer that mirrors every event into a [`RunLogBuffer`].
pub struct RunLogLayer {
    buffer: RunLogBuffer,
}

impl RunLogLayer {
    pub fn new(buffer: RunLogBuffer) -> Self {
        Self { buffer }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for RunLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.buffer.push(format!(
            "[{}] {}: {}{}",
            metadata.level().as_str().to_lowercase(),
            metadata.target(),
            visitor.message,
            visitor.fields,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_are_buffered_and_drained() {
        let buffer = RunLogBuffer::new();
        let subscriber =
            tracing_subscriber::registry().with(RunLogLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(pool = "0xabc", "processing pool");
            tracing::warn!("price lookup failed");
        });

        let lines = buffer.drain();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[info]"));
        assert!(lines[0].contains("processing pool"));
        assert!(lines[0].contains("pool=\"0xabc\""));
        assert!(lines[1].starts_with("[warn]"));
        assert!(buffer.is_empty());
    }
}
