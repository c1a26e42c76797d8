use chrono::{DateTime, Utc};
use lease_queue::{MessageId, ReceivedMessage};
use parking_lot::Mutex;

use crate::monitor::LeaseRow;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Destination of the lease diagnostic trace
pub trait TraceSink: Send + Sync {
    /// A message was delivered; print its metadata and the table header
    fn message_received(&self, message: &ReceivedMessage);

    /// One countdown row
    fn row(&self, row: &LeaseRow);

    /// A free-form note between rows
    fn note(&self, text: &str);
}

/// Prints the trace to stdout in aligned columns
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl TraceSink for ConsoleSink {
    fn message_received(&self, message: &ReceivedMessage) {
        println!();
        println!("----------");
        println!("Message body: {}", message.body_text());
        println!("Message id: {}", message.message_id);
        println!("EnqueuedTime: {}", format_time(message.enqueued_at));
        println!("{}", format_header());
    }

    fn row(&self, row: &LeaseRow) {
        println!("{}", format_row(row));
    }

    fn note(&self, text: &str) {
        println!("{}", text);
    }
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format(TIME_FORMAT).to_string()
}

pub fn format_header() -> String {
    format!(
        "{:>10}{:>25}{:>25}{:>25}{:>25}{:>25}{:>25}{:>15}",
        "Counter",
        "ElapsedTime",
        "LockedUntil",
        "CurrentTime",
        "LockRemainInterval",
        "ExpiresAt",
        "TimeToLive",
        "DeliveryCount"
    )
}

pub fn format_row(row: &LeaseRow) -> String {
    format!(
        "{:>10}{:>25.3}{:>25}{:>25}{:>25.3}{:>25}{:>25.2}{:>15}",
        row.tick,
        row.elapsed.as_secs_f64(),
        format_time(row.locked_until),
        format_time(row.now),
        row.remaining_secs(),
        format_time(row.expires_at),
        row.ttl_minutes,
        row.delivery_count
    )
}

/// One line of a recorded trace
#[derive(Debug, Clone, PartialEq)]
pub enum TraceLine {
    Message(MessageId),
    Row(LeaseRow),
    Note(String),
}

/// Keeps the trace in memory for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<TraceLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<TraceLine> {
        self.lines.lock().clone()
    }

    pub fn rows(&self) -> Vec<LeaseRow> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| match line {
                TraceLine::Row(row) => Some(row.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| match line {
                TraceLine::Note(note) => Some(note.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TraceSink for MemorySink {
    fn message_received(&self, message: &ReceivedMessage) {
        self.lines.lock().push(TraceLine::Message(message.message_id.clone()));
    }

    fn row(&self, row: &LeaseRow) {
        self.lines.lock().push(TraceLine::Row(row.clone()));
    }

    fn note(&self, text: &str) {
        self.lines.lock().push(TraceLine::Note(text.to_string()));
    }
}
