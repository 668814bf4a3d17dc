//! Event output for the headless runner.

use std::io::Write;

use sonos_sync::{EventEmitter, GroupView, SyncEvent};

/// Writes every engine message to stdout as one JSON line.
pub struct JsonLinesEmitter;

impl EventEmitter for JsonLinesEmitter {
    fn emit(&self, event: SyncEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("[Output] Failed to serialize event: {}", e);
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
            log::warn!("[Output] Failed to write event: {}", e);
        }
    }
}

/// Logs what the view shows after a message changed it.
pub fn log_now_playing(view: &GroupView) {
    let rows = view.now_playing();
    if rows.is_empty() {
        log::info!("[View] Nothing playing ({} groups)", view.groups().len());
        return;
    }
    for row in rows {
        let Some(metadata) = &row.metadata else {
            log::info!(
                "[View] \"{}\" {}",
                row.track.title,
                row.details.join(" / ")
            );
            continue;
        };
        let volume = if metadata.is_muted {
            "muted".to_string()
        } else {
            format!("vol {}", metadata.volume)
        };
        log::info!(
            "[View] {}: \"{}\" {} ({}, {})",
            metadata.group_name,
            row.track.title,
            row.details.join(" / "),
            volume,
            metadata.duration
        );
    }
}
