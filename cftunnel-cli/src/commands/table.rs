//! Tunnel listing table

use cftunnel_core::TunnelRecord;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

/// Shown while cloudflared has not announced a URL yet
pub const URL_PENDING: &str = "initializing…";

/// Build the status table for `records`
pub fn tunnel_table(records: &[TunnelRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Port").fg(Color::Cyan),
        Cell::new("Protocol").fg(Color::Cyan),
        Cell::new("PID").fg(Color::Cyan),
        Cell::new("Uptime").fg(Color::Cyan),
        Cell::new("Public URL").fg(Color::Cyan),
    ]);

    for record in records {
        let url = match record.public_url() {
            Some(url) => Cell::new(url).fg(Color::Green),
            None => Cell::new(URL_PENDING).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&record.name),
            Cell::new(record.local_port),
            Cell::new(record.protocol),
            Cell::new(record.pid),
            Cell::new(format_uptime(record.uptime())),
            url,
        ]);
    }

    table
}

/// Compact uptime: `45s`, `12m 03s`, `3h 07m`, `2d 04h`
pub fn format_uptime(uptime: chrono::Duration) -> String {
    let secs = uptime.num_seconds().max(0);
    let (days, hours, mins, secs) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{}d {:02}h", days, hours)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
