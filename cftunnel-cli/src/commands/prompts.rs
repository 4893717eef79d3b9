//! Output helpers shared by the menu and the subcommands.
//!
//! Every helper has a `_to` variant writing to any `Write` so output can be
//! checked in tests.

use std::io::{self, Write};

use cftunnel_core::TunnelError;
use dialoguer::console::style;

const HEADER_WIDTH: usize = 60;

/// Draws a boxed header with the given title.
pub fn print_header(title: &str) {
    let _ = print_header_to(&mut io::stdout(), title);
}

/// Draws a boxed header to a writer (for testing).
pub fn print_header_to<W: Write>(w: &mut W, title: &str) -> io::Result<()> {
    let border = "─".repeat(HEADER_WIDTH);
    writeln!(w, "┌{}┐", border)?;
    writeln!(w, "│ {:<width$} │", title, width = HEADER_WIDTH - 2)?;
    writeln!(w, "└{}┘", border)?;
    writeln!(w)?;
    Ok(())
}

/// Prints a step message with a trailing space (no newline).
pub fn print_step_to<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    write!(w, "{} ", message)?;
    w.flush()
}

/// Prints a success message with a green checkmark.
pub fn print_success_to<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    writeln!(w, "{} {}", style("✓").green().bold(), style(message).green())
}

/// Prints a warning with a yellow exclamation mark.
pub fn print_warning_to<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    writeln!(w, "{} {}", style("!").yellow().bold(), style(message).yellow())
}

/// Prints an error message with a red X.
pub fn print_error_to<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    writeln!(w, "{} {}", style("✗").red().bold(), style(message).red())
}

/// Prints a failed operation, including the tunnel log when there is one.
pub fn print_failure_to<W: Write>(w: &mut W, err: &anyhow::Error) -> io::Result<()> {
    print_error_to(w, &format!("{:#}", err))?;
    let tail = err
        .downcast_ref::<TunnelError>()
        .and_then(TunnelError::log_tail);
    if let Some(tail) = tail {
        writeln!(w, "{}", style("Last lines of the tunnel log:").dim())?;
        for line in tail.lines() {
            writeln!(w, "  {}", line)?;
        }
    }
    Ok(())
}
