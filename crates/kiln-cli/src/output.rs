//! Formatted output helpers for CLI commands.
//!
//! Progress goes to stderr so that documents printed on stdout can be
//! piped. Colors are plain ANSI sequences.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::time::Duration;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Prints a progress step.
pub fn print_step(message: &str) {
    eprintln!("{CYAN}==>{RESET} {BOLD}{message}{RESET}");
}

/// Prints one line of engine output.
pub fn print_log_line(line: &str) {
    eprintln!("  {DIM}{line}{RESET}");
}

/// Prints the final success line and a short summary.
pub fn print_built(tag: &str, context_bytes: u64, elapsed: Duration) {
    eprintln!();
    eprintln!("Image built as {tag}");
    eprintln!(
        "  {GREEN}✓{RESET} {DIM}context {} · {}{RESET}",
        format_bytes(context_bytes),
        format_duration(elapsed)
    );
}

/// Prints a document to stdout.
pub fn print_document(text: &str) {
    println!("{text}");
}

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats an elapsed time as seconds, or minutes and seconds past a minute.
#[must_use]
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_kib() {
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }

    #[test]
    fn format_bytes_displays_mib() {
        assert_eq!(format_bytes(134_217_728), "128.0 MiB");
    }

    #[test]
    fn format_duration_under_a_minute() {
        assert_eq!(format_duration(Duration::from_millis(4_300)), "4.3s");
    }

    #[test]
    fn format_duration_over_a_minute() {
        assert_eq!(format_duration(Duration::from_secs(135)), "2m 15s");
    }
}
