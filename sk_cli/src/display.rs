//! Display utilities for progress bars and formatting helpers.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sk_io::{Progress, ProgressTicker};

const TICK: Duration = Duration::from_millis(100);

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("    {prefix:<16} {bar:25.cyan/dim} {bytes:>10}/{total_bytes:<10} {eta:>6}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╸")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("    {prefix:<16} {spinner:.cyan} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

/// An indicatif bar fed by a `ProgressTicker`.
///
/// Library code only bumps the shared counters; the ticker thread copies
/// them into the bar.
pub struct TransferBar {
    progress: Arc<Progress>,
    bar: ProgressBar,
    ticker: Option<ProgressTicker>,
}

impl TransferBar {
    pub fn start(label: &str, hidden: bool) -> Self {
        let progress = Arc::new(Progress::new());
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(spinner_style());
        bar.set_prefix(label.to_string());

        let render = bar.clone();
        let mut sized = false;
        let ticker = ProgressTicker::spawn(progress.clone(), TICK, move |snapshot| {
            match (snapshot.total > 0, sized) {
                (true, false) => {
                    render.set_style(bar_style());
                    sized = true;
                }
                (false, true) => {
                    render.set_style(spinner_style());
                    sized = false;
                }
                _ => {}
            }
            render.set_length(snapshot.total);
            render.set_position(snapshot.current);
            render.tick();
        });

        Self {
            progress,
            bar,
            ticker: Some(ticker),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Stop the ticker and clear the bar.
    pub fn finish(mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.finish();
        }
        self.bar.finish_and_clear();
    }
}

pub fn heading(message: impl std::fmt::Display) {
    println!("{} {}", style("==>").cyan().bold(), message);
}

pub fn success(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green(), message);
}

pub fn note(message: impl std::fmt::Display) {
    println!("    {} {}", style("→").dim(), message);
}

pub fn warning(message: impl std::fmt::Display) {
    eprintln!("{} {}", style("warning:").yellow().bold(), message);
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn hidden_bar_tracks_counters() {
        let bar = TransferBar::start("test", true);
        let progress = bar.progress();
        progress.set_total(10);
        progress.add(10);
        assert_eq!(progress.snapshot().current, 10);
        bar.finish();
    }
}
