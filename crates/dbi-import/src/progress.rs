//! Progress rendering for the CLI
//!
//! The coordinator emits aggregate counts after each batch resolves; this
//! module turns them into a terminal spinner line.

use dbi_common::Progress;
use indicatif::{ProgressBar, ProgressStyle};

/// Create the import spinner. The row total is unknown while the source is
/// still streaming, so this is a spinner with a counter message rather than
/// a bounded bar.
pub fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// One-line rendering of a progress update
pub fn render_progress(progress: &Progress) -> String {
    format!(
        "{}/{} rows processed ({} succeeded, {} failed)",
        progress.processed, progress.total, progress.succeeded, progress.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_progress() {
        let progress = Progress {
            processed: 100,
            succeeded: 80,
            failed: 20,
            total: 120,
        };
        assert_eq!(
            render_progress(&progress),
            "100/120 rows processed (80 succeeded, 20 failed)"
        );
    }

    #[test]
    fn test_create_spinner_is_unbounded() {
        let pb = create_spinner();
        assert_eq!(pb.length(), None);
        pb.finish();
    }
}
