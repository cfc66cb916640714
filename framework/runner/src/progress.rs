use std::cmp::min;
use std::time::Duration;

use gust_core::prelude::DelegatedShutdownListener;
use indicatif::{ProgressBar, ProgressStyle};

/// Displays a progress bar for the hold-for window of the running simulation.
pub(crate) fn start_progress(
    simulation: &str,
    hold_for: Duration,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let simulation = simulation.to_string();
    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let started = std::time::Instant::now();
            let pb = ProgressBar::new(hold_for.as_secs().max(1));
            pb.set_style(
                ProgressStyle::with_template(
                    "{prefix} [{wide_bar:.cyan/blue}] {pos}s / {len}s",
                )
                .expect("Failed to set progress style")
                .progress_chars("#>-"),
            );
            pb.set_prefix(simulation);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                pb.set_position(min(started.elapsed().as_secs(), hold_for.as_secs()));
                std::thread::sleep(Duration::from_millis(250));
            }
        })
        .expect("Failed to start progress thread");
}
