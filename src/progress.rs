//! Progress bar for reconciliation passes

use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{Operation, ProgressCallback, SubsystemId};
use std::io::IsTerminal;

const TEMPLATE: &str = "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// One bar per pass, drawn on stderr
pub struct PassProgress {
    enabled: bool,
    bar: Option<ProgressBar>,
}

impl PassProgress {
    /// Hidden when `quiet`, when emitting JSON, or when stderr is not a terminal
    pub fn new(quiet: bool) -> Self {
        Self {
            enabled: !quiet && std::io::stderr().is_terminal(),
            bar: None,
        }
    }

    pub fn hidden() -> Self {
        Self {
            enabled: false,
            bar: None,
        }
    }
}

impl ProgressCallback for PassProgress {
    fn on_pass_start(&mut self, operation: Operation, count: usize) {
        if !self.enabled || count == 0 {
            return;
        }
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        let pb = ProgressBar::new(count as u64);
        pb.set_style(style);
        pb.set_prefix(operation.as_str());
        self.bar = Some(pb);
    }

    fn on_subsystem_complete(&mut self, id: &SubsystemId, ok: bool) {
        if let Some(pb) = &self.bar {
            if !ok {
                pb.suspend(|| log::debug!("{id} failed"));
            }
            pb.set_message(id.to_string());
            pb.inc(1);
        }
    }

    fn on_pass_complete(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_never_draws() {
        let mut progress = PassProgress::hidden();
        progress.on_pass_start(Operation::Drift, 3);
        assert!(progress.bar.is_none());
        progress.on_subsystem_complete(&"flatpak".into(), true);
        progress.on_pass_complete();
    }
}
