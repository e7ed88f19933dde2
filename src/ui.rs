use colored::{ColoredString, Colorize};
use reconcile::{Change, ConfirmCallback, ErrorCategory};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Colored marker for a classified change
pub fn change_marker(change: Change) -> ColoredString {
    let symbol = change.symbol();
    match change {
        Change::Added => symbol.green(),
        Change::Removed | Change::PendingRemoval => symbol.red(),
        Change::Modified | Change::PendingChange | Change::Drifted => symbol.yellow(),
        Change::Untracked => symbol.blue(),
        Change::Conflict => symbol.red().bold(),
        Change::Unchanged => symbol.dimmed(),
    }
}

/// Print the category advice once per distinct failure category
pub fn advice(categories: &[ErrorCategory]) {
    for category in categories {
        dim(&format!("{}: {}", category.description(), category.advice()));
    }
}

/// Shorten long fingerprints (hashes, image references), keeping both ends
pub fn truncate_middle(s: &str, max_len: usize) -> String {
    let len = s.chars().count();
    if len <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let keep = max_len - 3;
    let head: String = s.chars().take(keep.div_ceil(2)).collect();
    let tail: String = s.chars().skip(len - keep / 2).collect();
    format!("{head}...{tail}")
}

/// Interactive confirmation through dialoguer
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> reconcile::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(|e| reconcile::Error::Other(format!("confirmation prompt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_middle_short() {
        assert_eq!(truncate_middle("1.7.1", 12), "1.7.1");
    }

    #[test]
    fn test_truncate_middle_long() {
        let hash = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
        let short = truncate_middle(hash, 15);
        assert_eq!(short.chars().count(), 15);
        assert!(short.starts_with("af1349"));
        assert!(short.ends_with("3262"));
        assert!(short.contains("..."));
    }

    #[test]
    fn test_truncate_middle_tiny() {
        assert_eq!(truncate_middle("abcdef", 2), "...");
    }
}
