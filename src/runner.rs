//! Process helpers shared by the ecosystem backends

use reconcile::{Error, ErrorCategory, Item, Result};
use std::io::ErrorKind;
use std::process::{Command, Output, Stdio};

/// Run `program` and capture its output. A missing program is
/// `AdapterUnavailable`; any other spawn failure is I/O.
pub fn run_raw(backend: &str, program: &str, args: &[&str]) -> Result<Output> {
    log::trace!("{backend}: {program} {}", args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::unavailable(backend, format!("{program} not found in PATH")),
            _ => Error::Io(e),
        })
}

/// Run `program`, returning stdout on success and a categorized error
/// built from stderr otherwise
pub fn run_checked(
    backend: &str,
    program: &str,
    args: &[&str],
    item: Option<&str>,
) -> Result<String> {
    let output = run_raw(backend, program, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::from_command_output(backend, &stderr, item));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run_checked`], but a failure whose stderr contains one of
/// `already_done` counts as success. Keeps install and remove idempotent
/// for tools that refuse to repeat themselves.
pub fn run_idempotent(
    backend: &str,
    program: &str,
    args: &[&str],
    item: Option<&str>,
    already_done: &[&str],
) -> Result<()> {
    let output = run_raw(backend, program, args)?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lower = stderr.to_lowercase();
    if already_done.iter().any(|m| lower.contains(m)) {
        log::debug!("{backend}: {program} {}: already done", args.join(" "));
        return Ok(());
    }
    Err(Error::from_command_output(backend, &stderr, item))
}

/// Check if a command exists on PATH
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// The tool installed something other than the declared version
pub fn unpinned(backend: &str, item: &Item, found: Option<&str>) -> Error {
    Error::AdapterFailed {
        backend: backend.to_string(),
        message: format!(
            "cannot pin {} to {} (installed: {})",
            item.id,
            item.fingerprint.as_deref().unwrap_or("(any)"),
            found.unwrap_or("(none)")
        ),
        stderr: String::new(),
        category: ErrorCategory::Other,
    }
}

/// Fail unless `found` carries the declared version
pub fn ensure_pinned(backend: &str, item: &Item, found: Option<&Item>) -> Result<()> {
    match found {
        Some(found) if found.matches(item) => Ok(()),
        _ => Err(unpinned(
            backend,
            item,
            found.and_then(|f| f.fingerprint.as_deref()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::ErrorCategory;

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = run_checked("test", "strata-no-such-program-xyz", &[], None).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unavailable);
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_is_returned() {
        let out = run_checked("test", "sh", &["-c", "echo hello"], None).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_is_categorized_from_stderr() {
        let err = run_checked(
            "test",
            "sh",
            &["-c", "echo 'error: permission denied' >&2; exit 1"],
            Some("thing"),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(err.is_adapter_failure());
    }

    #[cfg(unix)]
    #[test]
    fn test_idempotent_marker_is_success() {
        run_idempotent(
            "test",
            "sh",
            &["-c", "echo 'Error: org.x not installed' >&2; exit 1"],
            Some("org.x"),
            &["not installed"],
        )
        .unwrap();

        let err = run_idempotent("test", "sh", &["-c", "exit 3"], None, &["not installed"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_command_exists_negative() {
        assert!(!command_exists("strata-no-such-program-xyz"));
    }

    #[test]
    fn test_ensure_pinned() {
        let declared = Item::new("jq").with_fingerprint("1.7.1");
        assert!(ensure_pinned("brew", &declared, Some(&declared)).is_ok());
        assert!(ensure_pinned("brew", &Item::new("jq"), Some(&declared)).is_ok());

        let newer = Item::new("jq").with_fingerprint("1.8.0");
        let err = ensure_pinned("brew", &declared, Some(&newer)).unwrap_err();
        assert!(err.to_string().contains("cannot pin jq to 1.7.1 (installed: 1.8.0)"));
        assert!(!err.is_retryable());
        assert!(ensure_pinned("brew", &declared, None).is_err());
    }
}
