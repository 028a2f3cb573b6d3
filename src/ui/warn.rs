use std::io::{BufRead, Write};

/// Print a standardized warning line to stderr (color-aware).
pub fn warn_print(msg: &str) {
    let use_err = crate::color_enabled_stderr();
    eprintln!(
        "{}",
        crate::paint(use_err, "\x1b[33;1m", &format!("warning: {}", msg))
    );
}

/// Whether a yes/no prompt can be shown.
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stderr)
}

/// Ask a yes/no question on stderr. Non-interactive sessions answer no.
pub fn confirm(prompt: &str) -> bool {
    if !is_interactive() {
        return false;
    }
    let use_err = crate::color_enabled_stderr();
    eprint!("{}", crate::paint(use_err, "\x1b[90m", &format!("{prompt} [y/N]: ")));
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    is_yes(&line)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
