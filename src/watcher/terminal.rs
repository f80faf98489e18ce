// src/watcher/terminal.rs

//! Helpers for programs that expect a terminal.

use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences (`ESC [` or the 8-bit `0x9B` introducer, parameters, final
/// byte) and two-byte `ESC` sequences.
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\x1b\[|\x{9b})[^@-_a-z]*[@-_a-z]|\x1b[@-_]")
        .expect("escape sequence pattern is valid")
});

/// Remove ANSI escape sequences (colours, cursor movement, ...) from `text`.
pub fn strip_escape_sequences(text: &str) -> String {
    ESCAPE_SEQUENCE.replace_all(text, "").into_owned()
}

/// Build a command vector that runs `command` under a pseudo-terminal.
///
/// On unix the command runs via `script` in a new session whose members are
/// killed when the wrapper exits, so orphaned descendants do not outlive it.
/// On Windows the command is returned unwrapped.
pub fn with_pty(command: &str) -> Vec<String> {
    if cfg!(windows) {
        return vec![command.to_string()];
    }

    vec![
        "/usr/bin/setsid".to_string(),
        "/bin/bash".to_string(),
        "-c".to_string(),
        format!(
            "trap \"/usr/bin/pkill -s 0\" EXIT\n/usr/bin/script -q -c \"{}\" /dev/null",
            command
        ),
    ]
}
