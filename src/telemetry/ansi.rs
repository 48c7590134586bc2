use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// CSI sequences (`ESC [ params final`) and two-byte `ESC x` escapes.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:\[[0-?]*[ -/]*[@-~]|[@-Z\\-_])").expect("valid regex")
});

/// Removes terminal colour and cursor control sequences from a line.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1B') {
        return Cow::Borrowed(line);
    }
    ANSI_ESCAPE.replace_all(line, "")
}
