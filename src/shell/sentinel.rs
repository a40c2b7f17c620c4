//! In-band markers the shell prints to drive the terminal

/// Printed by a one-shot command when it finishes
pub const CLOSE_SENTINEL: &str = "\x1b[CLOSE";

/// Printed by the `clear` alias installed by the startup script
pub const CLEAR_SENTINEL: &str = "ClEaRtHeScReEnNoW";

/// Removes the line just typed from the remote history
pub const ERASE_HISTORY: &str = "history -d $(history 1)";

/// Wrap `command` so the screen is cleared first and the close sentinel
/// is printed when it exits
pub fn one_shot(command: &str) -> String {
    format!("clear; {}; echo -e \"\\033[CLOSE\"", command)
}

/// Find `pattern` in `buffer`, where everything before `scanned_len` was
/// already searched. The search starts early enough to catch a match that
/// straddles the old end of the buffer.
pub fn find_from(buffer: &str, scanned_len: usize, pattern: &str) -> Option<usize> {
    let mut start = scanned_len
        .saturating_sub(pattern.len().saturating_sub(1))
        .min(buffer.len());
    while !buffer.is_char_boundary(start) {
        start -= 1;
    }
    buffer[start..].find(pattern).map(|i| start + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_wrapper() {
        assert_eq!(one_shot("git fetch"), "clear; git fetch; echo -e \"\\033[CLOSE\"");
    }

    #[test]
    fn test_find_across_boundary() {
        let buffer = format!("output\x1b[CL{}", "OSE");
        assert_eq!(find_from(&buffer, "output\x1b[CL".len(), CLOSE_SENTINEL), Some(6));
        assert_eq!(find_from("no marker here", 3, CLOSE_SENTINEL), None);
    }

    #[test]
    fn test_find_skips_scanned_prefix_on_char_boundary() {
        let buffer = format!("éééé{}", CLOSE_SENTINEL);
        assert_eq!(find_from(&buffer, 9, CLOSE_SENTINEL), Some(8));
    }
}
