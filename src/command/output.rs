//! Sentinel scan of captured hub output
//!
//! Programs print one `COLOR: <value>` line with the sensor reading. All
//! other output is ignored here.

/// Prefix of the sensor-reading line in captured output
pub const COLOR_SENTINEL: &str = "COLOR:";

/// Extract the color value from captured program output.
///
/// The first line whose trimmed form starts with the sentinel wins; the
/// remainder is trimmed symmetrically, so both `COLOR: red` and `COLOR:blue`
/// parse. Returns `None` when no reading was printed, which is not an error.
pub fn scan_color(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix(COLOR_SENTINEL)
            .map(|value| value.trim().to_string())
    })
}
