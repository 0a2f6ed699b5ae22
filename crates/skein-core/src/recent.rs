/// Appends a line to a bounded history buffer, evicting the oldest entries
/// once the buffer exceeds `cap`.
pub fn push_recent_line(lines: &mut Vec<String>, line: String, cap: usize) {
    lines.push(line);
    while lines.len() > cap {
        lines.remove(0);
    }
}
