pub fn truncate_to_char_boundary(content: &str, max_len: usize) -> &str {
    if content.len() <= max_len {
        return content;
    }

    let cutoff = content
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(content.len()))
        .take_while(|&idx| idx <= max_len)
        .last()
        .unwrap_or(0);

    debug_assert!(content.is_char_boundary(cutoff));
    &content[..cutoff]
}

/// Collapse command output into one bounded line suitable for a notification.
///
/// Blank lines are dropped, the rest joined with a single space. When the
/// result exceeds `max_len` bytes it is cut on a char boundary and an ellipsis
/// is appended.
pub fn summarize(output: &str, max_len: usize) -> String {
    let joined = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.len() <= max_len {
        return joined;
    }
    let cut = truncate_to_char_boundary(&joined, max_len).trim_end();
    format!("{cut}…")
}
