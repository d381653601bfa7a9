//! String helpers for names, declarations and shell text.

/// Returns true if `name` is a valid pipeline or process name (`^[\w.-]+$`).
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Splits a comma separated declaration into trimmed, non-empty parts.
#[must_use]
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Formats a sorted list of indices compactly, e.g. `[0-3, 5, 7-8]`.
#[must_use]
pub fn brief_list(indices: &[usize]) -> String {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    format!("[{}]", parts.join(", "))
}

/// Quotes `text` for a POSIX shell.
#[must_use]
pub fn shell_quote(text: &str) -> String {
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@+%,".contains(c))
    {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Joins an argv vector into a shell command line.
#[must_use]
pub fn shell_join(args: &[String]) -> String {
    args.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}

/// Returns the interpreter named on a script's shebang line.
#[must_use]
pub fn get_shebang(script: &str) -> Option<String> {
    let first = script.lines().next()?.trim();
    let interpreter = first.strip_prefix("#!")?.trim();
    if interpreter.is_empty() {
        None
    } else {
        Some(interpreter.to_string())
    }
}
