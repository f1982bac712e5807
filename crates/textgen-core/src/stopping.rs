/// Cuts `reply` at the first stop string it contains.
///
/// Returns the trimmed text and whether a stop string was found. When none
/// occurs in full, a tail that spells the beginning of a stop string (for
/// example `"\nYo"` before `"\nYou:"`) is removed so it is never shown, but
/// generation is not considered stopped. Empty stop strings are ignored.
pub fn apply_stopping_strings<'a, S: AsRef<str>>(reply: &'a str, stop_strings: &[S]) -> (&'a str, bool) {
    let earliest = stop_strings
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty())
        .filter_map(|s| reply.find(s))
        .min();
    if let Some(idx) = earliest {
        return (&reply[..idx], true);
    }

    for stop in stop_strings.iter().map(AsRef::as_ref).filter(|s| !s.is_empty()) {
        if let Some(len) = partial_tail_len(reply, stop) {
            return (&reply[..reply.len() - len], false);
        }
    }
    (reply, false)
}

/// Byte length of the longest proper prefix of `stop` that `reply` ends with.
fn partial_tail_len(reply: &str, stop: &str) -> Option<usize> {
    (1..stop.len())
        .rev()
        .filter(|&j| stop.is_char_boundary(j))
        .find(|&j| reply.ends_with(&stop[..j]))
}
