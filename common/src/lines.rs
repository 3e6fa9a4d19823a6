use log::debug;

/// Splits raw file bytes into text lines. A trailing `\r` is dropped and a
/// final newline does not produce an empty line. Lines that are not valid
/// UTF-8 are skipped.
pub fn text_lines(bytes: &[u8]) -> impl Iterator<Item = &str> {
    let empty = bytes.is_empty();
    let mut lines = bytes
        .strip_suffix(b"\n")
        .unwrap_or(bytes)
        .split(|&b| b == b'\n');
    if empty {
        lines.next();
    }
    lines.enumerate().filter_map(|(index, line)| {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match std::str::from_utf8(line) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("skipping line {}: {}", index + 1, e);
                None
            }
        }
    })
}
