//! DATA transparency (RFC 5321 §4.5.2)
//!
//! Stored content is always unescaped. A leading `.` is doubled when the
//! content goes out on the wire and undoubled when a line comes in.
//! Content is handled as bytes; nothing here assumes UTF-8.

/// Line that ends the DATA phase
pub const END_OF_DATA: &[u8] = b".";

/// Escape `content` for transmission and append the end-of-data line.
pub fn dot_stuff(content: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(content.len() + 8);

    for line in content.split_inclusive(|b| *b == b'\n') {
        if line.starts_with(b".") {
            wire.push(b'.');
        }
        wire.extend_from_slice(line);
    }

    if !wire.is_empty() && !wire.ends_with(b"\n") {
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(END_OF_DATA);
    wire.extend_from_slice(b"\r\n");
    wire
}

/// Undo the escaping of one received line (terminator already stripped).
pub fn unstuff_line(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}
