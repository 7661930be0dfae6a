//! Command line framing.
//!
//! Commands are `\n` terminated (a trailing `\r` is tolerated). Peers that
//! predate the terminator write one bare command per send and wait for the
//! reply; the runtime hands such a fragment to [`take_fragment`] once the
//! socket has gone idle with nothing after it.

use bytes::BytesMut;

/// Remove and return the next complete line, without its terminator.
pub fn next_line(buf: &mut BytesMut) -> Option<String> {
    let end = buf.iter().position(|byte| *byte == b'\n')?;
    let line = buf.split_to(end + 1);
    Some(decode(&line[..end]))
}

/// Remove whatever is buffered as one unterminated command.
///
/// Returns `None` when nothing but whitespace was buffered.
pub fn take_fragment(buf: &mut BytesMut) -> Option<String> {
    let fragment = buf.split();
    let line = decode(&fragment);
    (!line.trim().is_empty()).then_some(line)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches(['\r', '\0']).to_string()
}
