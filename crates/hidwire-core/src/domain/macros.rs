//! Macro buffer layout.
//!
//! The device stores macros as one flat byte buffer holding `count`
//! null-terminated sequences back to back.  Macro *n* is the bytes between
//! the *n*-th and *(n+1)*-th `0x00`.

/// Terminator after every macro in the buffer.
pub const MACRO_TERMINATOR: u8 = 0x00;

/// Splits `buffer` into exactly `count` macros.
///
/// Macros missing from the buffer (too few terminators) come back empty.
/// Anything after the `count`-th terminator is unused storage and ignored.
pub fn parse_macros(buffer: &[u8], count: usize) -> Vec<Vec<u8>> {
    let mut macros: Vec<Vec<u8>> = buffer
        .split(|b| *b == MACRO_TERMINATOR)
        .take(count)
        .map(<[u8]>::to_vec)
        .collect();
    macros.resize(count, Vec::new());
    macros
}

/// Joins macros into the buffer layout, terminating each with `0x00`.
///
/// Macro bodies must not contain `0x00`; any that do are cut at the first one.
pub fn serialize_macros<M: AsRef<[u8]>>(macros: &[M]) -> Vec<u8> {
    let mut buf = Vec::new();
    for m in macros {
        let body = m.as_ref();
        let end = body
            .iter()
            .position(|b| *b == MACRO_TERMINATOR)
            .unwrap_or(body.len());
        buf.extend_from_slice(&body[..end]);
        buf.push(MACRO_TERMINATOR);
    }
    buf
}
