//! ANSI escape sequence stripping.
//!
//! Buffered lines are stored as plain text, so both the wrapper (before the
//! local mirror) and the daemon (on ingest) strip escapes; neither side
//! trusts the other to have done it. Recognizes CSI (`ESC [ … final byte`),
//! OSC terminated by BEL or `ESC \`, and single-byte `ESC x` sequences.

const ESC: char = '\u{1b}';
const BEL: char = '\u{07}';

#[derive(Clone, Copy, PartialEq)]
enum State {
    Plain,
    Escape,
    Csi,
    Osc,
    OscEscape,
}

/// Remove ANSI escape sequences, returning the plain text.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut state = State::Plain;

    for ch in input.chars() {
        state = match state {
            State::Plain => {
                if ch == ESC {
                    State::Escape
                } else {
                    out.push(ch);
                    State::Plain
                }
            }
            State::Escape => match ch {
                '[' => State::Csi,
                ']' => State::Osc,
                // Any other byte forms a two-character sequence (ESC c,
                // ESC 7, ESC \ ...) that is dropped whole.
                _ => State::Plain,
            },
            State::Csi => {
                // Parameter and intermediate bytes are 0x20..=0x3f; the
                // first byte outside that range terminates the sequence.
                if ('\u{20}'..='\u{3f}').contains(&ch) {
                    State::Csi
                } else {
                    State::Plain
                }
            }
            State::Osc => match ch {
                BEL => State::Plain,
                ESC => State::OscEscape,
                _ => State::Osc,
            },
            State::OscEscape => {
                if ch == '\\' {
                    State::Plain
                } else {
                    State::Osc
                }
            }
        };
    }

    out
}
