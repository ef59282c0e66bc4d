//! # cloudcmd Output Sanitizing (`common::process::sanitize`)
//!
//! File: cli/src/common/process/sanitize.rs
//!
//! ## Overview
//!
//! Some CLI commands animate a spinner by printing a glyph, rubbing it out
//! with backspace (or delete) and printing the next one. A raw terminal renders
//! that fine; an append-only channel shows every frame. `sanitize` replays the
//! rub-outs over the raw byte buffer so only the final text remains.
//!
//! ## Rules
//!
//! - `0x08` (BS) and `0x7F` (DEL) each remove the previously emitted byte.
//! - The spinner's encoding artifact, lead byte `0xC2` followed by the
//!   continuation byte `0x88`, is dropped and removes the
//!   `ARTIFACT_RUBOUT` previously emitted bytes (the two-byte glyph it follows).
//! - Removal never goes past the start of the output.
//!
//! The function runs once, on the complete buffer, when the process closes. It
//! is deterministic and returns clean input unchanged.
//!
//! It works in two passes over the same rules. The first computes the length
//! of the result; the second writes into a buffer of exactly that length,
//! skipping writes past its end (those bytes are always rubbed out later).

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;
const ARTIFACT_LEAD: u8 = 0xC2;
const ARTIFACT_CONTINUATION: u8 = 0x88;
/// Bytes removed by one artifact sequence.
pub const ARTIFACT_RUBOUT: usize = 2;

enum Step {
    Emit(u8),
    Rubout(usize),
}

fn for_each_step(buffer: &[u8], mut apply: impl FnMut(Step)) {
    let mut i = 0;
    while i < buffer.len() {
        match buffer[i] {
            BACKSPACE | DELETE => apply(Step::Rubout(1)),
            ARTIFACT_LEAD if buffer.get(i + 1) == Some(&ARTIFACT_CONTINUATION) => {
                apply(Step::Rubout(ARTIFACT_RUBOUT));
                i += 1;
            }
            byte => apply(Step::Emit(byte)),
        }
        i += 1;
    }
}

/// Length of `sanitize(buffer)`, without building it.
pub fn sanitized_len(buffer: &[u8]) -> usize {
    let mut len = 0usize;
    for_each_step(buffer, |step| match step {
        Step::Emit(_) => len += 1,
        Step::Rubout(count) => len = len.saturating_sub(count),
    });
    len
}

/// Applies backspace/delete/artifact rub-outs to a raw output buffer.
pub fn sanitize(buffer: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; sanitized_len(buffer)];
    let mut cursor = 0usize;
    for_each_step(buffer, |step| match step {
        Step::Emit(byte) => {
            if let Some(slot) = out.get_mut(cursor) {
                *slot = byte;
            }
            cursor += 1;
        }
        Step::Rubout(count) => cursor = cursor.saturating_sub(count),
    });
    debug_assert_eq!(cursor, out.len());
    out
}

/// Sanitizes and decodes, replacing invalid UTF-8 with U+FFFD.
pub fn sanitize_to_string(buffer: &[u8]) -> String {
    String::from_utf8_lossy(&sanitize(buffer)).into_owned()
}
