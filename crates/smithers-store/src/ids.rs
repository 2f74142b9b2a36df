use rand::rngs::StdRng;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const ENTRY_ID_LEN: usize = 8;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

fn random_entry_id(rng: &mut StdRng) -> String {
    (0..ENTRY_ID_LEN)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}

/// Generates an 8-hex entry id, retrying on the rare collision within the
/// same session (invariant: entry_id is unique per session).
pub fn generate_unique_entry_id(conn: &Connection, rng: &mut StdRng, session_id: i64) -> Result<String> {
    loop {
        let candidate = random_entry_id(rng);
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE session_id = ?1 AND entry_id = ?2",
                params![session_id, candidate],
                |r| r.get(0),
            )
            .optional()?;
        if taken.is_none() {
            return Ok(candidate);
        }
    }
}
