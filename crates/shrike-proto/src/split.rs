//! Byte-budget string splitting for outbound messages.
//!
//! IRC lines are limited to 512 bytes, so long message texts must be split
//! before sending. Splitting is byte-based (the wire limit is bytes, not
//! characters) but never cuts a UTF-8 sequence in half, and in
//! word-preserving mode backs up to the previous whitespace run so words
//! stay intact, consuming one separating space between pieces.

use thiserror::Error;

/// Error returned for an unusable byte budget.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SplitError {
    /// The byte budget was zero.
    #[error("byte budget must be positive")]
    ZeroBudget,
}

/// Split a string into pieces of at most `bytelen` UTF-8 bytes each.
///
/// With `nobreak` set, pieces end at whitespace where possible and one
/// separating space character is dropped between pieces.
///
/// ```
/// use shrike_proto::split::split_string;
///
/// let pieces = split_string("This is a test§§§§", 8, true).unwrap();
/// assert_eq!(pieces, vec!["This is", "a", "test§§", "§§"]);
///
/// let pieces = split_string("This is a test§§§§", 8, false).unwrap();
/// assert_eq!(pieces, vec!["This is ", "a test§", "§§§"]);
/// ```
pub fn split_string(string: &str, bytelen: usize, nobreak: bool) -> Result<Vec<String>, SplitError> {
    if bytelen == 0 {
        return Err(SplitError::ZeroBudget);
    }

    let mut result = Vec::new();
    let mut rest = string;
    while result.is_empty() || !rest.is_empty() {
        let (piece, remainder) = if nobreak {
            split_nobreak(rest, bytelen)
        } else {
            split_once(rest, bytelen)
        };
        result.push(piece.to_owned());
        rest = remainder;
    }
    Ok(result)
}

/// Largest prefix of `s` whose UTF-8 encoding fits in `bytelen` bytes.
///
/// If the byte boundary falls inside a multi-byte character, the cut point
/// retreats to the last complete character. A budget smaller than the first
/// character still consumes that character, so the caller always progresses.
fn split_once(s: &str, bytelen: usize) -> (&str, &str) {
    if s.len() <= bytelen {
        return (s, "");
    }

    let mut cut = 0;
    for (i, c) in s.char_indices() {
        let end = i + c.len_utf8();
        if end > bytelen {
            break;
        }
        cut = end;
    }
    if cut == 0 {
        // First character alone exceeds the budget; take it anyway.
        cut = s.chars().next().map_or(0, char::len_utf8);
    }
    (&s[..cut], &s[cut..])
}

/// Like [`split_once`], but avoids breaking inside a run of non-whitespace
/// unless the whole piece would be given up. Removes one separating space
/// between the two sides when present.
fn split_nobreak(s: &str, bytelen: usize) -> (&str, &str) {
    let (mut split, mut rest) = split_once(s, bytelen);
    if rest.is_empty() {
        return (split, rest);
    }

    let split_ends_ws = split.chars().next_back().is_some_and(char::is_whitespace);
    let rest_starts_ws = rest.chars().next().is_some_and(char::is_whitespace);
    if !split_ends_ws && !rest_starts_ws {
        let space = split
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i);
        // Retreating to position 0 would yield an empty piece; keep the
        // mid-word cut in that case.
        if let Some(i) = space.filter(|&i| i > 0) {
            split = &s[..i];
            rest = &s[i..];
        }
    }

    if let Some(stripped) = rest.strip_prefix(' ') {
        rest = stripped;
    } else if let Some(stripped) = split.strip_suffix(' ') {
        split = stripped;
    }
    (split, rest)
}
