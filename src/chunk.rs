//! Overlapping character-window text chunker.
//!
//! Splits document text into segments of at most `chunk_size` characters,
//! each starting with the last `overlap` characters of its predecessor.
//! Cut points prefer natural breaks — paragraph, then newline, then space —
//! searched backwards within the second half of the window, falling back to
//! a hard cut. Deterministic for identical input.
//!
//! Because the overlap is exact, stripping the first `overlap` characters of
//! every chunk after the first and concatenating reproduces the input.

/// Split `text` into overlapping chunks. `overlap` must be < `chunk_size`
/// (validated at configuration time).
///
/// Empty input yields no chunks; input of at most `chunk_size` characters
/// yields exactly one.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(chunk_size > 0);
    debug_assert!(overlap < chunk_size);

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let window_end = (start + chunk_size).min(chars.len());
        let cut = if window_end == chars.len() {
            window_end
        } else {
            pick_cut(&chars, start, window_end, overlap)
        };

        chunks.push(chars[start..cut].iter().collect());
        if cut == chars.len() {
            break;
        }
        start = cut - overlap;
    }

    chunks
}

/// Choose a cut point in `(floor, window_end]`, preferring a paragraph
/// break, then a newline, then a space. The search floor is the midpoint of
/// the window so chunks never shrink below half size; a cut that would not
/// advance past the overlap falls back to the hard window end.
fn pick_cut(chars: &[char], start: usize, window_end: usize, overlap: usize) -> usize {
    let floor = start + (window_end - start) / 2;

    let cut = find_break(chars, floor, window_end, |chars, i| {
        i >= 1 && chars[i] == '\n' && chars[i - 1] == '\n'
    })
    .or_else(|| find_break(chars, floor, window_end, |chars, i| chars[i] == '\n'))
    .or_else(|| find_break(chars, floor, window_end, |chars, i| chars[i] == ' '))
    .unwrap_or(window_end);

    if cut <= start + overlap {
        window_end
    } else {
        cut
    }
}

/// Backwards scan for the last position in `[floor, end)` matching `pred`;
/// the cut lands just after the matched character.
fn find_break(
    chars: &[char],
    floor: usize,
    end: usize,
    pred: impl Fn(&[char], usize) -> bool,
) -> Option<usize> {
    (floor..end).rev().find(|&i| pred(chars, i)).map(|i| i + 1)
}
