use common::{
    error::AppError,
    types::chunk::{Chunk, ChunkKind, Segmentation},
};

/// Smallest chunk size a caller may request.
pub const MIN_CHUNK_SIZE: usize = 50;
/// Largest chunk size; requests above this are clamped.
pub const MAX_CHUNK_SIZE: usize = 2_000;
/// Discourse-continuation packing may exceed the nominal size up to this.
const HARD_CAP_FACTOR: f64 = 1.2;
/// Inside forced splits, prefer the marker closest to this share of the max.
const FORCED_SPLIT_TARGET: f64 = 0.9;

/// Sentence terminators. The assessor uses the same set for its
/// completeness checks.
pub const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Words whose trailing period does not end a sentence. Tunable data; extend
/// per language as needed.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "vs.", "etc.", "e.g.", "i.e.",
    "fig.", "no.", "approx.", "т.е.", "др.", "гл.", "стр.",
];

/// First tokens that mark discourse continuation with the previous sentence.
const CONTINUATION_MARKERS: &[&str] = &[
    "however", "but", "and", "so", "also", "moreover", "therefore", "yet", "still", "besides",
    "furthermore", "nevertheless", "но", "однако", "и", "а", "поэтому", "также", "впрочем",
];

/// Pronouns and demonstratives that usually refer back to the previous
/// sentence.
const ANAPHORIC_TOKENS: &[&str] = &[
    "he", "she", "it", "they", "this", "that", "these", "those", "он", "она", "оно", "они",
    "это", "этот", "эта", "эти", "тот",
];

const CLAUSE_MARKERS: &[&str] = &[", ", "; ", ": ", " — ", " - "];

/// Split `text` at discourse/sentence/clause boundaries so every chunk fits
/// `max_chunk_size` characters (hard cap 1.2x for continuation packing,
/// unbounded only never). Chunk texts are exact slices of the source; the
/// whitespace between consecutive chunks is returned as declared separators.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Result<Segmentation, AppError> {
    if max_chunk_size < MIN_CHUNK_SIZE {
        return Err(AppError::InvalidRequest(format!(
            "chunk size {max_chunk_size} below minimum {MIN_CHUNK_SIZE}"
        )));
    }
    let max_chunk_size = max_chunk_size.min(MAX_CHUNK_SIZE);

    if text.is_empty() {
        return Ok(Segmentation::default());
    }

    let sentences = segment_sentences(text);
    let packed = pack_sentences(text, &sentences, max_chunk_size);

    let mut chunks = Vec::new();
    let mut separators = Vec::new();

    for group in &packed {
        let group_text = &text[group.start..group.end];
        let group_chars = group_text.chars().count();

        if !chunks.is_empty() {
            separators.push(text[group.gap_before.clone()].to_string());
        }

        let size_limit = if group.over_cap_allowed {
            hard_cap(max_chunk_size)
        } else {
            max_chunk_size
        };
        if group_chars <= size_limit {
            chunks.push(Chunk {
                index: 0,
                text: group_text.to_string(),
                byte_range: group.start..group.end,
                kind: group.kind,
            });
        } else {
            // A single sentence over the cap: force splits, contiguous with
            // empty separators between the pieces.
            let pieces = force_split(group_text, max_chunk_size);
            let mut offset = group.start;
            for (i, (piece_len, kind)) in pieces.iter().enumerate() {
                let piece = &text[offset..offset + piece_len];
                if i > 0 {
                    separators.push(String::new());
                }
                chunks.push(Chunk {
                    index: 0,
                    text: piece.to_string(),
                    byte_range: offset..offset + piece_len,
                    kind: *kind,
                });
                offset += piece_len;
            }
        }
    }

    // Whole text in one chunk reads as a paragraph, not a sentence run.
    if chunks.len() == 1 {
        chunks[0].kind = ChunkKind::Paragraph;
    }

    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = index;
    }

    Ok(Segmentation { chunks, separators })
}

const fn hard_cap(max_chunk_size: usize) -> usize {
    // 1.2x without floating point drift.
    max_chunk_size + max_chunk_size / 5
}

#[derive(Debug, Clone)]
struct Sentence {
    /// Byte range of the sentence text, terminator included.
    start: usize,
    end: usize,
    /// Byte range of the whitespace run before this sentence.
    gap_before: std::ops::Range<usize>,
    chars: usize,
}

/// Segment on `{. ! ?}` followed by whitespace or end-of-string, skipping the
/// bounded abbreviation list. Ranges cover the text contiguously: leading
/// whitespace joins the first sentence, trailing whitespace the last.
fn segment_sentences(text: &str) -> Vec<Sentence> {
    let bytes_len = text.len();
    let mut boundaries = Vec::new();

    let mut iter = text.char_indices().peekable();
    while let Some((pos, ch)) = iter.next() {
        if !TERMINATORS.contains(&ch) {
            continue;
        }
        let after = pos + ch.len_utf8();
        let next = iter.peek().map(|(_, c)| *c);
        let at_boundary = match next {
            None => true,
            Some(c) => c.is_whitespace(),
        };
        if !at_boundary {
            continue;
        }
        if ch == '.' && is_abbreviation(text, pos) {
            continue;
        }
        boundaries.push(after);
    }

    if boundaries.last() != Some(&bytes_len) {
        boundaries.push(bytes_len);
    }

    let mut sentences: Vec<Sentence> = Vec::with_capacity(boundaries.len());
    let mut cursor = 0usize;
    for boundary in boundaries {
        if boundary <= cursor {
            continue;
        }
        // Whitespace run after the previous terminator belongs to the gap.
        let rest = &text[cursor..boundary];
        let gap_len: usize = rest
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(char::len_utf8)
            .sum();
        let gap_before = cursor..cursor + gap_len;
        let start = if sentences.is_empty() { cursor } else { cursor + gap_len };
        let gap_before = if sentences.is_empty() { cursor..cursor } else { gap_before };
        if start >= boundary {
            // Nothing but whitespace remains: it belongs to the previous
            // sentence so the cover stays exact.
            match sentences.last_mut() {
                Some(last) => {
                    last.chars += text[last.end..boundary].chars().count();
                    last.end = boundary;
                }
                None => sentences.push(Sentence {
                    start: cursor,
                    end: boundary,
                    gap_before: cursor..cursor,
                    chars: text[cursor..boundary].chars().count(),
                }),
            }
            cursor = boundary;
            continue;
        }
        sentences.push(Sentence {
            start,
            end: boundary,
            gap_before,
            chars: text[start..boundary].chars().count(),
        });
        cursor = boundary;
    }

    sentences
}

fn is_abbreviation(text: &str, period_pos: usize) -> bool {
    let before = &text[..period_pos];
    let word_start = before
        .rfind(|c: char| c.is_whitespace())
        .map_or(0, |pos| pos + 1);
    let word = &text[word_start..=period_pos];
    let lowered = word.to_lowercase();
    ABBREVIATIONS.contains(&lowered.as_str())
}

fn first_token(text: &str) -> Option<String> {
    text.split_whitespace().next().map(|token| {
        token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    })
}

fn is_continuation(sentence_text: &str) -> bool {
    let Some(token) = first_token(sentence_text) else {
        return false;
    };
    CONTINUATION_MARKERS.contains(&token.as_str()) || ANAPHORIC_TOKENS.contains(&token.as_str())
}

#[derive(Debug)]
struct PackedGroup {
    start: usize,
    end: usize,
    gap_before: std::ops::Range<usize>,
    kind: ChunkKind,
    /// Set when discourse-continuation packing pushed the group past the
    /// nominal size; such groups stay whole up to the hard cap.
    over_cap_allowed: bool,
}

/// Greedy packing of sentences into chunks of at most `max_chunk_size`
/// characters, with discourse-continuation overflow up to the hard cap.
fn pack_sentences(text: &str, sentences: &[Sentence], max_chunk_size: usize) -> Vec<PackedGroup> {
    let mut groups: Vec<PackedGroup> = Vec::new();
    let mut current: Option<PackedGroup> = None;
    let mut current_chars = 0usize;

    for sentence in sentences {
        match current.as_mut() {
            None => {
                current_chars = sentence.chars;
                current = Some(PackedGroup {
                    start: sentence.start,
                    end: sentence.end,
                    gap_before: sentence.gap_before.clone(),
                    kind: ChunkKind::Sentence,
                    over_cap_allowed: false,
                });
            }
            Some(group) => {
                let gap_chars = text[sentence.gap_before.clone()].chars().count();
                let combined = current_chars + gap_chars + sentence.chars;

                let fits = combined <= max_chunk_size;
                let continuation_fits = combined <= hard_cap(max_chunk_size)
                    && is_continuation(&text[sentence.start..sentence.end]);

                if fits || continuation_fits {
                    group.end = sentence.end;
                    group.over_cap_allowed |= !fits;
                    current_chars = combined;
                } else {
                    groups.extend(current.take());
                    current_chars = sentence.chars;
                    current = Some(PackedGroup {
                        start: sentence.start,
                        end: sentence.end,
                        gap_before: sentence.gap_before.clone(),
                        kind: ChunkKind::Sentence,
                        over_cap_allowed: false,
                    });
                }
            }
        }
    }
    groups.extend(current);
    groups
}

/// Split an oversized sentence into pieces of at most `max_chunk_size`
/// characters. Returns byte lengths with the kind each piece carries: clause
/// splits read as `Clause`, word-boundary and hard cuts as `Forced`.
fn force_split(text: &str, max_chunk_size: usize) -> Vec<(usize, ChunkKind)> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    loop {
        let remaining_chars = remaining.chars().count();
        if remaining_chars <= max_chunk_size {
            pieces.push((remaining.len(), last_piece_kind(&pieces)));
            break;
        }

        // Byte offset of the character boundary at `max_chunk_size` chars.
        let limit_bytes = byte_at_char(remaining, max_chunk_size);

        match best_clause_split(remaining, limit_bytes, max_chunk_size) {
            Some(split) => {
                pieces.push((split, ChunkKind::Clause));
                remaining = &remaining[split..];
            }
            None => {
                let split = last_word_boundary(remaining, limit_bytes).unwrap_or(limit_bytes);
                pieces.push((split, ChunkKind::Forced));
                remaining = &remaining[split..];
            }
        }
    }

    pieces
}

/// The final piece of a forced split inherits the shape of the cut before it.
fn last_piece_kind(pieces: &[(usize, ChunkKind)]) -> ChunkKind {
    pieces.last().map_or(ChunkKind::Forced, |(_, kind)| *kind)
}

fn byte_at_char(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(pos, _)| pos)
}

/// Clause marker whose end sits within `limit_bytes`, preferring the one
/// closest to `0.9 · max_chunk_size` characters.
fn best_clause_split(text: &str, limit_bytes: usize, max_chunk_size: usize) -> Option<usize> {
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let target_bytes = byte_at_char(text, (max_chunk_size as f64 * FORCED_SPLIT_TARGET) as usize);

    let mut best: Option<(usize, usize)> = None;
    for marker in CLAUSE_MARKERS {
        let mut search_from = 0usize;
        while let Some(found) = text[search_from..limit_bytes].find(marker) {
            // Split after the marker itself, leaving its trailing space in
            // the left piece.
            let split = search_from + found + marker.len();
            if split > limit_bytes {
                break;
            }
            let distance = split.abs_diff(target_bytes);
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((split, distance));
            }
            search_from = split;
            if search_from >= limit_bytes {
                break;
            }
        }
    }
    best.map(|(split, _)| split)
}

fn last_word_boundary(text: &str, limit_bytes: usize) -> Option<usize> {
    let slice = &text[..limit_bytes];
    slice
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(pos, c)| pos + c.len_utf8())
        .filter(|split| *split > 0)
}
