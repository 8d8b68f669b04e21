//! Text chunking for length-limited synthesis endpoints.
//!
//! Splitting prefers sentence boundaries so each fetched piece sounds
//! natural on its own; only a sentence that alone exceeds the limit falls
//! back to word boundaries. A single word longer than the limit is emitted
//! whole — endpoints truncate, we do not.

/// Default per-request character limit of the translate-style endpoint.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 200;

/// Split `text` into ordered chunks of at most `max_chars` characters.
///
/// Deterministic and idempotent: chunking the space-joined output again
/// with the same limit reproduces the same boundaries. Never yields an
/// empty chunk; empty input yields no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > max_chars {
            flush(&mut chunks, &mut current, &mut current_len);
            for word in sentence.split_whitespace() {
                push_word(&mut chunks, &mut current, &mut current_len, word, max_chars);
            }
            continue;
        }

        if current_len == 0 {
            current.push_str(&sentence);
            current_len = sentence_len;
        } else if current_len + 1 + sentence_len <= max_chars {
            current.push(' ');
            current.push_str(&sentence);
            current_len += 1 + sentence_len;
        } else {
            flush(&mut chunks, &mut current, &mut current_len);
            current.push_str(&sentence);
            current_len = sentence_len;
        }
    }

    flush(&mut chunks, &mut current, &mut current_len);
    chunks
}

fn push_word(
    chunks: &mut Vec<String>,
    current: &mut String,
    current_len: &mut usize,
    word: &str,
    max_chars: usize,
) {
    let word_len = word.chars().count();

    if word_len >= max_chars {
        // Oversized word: appears whole in its own chunk.
        flush(chunks, current, current_len);
        chunks.push(word.to_string());
        return;
    }

    if *current_len == 0 {
        current.push_str(word);
        *current_len = word_len;
    } else if *current_len + 1 + word_len <= max_chars {
        current.push(' ');
        current.push_str(word);
        *current_len += 1 + word_len;
    } else {
        flush(chunks, current, current_len);
        current.push_str(word);
        *current_len = word_len;
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String, current_len: &mut usize) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
    *current_len = 0;
}

/// Split on sentence terminators (`.`, `!`, `?`) followed by whitespace.
/// Terminator runs ("...", "?!") stay with their sentence; the boundary
/// whitespace itself is dropped.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if matches!(next, '.' | '!' | '?') {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek().map_or(true, |next| next.is_whitespace()) {
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}
