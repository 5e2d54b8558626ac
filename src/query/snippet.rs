//! Snippet extraction for search results: a bounded window around the first
//! matching term, trimmed to word breaks, HTML-escaped, with every term
//! occurrence wrapped in `<b>…</b>`.

use unicode_normalization::UnicodeNormalization;

pub const SNIPPET_LENGTH: usize = 120;

const WORD_BREAKS: &str = "\t\n\u{b}\u{c}\r !\"#$%&'()*/<=>?[\\]^`{|}~+,.:;@";

fn is_word_break(c: char) -> bool {
    WORD_BREAKS.contains(c)
}

/// Case folding under NFC, so composed and decomposed spellings of the same
/// text compare equal.
fn fold(s: &str) -> String {
    s.nfc().flat_map(|c| c.to_lowercase()).collect()
}

/// First case-folded occurrence of any term, as an offset into `chars`.
/// `chars` must already be NFC-normalised; folding can change lengths
/// (ß -> ss), so every folded byte is mapped back to the char it came from.
fn find_first_match(chars: &[char], terms: &[String]) -> Option<usize> {
    let mut folded = String::new();
    let mut origin = Vec::new();
    for (i, &c) in chars.iter().enumerate() {
        for lc in c.to_lowercase() {
            let start = folded.len();
            folded.push(lc);
            for _ in start..folded.len() {
                origin.push(i);
            }
        }
    }

    let mut best: Option<usize> = None;
    for term in terms {
        let needle = fold(term);
        if needle.is_empty() {
            continue;
        }
        if let Some(byte_pos) = folded.find(&needle) {
            let char_pos = origin[byte_pos];
            if best.is_none_or(|b| char_pos < b) {
                best = Some(char_pos);
            }
        }
    }
    best
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap each occurrence of each term in `<b>…</b>`, extending the match to
/// the following word break.
fn highlight_terms(text: &str, terms: &[String]) -> String {
    let mut current: Vec<char> = text.chars().collect();

    for term in terms {
        let needle = fold(term);
        if needle.is_empty() {
            continue;
        }
        let mut out = String::new();
        let mut rest = current;
        loop {
            match find_first_match(&rest, std::slice::from_ref(term)) {
                Some(pos) => {
                    out.extend(rest[..pos].iter());
                    // extend the highlighted run to the next word break
                    let mut end = pos;
                    while end < rest.len() && !is_word_break(rest[end]) {
                        end += 1;
                    }
                    if end == pos {
                        // zero-width run cannot happen for tokenized terms,
                        // but never loop on it
                        end = pos + 1;
                    }
                    out.push_str("<b>");
                    out.extend(rest[pos..end].iter());
                    out.push_str("</b>");
                    rest = rest[end..].to_vec();
                }
                None => {
                    out.extend(rest.iter());
                    break;
                }
            }
        }
        current = out.chars().collect();
    }

    current.into_iter().collect()
}

/// Extract a snippet of roughly `length` chars around the first term match.
/// The text is NFC-normalised first so decomposed spellings match composed
/// terms. Without a match, the leading portion of the text up to the first
/// newline is returned, escaped and highlighted all the same.
pub fn get_snippet(text: &str, terms: &[String], length: usize) -> String {
    let chars: Vec<char> = text.nfc().collect();

    if let Some(match_pos) = find_first_match(&chars, terms) {
        // walk back up to `length` chars or a newline
        let mut start = match_pos;
        let mut taken = 0;
        while start > 0 && taken < length {
            if chars[start - 1] == '\n' {
                break;
            }
            start -= 1;
            taken += 1;
        }
        // prefer starting on a word break
        if start > 0 && chars[start] != '\n' {
            let mut moved = 0;
            while start < match_pos && !is_word_break(chars[start]) && moved < length / 2 {
                start += 1;
                moved += 1;
            }
            if start < chars.len() && is_word_break(chars[start]) {
                start += 1;
            }
        }

        // walk forward up to `length` chars or a newline
        let mut end = match_pos;
        taken = 0;
        while end < chars.len() && taken < length {
            if chars[end] == '\n' {
                break;
            }
            end += 1;
            taken += 1;
        }
        // prefer ending on a word break
        if end < chars.len() && chars[end] != '\n' {
            let mut moved = 0;
            while end > match_pos && !is_word_break(chars[end - 1]) && moved < length / 2 {
                end -= 1;
                moved += 1;
            }
        }

        let window: String = chars[start..end].iter().collect();
        highlight_terms(&escape(&window), terms)
    } else {
        let mut end = 0;
        while end < chars.len() && end < length {
            if chars[end] == '\n' {
                break;
            }
            end += 1;
        }
        let window: String = chars[..end].iter().collect();
        highlight_terms(&escape(&window), terms)
    }
}
