//! Text tokenizer producing word-score maps for the inverted index.

use std::collections::HashMap;

/// token -> accumulated score.
pub type WordMap = HashMap<String, i32>;

#[derive(Debug, Clone, Copy)]
pub struct WordParseConfig {
    pub max_word_length: usize,
    pub min_word_length: usize,
    pub max_words_to_index: usize,
}

impl Default for WordParseConfig {
    fn default() -> Self {
        WordParseConfig {
            max_word_length: 30,
            min_word_length: 3,
            max_words_to_index: 10000,
        }
    }
}

fn split_camel(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && chars[i - 1].is_lowercase() && c.is_uppercase() && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn tokens(text: &str, delimit: bool) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        if delimit {
            out.extend(split_camel(raw));
        } else {
            out.push(raw.to_string());
        }
    }
    out
}

fn accepted(word: &str, cfg: &WordParseConfig, filter: bool) -> bool {
    let len = word.chars().count();
    if len < cfg.min_word_length || len > cfg.max_word_length {
        return false;
    }
    if filter && !word.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    true
}

/// Add `weight` per occurrence of each accepted token in `text` to `map`.
/// Parsing stops once `max_words_to_index` tokens have been taken.
pub fn parse_text(
    map: &mut WordMap,
    text: &str,
    weight: i32,
    cfg: &WordParseConfig,
    filter: bool,
    delimit: bool,
) {
    if weight == 0 {
        return;
    }
    let mut taken = 0usize;
    for token in tokens(text, delimit) {
        if taken >= cfg.max_words_to_index {
            break;
        }
        if !accepted(&token, cfg, filter) {
            continue;
        }
        let word: String = token.chars().flat_map(|c| c.to_lowercase()).collect();
        *map.entry(word).or_insert(0) += weight;
        taken += 1;
    }
}

/// Tokenize a query string into unique lowercase terms, in order.
pub fn parse_text_into_array(text: &str, cfg: &WordParseConfig) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens(text, false) {
        if !accepted(&token, cfg, false) {
            continue;
        }
        let word: String = token.chars().flat_map(|c| c.to_lowercase()).collect();
        if !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WordParseConfig {
        WordParseConfig::default()
    }

    #[test]
    fn scores_accumulate_per_occurrence() {
        let mut map = WordMap::new();
        parse_text(&mut map, "hello world hello", 1, &cfg(), true, false);
        assert_eq!(map.get("hello"), Some(&2));
        assert_eq!(map.get("world"), Some(&1));
    }

    #[test]
    fn word_length_bounds_drop_tokens() {
        let mut map = WordMap::new();
        let long = "x".repeat(31);
        parse_text(&mut map, &format!("ab {long} fine"), 1, &cfg(), false, false);
        assert!(!map.contains_key("ab"));
        assert!(!map.contains_key(long.as_str()));
        assert_eq!(map.get("fine"), Some(&1));
    }

    #[test]
    fn filter_drops_pure_numbers() {
        let mut map = WordMap::new();
        parse_text(&mut map, "12345 route66", 1, &cfg(), true, false);
        assert!(!map.contains_key("12345"));
        assert_eq!(map.get("route66"), Some(&1));
    }

    #[test]
    fn weight_multiplies_and_zero_is_noop() {
        let mut map = WordMap::new();
        parse_text(&mut map, "subject", 30, &cfg(), false, false);
        assert_eq!(map.get("subject"), Some(&30));
        parse_text(&mut map, "ignored", 0, &cfg(), false, false);
        assert!(!map.contains_key("ignored"));
    }

    #[test]
    fn delimited_fields_split_camel_case() {
        let mut map = WordMap::new();
        parse_text(&mut map, "TrawlerIndexService", 1, &cfg(), false, true);
        assert_eq!(map.get("trawler"), Some(&1));
        assert_eq!(map.get("index"), Some(&1));
        assert_eq!(map.get("service"), Some(&1));
    }

    #[test]
    fn query_terms_are_unique_in_order() {
        let terms = parse_text_into_array("Brown fox BROWN dog", &cfg());
        assert_eq!(terms, vec!["brown", "fox", "dog"]);
    }

    #[test]
    fn max_words_caps_parsing() {
        let small = WordParseConfig {
            max_words_to_index: 2,
            ..cfg()
        };
        let mut map = WordMap::new();
        parse_text(&mut map, "one two three four", 1, &small, false, false);
        assert_eq!(map.len(), 2);
    }
}
