//! Token counting for injection budgets.
//!
//! Budgets only need to be close to what the assistant's own tokenizer would
//! report, so the default implementation is a deterministic approximation of
//! cl100k_base: the same style of pre-tokenization split, with a per-piece
//! cost instead of a BPE merge table.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::OnceLock;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

lazy_static! {
    // cl100k-style pieces: contractions, letter runs with an optional leading
    // non-letter, 1-3 digit groups, punctuation runs, newline runs, spaces.
    static ref PIECE_RE: Regex = Regex::new(
        r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+"
    )
    .expect("valid tokenizer piece regex");
}

/// Average characters covered by one BPE token inside a single word piece.
const CHARS_PER_WORD_TOKEN: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenizer;

impl ApproxTokenizer {
    fn piece_cost(piece: &str) -> usize {
        let letters = piece.chars().filter(|c| c.is_alphabetic()).count();
        if letters > 0 {
            // a leading space or symbol rides along with the word
            return letters.div_ceil(CHARS_PER_WORD_TOKEN);
        }
        let symbols = piece
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_numeric())
            .count();
        if symbols > 0 {
            // "->", "::", "==" usually merge into one token
            symbols.div_ceil(2)
        } else {
            1
        }
    }
}

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        PIECE_RE
            .find_iter(text)
            .map(|m| Self::piece_cost(m.as_str()))
            .sum()
    }
}

static DEFAULT_TOKENIZER: OnceLock<Box<dyn Tokenizer>> = OnceLock::new();

/// Process-wide tokenizer, built on first use.
pub fn default_tokenizer() -> &'static dyn Tokenizer {
    DEFAULT_TOKENIZER
        .get_or_init(|| Box::new(ApproxTokenizer))
        .as_ref()
}

pub fn count_tokens(text: &str) -> usize {
    default_tokenizer().count_tokens(text)
}
