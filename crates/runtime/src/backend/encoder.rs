//! Tokenizers and the deterministic hashing encoder
//!
//! Tensor inference is opaque to the service; what the sandbox and the
//! built-in operations need is a stable tokenizer/model pair with BERT-like
//! shapes. Token ids either come from a real `vocab.txt` (WordPiece) or from
//! a SHA-256 of the word piece; hidden states and logits are derived from
//! SHA-256 digests so identical input always produces identical output.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use super::{Encoding, ForwardOutput, InferenceModel, Tokenizer};
use crate::types::BackendError;

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 100;
pub const CLS_ID: u32 = 101;
pub const SEP_ID: u32 = 102;
pub const DEFAULT_VOCAB_SIZE: usize = 30522;
pub const DEFAULT_HIDDEN_SIZE: usize = 32;

const FIRST_HASHED_ID: u32 = 1000;
const MAX_WORD_CHARS: usize = 100;

/// Lower-case, split on whitespace and isolate punctuation
fn basic_tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    for chunk in text.to_lowercase().split_whitespace() {
        let mut current = String::new();
        for c in chunk.chars() {
            if c.is_ascii_punctuation() || (!c.is_alphanumeric() && !c.is_whitespace()) {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                words.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

fn wrap_special(pieces: Vec<(String, u32)>, max_length: usize) -> Encoding {
    let budget = max_length.saturating_sub(2);
    let mut tokens = vec!["[CLS]".to_string()];
    let mut input_ids = vec![CLS_ID];
    for (piece, id) in pieces.into_iter().take(budget) {
        tokens.push(piece);
        input_ids.push(id);
    }
    tokens.push("[SEP]".to_string());
    input_ids.push(SEP_ID);
    let attention_mask = vec![1; input_ids.len()];
    Encoding {
        tokens,
        input_ids,
        attention_mask,
    }
}

/// Tokenizer that assigns ids by hashing each word
#[derive(Debug)]
pub struct HashingTokenizer {
    vocab_size: usize,
    seen: RwLock<HashMap<u32, String>>,
}

impl Default for HashingTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOCAB_SIZE)
    }
}

impl HashingTokenizer {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size: vocab_size.max(FIRST_HASHED_ID as usize + 1),
            seen: RwLock::new(HashMap::new()),
        }
    }

    fn id_for(&self, piece: &str) -> u32 {
        let digest = Sha256::digest(piece.as_bytes());
        let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let span = self.vocab_size as u32 - FIRST_HASHED_ID;
        let id = FIRST_HASHED_ID + raw % span;
        self.seen
            .write()
            .entry(id)
            .or_insert_with(|| piece.to_string());
        id
    }
}

impl Tokenizer for HashingTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        basic_tokenize(text)
    }

    fn encode(&self, text: &str, max_length: usize) -> Encoding {
        let pieces = basic_tokenize(text)
            .into_iter()
            .map(|piece| {
                let id = self.id_for(&piece);
                (piece, id)
            })
            .collect();
        wrap_special(pieces, max_length)
    }

    fn decode(&self, ids: &[u32]) -> String {
        let seen = self.seen.read();
        ids.iter()
            .filter(|id| !matches!(**id, PAD_ID | CLS_ID | SEP_ID))
            .map(|id| seen.get(id).map(String::as_str).unwrap_or("[UNK]"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Greedy longest-match-first WordPiece over a `vocab.txt`
#[derive(Debug)]
pub struct WordPieceTokenizer {
    vocab: HashMap<String, u32>,
    inverse: Vec<String>,
    unk_id: u32,
    pad_id: u32,
}

impl WordPieceTokenizer {
    pub fn from_vocab(words: Vec<String>) -> Self {
        let vocab: HashMap<String, u32> = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        let unk_id = vocab.get("[UNK]").copied().unwrap_or(UNK_ID);
        let pad_id = vocab.get("[PAD]").copied().unwrap_or(PAD_ID);
        Self {
            vocab,
            inverse: words,
            unk_id,
            pad_id,
        }
    }

    pub fn from_vocab_file(path: &Path) -> Result<Self, BackendError> {
        let content = std::fs::read_to_string(path)?;
        let words = content.lines().map(|l| l.trim_end().to_string()).collect();
        Ok(Self::from_vocab(words))
    }

    fn special_id(&self, token: &str, fallback: u32) -> u32 {
        self.vocab.get(token).copied().unwrap_or(fallback)
    }

    fn word_pieces(&self, word: &str) -> Vec<String> {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() > MAX_WORD_CHARS {
            return vec!["[UNK]".to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let mut end = chars.len();
            let mut found = None;
            while start < end {
                let mut candidate: String = chars[start..end].iter().collect();
                if start > 0 {
                    candidate = format!("##{}", candidate);
                }
                if self.vocab.contains_key(&candidate) {
                    found = Some(candidate);
                    break;
                }
                end -= 1;
            }
            match found {
                Some(piece) => {
                    pieces.push(piece);
                    start = end;
                }
                None => return vec!["[UNK]".to_string()],
            }
        }
        pieces
    }
}

impl Tokenizer for WordPieceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        basic_tokenize(text)
            .iter()
            .flat_map(|word| self.word_pieces(word))
            .collect()
    }

    fn encode(&self, text: &str, max_length: usize) -> Encoding {
        let pieces = self
            .tokenize(text)
            .into_iter()
            .map(|piece| {
                let id = self.vocab.get(&piece).copied().unwrap_or(self.unk_id);
                (piece, id)
            })
            .collect();
        let mut encoding = wrap_special(pieces, max_length);
        if let Some(first) = encoding.input_ids.first_mut() {
            *first = self.special_id("[CLS]", CLS_ID);
        }
        if let Some(last) = encoding.input_ids.last_mut() {
            *last = self.special_id("[SEP]", SEP_ID);
        }
        encoding
    }

    fn decode(&self, ids: &[u32]) -> String {
        let mut text = String::new();
        for id in ids {
            let piece = match self.inverse.get(*id as usize) {
                Some(piece) => piece.as_str(),
                None => "[UNK]",
            };
            if matches!(piece, "[CLS]" | "[SEP]" | "[PAD]") {
                continue;
            }
            match piece.strip_prefix("##") {
                Some(rest) => text.push_str(rest),
                None => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(piece);
                }
            }
        }
        text
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.inverse.len()
    }
}

/// Deterministic stand-in for a BERT encoder with a two-label head
#[derive(Debug)]
pub struct HashingEncoder {
    seed: String,
    hidden_size: usize,
    labels: Vec<String>,
}

impl HashingEncoder {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            hidden_size: DEFAULT_HIDDEN_SIZE,
            labels: vec!["NEGATIVE".to_string(), "POSITIVE".to_string()],
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size.max(1);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        if !labels.is_empty() {
            self.labels = labels;
        }
        self
    }

    fn token_vector(&self, id: u32, position: usize) -> Vec<f32> {
        let token = hash_vector(&format!("{}:token:{}", self.seed, id), self.hidden_size);
        let position = hash_vector(&format!("position:{}", position), self.hidden_size);
        token
            .iter()
            .zip(position.iter())
            .map(|(t, p)| t + 0.1 * p)
            .collect()
    }
}

impl InferenceModel for HashingEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn forward(&self, input_ids: &[u32], attention_mask: &[u32]) -> ForwardOutput {
        let last_hidden_state: Vec<Vec<f32>> = input_ids
            .iter()
            .enumerate()
            .map(|(position, id)| self.token_vector(*id, position))
            .collect();

        let mut pooled = vec![0.0f32; self.hidden_size];
        let mut count = 0.0f32;
        for (position, hidden) in last_hidden_state.iter().enumerate() {
            if attention_mask.get(position).copied().unwrap_or(1) == 0 {
                continue;
            }
            for (acc, h) in pooled.iter_mut().zip(hidden) {
                *acc += h;
            }
            count += 1.0;
        }
        if count > 0.0 {
            pooled.iter_mut().for_each(|v| *v /= count);
        }

        let scale = (self.hidden_size as f32).sqrt();
        let logits = (0..self.labels.len())
            .map(|label| {
                let weights = hash_vector(&format!("label:{}", label), self.hidden_size);
                weights.iter().zip(&pooled).map(|(w, p)| w * p).sum::<f32>() * 4.0 / scale
            })
            .collect();

        ForwardOutput {
            last_hidden_state,
            logits,
        }
    }
}

/// Expand a key into `dim` values in [-1, 1]
fn hash_vector(key: &str, dim: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(dim);
    let mut block = 0u32;
    while values.len() < dim {
        let digest = Sha256::digest(format!("{}#{}", key, block).as_bytes());
        values.extend(
            digest
                .iter()
                .take(dim - values.len())
                .map(|b| *b as f32 / 127.5 - 1.0),
        );
        block += 1;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenize_isolates_punctuation() {
        assert_eq!(
            basic_tokenize("Hello, World!  It's"),
            vec!["hello", ",", "world", "!", "it", "'", "s"]
        );
    }

    #[test]
    fn test_hashing_tokenizer_is_deterministic() {
        let tokenizer = HashingTokenizer::default();
        let a = tokenizer.encode("the quick fox", 512);
        let b = tokenizer.encode("THE quick fox", 512);
        assert_eq!(a.input_ids, b.input_ids);
        assert_eq!(a.input_ids.first(), Some(&CLS_ID));
        assert_eq!(a.input_ids.last(), Some(&SEP_ID));
        assert_eq!(a.len(), 5);
        assert!(a.input_ids[1..4]
            .iter()
            .all(|id| (*id as usize) < DEFAULT_VOCAB_SIZE && *id >= FIRST_HASHED_ID));
        assert_eq!(tokenizer.decode(&a.input_ids), "the quick fox");
    }

    #[test]
    fn test_encoding_truncates_and_pads() {
        let tokenizer = HashingTokenizer::default();
        let mut encoding = tokenizer.encode("a b c d e f", 4);
        assert_eq!(encoding.tokens, vec!["[CLS]", "a", "b", "[SEP]"]);
        encoding.pad_to(6, PAD_ID);
        assert_eq!(encoding.attention_mask, vec![1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_wordpiece_greedy_longest_match() {
        let vocab = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "un", "##aff", "##able", "play"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tokenizer = WordPieceTokenizer::from_vocab(vocab);
        assert_eq!(tokenizer.tokenize("unaffable play"), vec!["un", "##aff", "##able", "play"]);
        assert_eq!(tokenizer.tokenize("xyz"), vec!["[UNK]"]);

        let encoding = tokenizer.encode("unaffable", 16);
        assert_eq!(encoding.input_ids, vec![2, 4, 5, 6, 3]);
        assert_eq!(tokenizer.decode(&encoding.input_ids), "unaffable");
    }

    #[test]
    fn test_encoder_shapes_and_determinism() {
        let encoder = HashingEncoder::new("org/model");
        let out = encoder.forward(&[101, 2000, 102], &[1, 1, 1]);
        assert_eq!(out.last_hidden_state.len(), 3);
        assert_eq!(out.last_hidden_state[0].len(), DEFAULT_HIDDEN_SIZE);
        assert_eq!(out.logits.len(), 2);
        assert_eq!(out, encoder.forward(&[101, 2000, 102], &[1, 1, 1]));

        let other = HashingEncoder::new("org/other").forward(&[101, 2000, 102], &[1, 1, 1]);
        assert_ne!(out.logits, other.logits);
    }

    #[test]
    fn test_padding_does_not_change_logits() {
        let encoder = HashingEncoder::new("m");
        let plain = encoder.forward(&[101, 7, 102], &[1, 1, 1]);
        let padded = encoder.forward(&[101, 7, 102, 0, 0], &[1, 1, 1, 0, 0]);
        assert_eq!(plain.logits, padded.logits);
    }
}
