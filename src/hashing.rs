//! Transcript and question-text hashing for cache keys.
//!
//! Cache correctness depends on the key being a pure function of the
//! normalized input: identical normalized text must always produce the same
//! key, across restarts and across platforms.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum number of characters considered after normalization. Transcripts
/// are long; the prefix is enough to discriminate between conversations.
const MAX_NORMALIZED_LEN: usize = 1000;

/// Separator between transcript turns when hashing a conversation.
/// A unit-separator control character will not occur in spoken content.
const TURN_SEPARATOR: char = '\u{1f}';

/// One turn of an interview transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: String,
    pub content: String,
}

/// Normalize text for hashing: lowercase, strip punctuation, collapse
/// whitespace runs to single spaces, trim, and truncate.
///
/// Superficially different but semantically identical inputs ("Hello,
/// world!" vs "hello world") map to the same normalized form.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_NORMALIZED_LEN));
    let mut len = 0usize;
    let mut pending_space = false;
    for ch in text.to_lowercase().chars() {
        if ch.is_whitespace() {
            pending_space = len > 0;
            continue;
        }
        if ch.is_ascii_punctuation() {
            continue;
        }
        if pending_space {
            if len + 1 >= MAX_NORMALIZED_LEN {
                break;
            }
            out.push(' ');
            len += 1;
            pending_space = false;
        }
        out.push(ch);
        len += 1;
        if len >= MAX_NORMALIZED_LEN {
            break;
        }
    }
    out
}

/// Hash normalized text into a stable hex cache key.
pub fn hash_text(text: &str) -> String {
    let normalized = normalize(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash an ordered conversation into a stable cache key.
///
/// Each turn contributes `role: content`; turns are joined with a separator
/// that cannot appear in content, so reordering turns changes the key.
pub fn hash_conversation(turns: &[TranscriptTurn]) -> String {
    let joined = turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join(&TURN_SEPARATOR.to_string());
    let mut hasher = Sha256::new();
    // Normalize per the same rules, but keep the separator so ordering and
    // turn boundaries stay significant.
    let mut normalized = String::new();
    for (i, part) in joined.split(TURN_SEPARATOR).enumerate() {
        if i > 0 {
            normalized.push(TURN_SEPARATOR);
        }
        normalized.push_str(&normalize(part));
    }
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> TranscriptTurn {
        TranscriptTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_punctuation() {
        assert_eq!(normalize("  Hello,   World!  "), "hello world");
        assert_eq!(normalize("tell\tme\nabout   yourself."), "tell me about yourself");
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t  "), "");
        assert_eq!(normalize("!!!...,,,"), "");
    }

    #[test]
    fn test_normalize_truncates() {
        let long = "a".repeat(5000);
        assert_eq!(normalize(&long).chars().count(), 1000);
    }

    #[test]
    fn test_hash_deterministic() {
        let a = hash_text("Tell me about a time you failed.");
        let b = hash_text("Tell me about a time you failed.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_insensitive_to_superficial_differences() {
        assert_eq!(
            hash_text("Tell me about yourself!"),
            hash_text("  tell   me about YOURSELF ")
        );
    }

    #[test]
    fn test_hash_distinguishes_content() {
        assert_ne!(hash_text("question one"), hash_text("question two"));
    }

    #[test]
    fn test_conversation_hash_deterministic() {
        let turns = vec![
            turn("interviewer", "Why do you want this role?"),
            turn("candidate", "I enjoy building reliable systems."),
        ];
        assert_eq!(hash_conversation(&turns), hash_conversation(&turns));
    }

    #[test]
    fn test_conversation_hash_order_sensitive() {
        let forward = vec![
            turn("interviewer", "Why do you want this role?"),
            turn("candidate", "I enjoy building reliable systems."),
        ];
        let reversed: Vec<_> = forward.iter().rev().cloned().collect();
        assert_ne!(hash_conversation(&forward), hash_conversation(&reversed));
    }

    #[test]
    fn test_conversation_hash_turn_boundaries_matter() {
        let split = vec![turn("a", "one"), turn("a", "two")];
        let merged = vec![turn("a", "one a two")];
        assert_ne!(hash_conversation(&split), hash_conversation(&merged));
    }

    #[test]
    fn test_conversation_hash_empty() {
        let empty: Vec<TranscriptTurn> = vec![];
        assert_eq!(hash_conversation(&empty), hash_conversation(&[]));
    }
}
