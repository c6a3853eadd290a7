//! Chat and Q&A message validation: length, per-user throttle, and a global
//! duplicate-storm detector.
//!
//! Rejections carry the user-visible reason. When the hot store is
//! unreachable only the length check applies; a cache outage must not mute
//! the audience.

use sha2::{Digest, Sha256};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use tribuna_model::{EventId, UserId};

use crate::error::{CoreError, Result};
use crate::hot::{HotStore, keys};

pub const MESSAGE_MAX_LENGTH: usize = 200;
pub const THROTTLE_WINDOW_SECS: u64 = 3;
pub const DUPLICATE_WINDOW_SECS: u64 = 20;
pub const DUPLICATE_THRESHOLD: i64 = 500;

/// Throttle and duplicate counters for chat and Q&A live in separate key
/// namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Qa,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Qa => "qa",
        }
    }
}

/// Comparison form: lower-cased, diacritics stripped, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    // NFD splits accented characters into base + combining mark; keeping
    // only ASCII then drops the marks (and any other non-ASCII).
    let stripped: String = lowered.nfd().filter(char::is_ascii).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint of the normalized text, used as the duplicate-counter key.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Clone, Debug)]
pub struct MessageValidator {
    hot: HotStore,
    max_length: usize,
    throttle_secs: u64,
    duplicate_window_secs: u64,
    duplicate_threshold: i64,
}

impl MessageValidator {
    pub fn new(hot: HotStore) -> Self {
        Self {
            hot,
            max_length: MESSAGE_MAX_LENGTH,
            throttle_secs: THROTTLE_WINDOW_SECS,
            duplicate_window_secs: DUPLICATE_WINDOW_SECS,
            duplicate_threshold: DUPLICATE_THRESHOLD,
        }
    }

    fn length_ok(&self, text: &str) -> bool {
        text.chars().count() <= self.max_length
    }

    /// Run all checks in order. `Ok(())` means accepted;
    /// [`CoreError::Validation`] carries the reason shown to the sender.
    pub async fn validate(
        &self,
        event_id: EventId,
        user_id: UserId,
        text: &str,
        kind: MessageKind,
    ) -> Result<()> {
        if !self.length_ok(text) {
            return Err(CoreError::Validation(format!(
                "Mensaje demasiado largo (máximo {} caracteres).",
                self.max_length
            )));
        }

        // 1 message per user per window.
        let throttle_key = keys::throttle(kind.as_str(), event_id, user_id);
        match self.hot.set_nx_ex(&throttle_key, self.throttle_secs).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(CoreError::Validation(format!(
                    "Espera {} segundos para enviar otro mensaje.",
                    self.throttle_secs
                )));
            }
            Err(err) => {
                warn!(error = %err, "throttle check degraded; hot store unreachable");
                return Ok(());
            }
        }

        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Ok(());
        }

        let duplicate_key = keys::duplicate(kind.as_str(), event_id, &fingerprint(text));
        match self
            .hot
            .bump_counter(&duplicate_key, self.duplicate_window_secs)
            .await
        {
            Ok(count) if count > self.duplicate_threshold => Err(CoreError::Validation(
                "Se detectó spam masivo, por favor reformula tu mensaje.".to_string(),
            )),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "duplicate check degraded; hot store unreachable");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_accents_and_collapses_whitespace() {
        assert_eq!(normalize_text("  Árbol   GRANDE  "), "arbol grande");
        assert_eq!(normalize_text("¿Por qué?"), "por que?");
    }

    #[test]
    fn diacritic_variants_share_a_fingerprint() {
        assert_eq!(fingerprint("canción  bonita"), fingerprint("CANCION BONITA"));
        assert_ne!(fingerprint("hola"), fingerprint("adios"));
    }

    #[test]
    fn length_boundary_is_inclusive() {
        // The boundary counts characters, not bytes.
        let at_limit: String = "ñ".repeat(MESSAGE_MAX_LENGTH);
        let over_limit: String = "ñ".repeat(MESSAGE_MAX_LENGTH + 1);
        assert!(at_limit.chars().count() == 200);

        let check = |text: &str| text.chars().count() <= MESSAGE_MAX_LENGTH;
        assert!(check(&at_limit));
        assert!(!check(&over_limit));
    }
}
