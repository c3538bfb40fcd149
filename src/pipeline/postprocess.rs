//! Post-processing: turn a raw VLM reply into validated [`PageQueries`].
//!
//! The prompt asks for a bare JSON object, but models still wrap it in
//! ```` ```json ```` fences, prepend a sentence, sprinkle zero-width
//! characters or answer `"fr-FR"` instead of `"fr"`. These deterministic
//! rules absorb those quirks so a cosmetically-off reply does not cost a
//! retry. Anything still unusable becomes a [`CallError`] and is retried by
//! [`crate::pipeline::llm::request_queries`].
//!
//! ## Rule Order
//!
//! 1. Strip invisible Unicode (BOM, zero-width spaces)
//! 2. Strip outer code fences
//! 3. Cut the outermost `{ … }` object out of surrounding prose
//! 4. Deserialize and normalise each field

use crate::error::CallError;
use crate::record::PageQueries;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Field layout requested by [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
#[derive(Debug, Deserialize)]
struct RawQueries {
    main_query: String,
    secondary_query: String,
    visual_query: String,
    multimodal_query: String,
    #[serde(alias = "language_code", alias = "lang")]
    language: String,
}

/// Parse and validate the provider's reply for one page.
pub fn parse_queries(content: &str) -> Result<PageQueries, CallError> {
    let cleaned = remove_invisible_chars(content);
    if cleaned.trim().is_empty() {
        return Err(CallError::EmptyResponse);
    }

    let unfenced = strip_code_fences(&cleaned);
    let json = extract_json_object(&unfenced).ok_or_else(|| CallError::Malformed {
        detail: format!("no JSON object in reply: {}", preview(&unfenced)),
    })?;

    let raw: RawQueries = serde_json::from_str(json).map_err(|e| CallError::Malformed {
        detail: format!("{e}"),
    })?;

    normalise(raw)
}

fn normalise(raw: RawQueries) -> Result<PageQueries, CallError> {
    let queries = PageQueries {
        main_query: raw.main_query.trim().to_string(),
        secondary_query: raw.secondary_query.trim().to_string(),
        visual_query: raw.visual_query.trim().to_string(),
        multimodal_query: raw.multimodal_query.trim().to_string(),
        language: normalise_language(&raw.language).ok_or_else(|| CallError::Malformed {
            detail: format!("invalid language code {:?}", raw.language),
        })?,
    };

    if queries.variants().iter().any(|q| q.is_empty()) {
        return Err(CallError::EmptyResponse);
    }

    Ok(queries)
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .collect()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 3: Extract the outermost JSON object ────────────────────────────────

fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}

// ── Rule 4: Language code ────────────────────────────────────────────────────

static RE_LANGUAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}$").unwrap());

/// Lower-case, drop any region suffix (`pt-BR` → `pt`), require two letters.
fn normalise_language(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let primary = lowered.split(['-', '_']).next().unwrap_or_default();
    RE_LANGUAGE.is_match(primary).then(|| primary.to_string())
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(80).collect();
    if s.chars().count() > 80 {
        out.push('\u{2026}');
    }
    out
}
