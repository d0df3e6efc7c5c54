use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single-shot prompt templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Templates for the auxiliary model calls. `{name}` tokens are filled in
/// before the call; unknown tokens are left alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSettings {
    /// Tokens: `{locale}`, `{content}`.
    #[serde(default = "d_title")]
    pub title: String,
    /// Tokens: `{locale}`, `{content}`.
    #[serde(default = "d_suggestion")]
    pub suggestion: String,
    /// Tokens: `{source_text}`, `{target_lang}`.
    #[serde(default = "d_translation")]
    pub translation: String,
    /// Sent alongside each image. No tokens.
    #[serde(default = "d_ocr")]
    pub ocr: String,
    /// Tokens: `{content}`, `{target_tokens}`, `{additional_context}`.
    #[serde(default = "d_compression")]
    pub compression: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            title: d_title(),
            suggestion: d_suggestion(),
            translation: d_translation(),
            ocr: d_ocr(),
            compression: d_compression(),
        }
    }
}

fn d_title() -> String {
    "Summarize the conversation below as a short title (at most 10 words) in {locale}. \
     Reply with the title only, without quotes or punctuation at the end.\n\n\
     <conversation>\n{content}\n</conversation>"
        .into()
}

fn d_suggestion() -> String {
    "Based on the conversation below, suggest 3 to 5 short follow-up messages the user \
     might send next, in {locale}. Put each suggestion on its own line with no numbering.\n\n\
     <conversation>\n{content}\n</conversation>"
        .into()
}

fn d_translation() -> String {
    "Translate the text below into {target_lang}. Keep formatting and reply with the \
     translation only.\n\n<source>\n{source_text}\n</source>"
        .into()
}

fn d_ocr() -> String {
    "Describe this image in detail. Transcribe any text it contains verbatim.".into()
}

fn d_compression() -> String {
    "Summarize the conversation below so it can replace the full history. Preserve goals, \
     decisions, open questions and facts about the user. Stay within about {target_tokens} \
     tokens.\n{additional_context}\n\n<conversation>\n{content}\n</conversation>"
        .into()
}
