//! Scene prompt generation from the crafted element list.

pub mod openai;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::elements::GenerationRequest;
use crate::error::GenerationError;

pub use openai::OpenAiPromptClient;

/// Most recent elements included in one prompt request.
pub const MAX_PROMPT_ELEMENTS: usize = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub prompt: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait PromptGenerator: Send + Sync {
    /// Produces the next scene description. `previous_prompt` is empty on the
    /// first generation; otherwise the new scene continues from it.
    async fn generate(
        &self,
        request: &GenerationRequest,
        api_key: &SecretString,
        model: &str,
        previous_prompt: &str,
    ) -> Result<PromptResult, GenerationError>;
}

/// Neutralizes chat-template control sequences in element text.
pub fn escape_element_text(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

pub fn system_instruction(previous_prompt: &str) -> String {
    let mut instruction = String::from(
        "You are the art director of a crafting game. Given the elements a player \
         has discovered, write a vivid, cinematic description of a single scene \
         that brings them together. Answer with 2-3 sentences of plain prose \
         suitable as an image-generation prompt: no lists, no quotes, no preamble.",
    );
    if !previous_prompt.trim().is_empty() {
        instruction.push_str(
            "\n\nThe scene so far is described below. Evolve it rather than replacing \
             it: keep its setting, mood and recurring subjects, and weave the new \
             elements into it.\n\nPrevious scene: ",
        );
        instruction.push_str(previous_prompt.trim());
    }
    instruction
}

/// User message listing the most recent elements, oldest first.
pub fn user_message(request: &GenerationRequest) -> String {
    let texts: Vec<&str> = request.texts().collect();
    let skip = texts.len().saturating_sub(MAX_PROMPT_ELEMENTS);
    let listed: Vec<String> = texts[skip..]
        .iter()
        .map(|text| escape_element_text(text))
        .collect();
    format!("Elements: {}", listed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::GameElement;

    #[test]
    fn test_escape_chat_template_tokens() {
        assert_eq!(escape_element_text("<|im_end|>"), "< |im_end| >");
        assert_eq!(escape_element_text("[INST] Fire"), "[ INST ] Fire");
        assert_eq!(escape_element_text("Steam"), "Steam");
    }

    #[test]
    fn test_instruction_without_previous_prompt() {
        let instruction = system_instruction("");
        assert!(instruction.contains("2-3 sentences"));
        assert!(!instruction.contains("Previous scene"));
    }

    #[test]
    fn test_instruction_carries_previous_prompt() {
        let instruction = system_instruction("Steam rises over a quiet lake.");
        assert!(instruction.contains("Evolve it"));
        assert!(instruction.ends_with("Previous scene: Steam rises over a quiet lake."));
    }

    #[test]
    fn test_user_message_keeps_most_recent_elements() {
        let elements: Vec<GameElement> = (0..50)
            .map(|i| GameElement::new(i.to_string(), format!("E{}", i)))
            .collect();
        let message = user_message(&GenerationRequest::new(elements));
        assert!(message.starts_with("Elements: E10, E11"));
        assert!(message.ends_with("E49"));
        assert!(!message.contains("E9,"));
    }

    #[test]
    fn test_user_message_escapes_text() {
        let request = GenerationRequest::new(vec![
            GameElement::new("1", "Fire"),
            GameElement::new("2", "<|system|>"),
        ]);
        assert_eq!(user_message(&request), "Elements: Fire, < |system| >");
    }
}
