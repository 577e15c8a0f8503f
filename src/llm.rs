//! Correction provider: turns original text into corrected text.
//!
//! The trait is the seam between the review pipeline and whatever produces
//! corrections; the shipped implementation talks to an OpenAI-compatible
//! chat-completions endpoint with a write-through response cache in front.

use crate::cache::ResponseCache;
use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

/// Produces a corrected version of one unit of document text. Returning the
/// input unchanged means "no changes proposed".
pub trait CorrectionProvider {
    fn correct(&mut self, original: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct OpenAiClient {
    agent: ureq::Agent,
    model: String,
    base_url: String,
    api_key: Option<String>,
    context: Option<String>,
    cache: ResponseCache,
}

impl OpenAiClient {
    pub fn new(
        model: &str,
        base_url: &str,
        api_key: Option<String>,
        context: Option<String>,
        cache: ResponseCache,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(120))
            .build();
        Self {
            agent,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            context,
            cache,
        }
    }

    fn build_prompt(&self, text: &str) -> String {
        let mut prompt = String::from(
            "Review the following text for obvious grammatical errors and spelling mistakes. \
             If you find mistakes, return ONLY the corrected text. \
             If the text is already correct, return ONLY the original text unchanged.",
        );
        if let Some(context) = &self.context {
            prompt.push_str("\n\n");
            prompt.push_str(context);
        }
        prompt.push_str("\n\nText:\n\n");
        prompt.push_str(text);
        prompt
    }

    fn ask(&self, prompt: &str) -> Result<String> {
        if let Some(cached) = self.cache.get(&self.model, prompt) {
            debug!("cache hit for prompt ({} chars)", prompt.len());
            return Ok(cached);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.agent.post(&url);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        let response: ChatResponse = request
            .send_json(ureq::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .with_context(|| format!("request to {url} failed"))?
            .into_json()
            .context("malformed completion response")?;

        let Some(choice) = response.choices.into_iter().next() else {
            bail!("completion response has no choices");
        };
        let answer = choice.message.content.trim().to_string();
        self.cache.put(&self.model, prompt, &answer)?;
        Ok(answer)
    }
}

impl CorrectionProvider for OpenAiClient {
    fn correct(&mut self, original: &str) -> Result<String> {
        let prompt = self.build_prompt(original);
        self.ask(&prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_optional_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let client = OpenAiClient::new(
            "test-model",
            "http://localhost:11434/v1/",
            None,
            Some("The document is a lab report.".to_string()),
            cache,
        );
        let prompt = client.build_prompt("Teh cat.");
        assert!(prompt.contains("The document is a lab report."));
        assert!(prompt.ends_with("Text:\n\nTeh cat."));
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }
}
