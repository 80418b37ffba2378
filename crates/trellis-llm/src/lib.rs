pub mod providers;
pub mod streaming;

use trellis_core::config::ModelConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;

/// Providers that speak the OpenAI chat-completions wire format.
const OPENAI_COMPATIBLE: &[&str] = &[
    "openai",
    "ollama",
    "groq",
    "openrouter",
    "together",
    "vllm",
    "lmstudio",
    "deepseek",
];

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    let provider = config.provider.to_lowercase();
    if OPENAI_COMPATIBLE.contains(&provider.as_str()) || config.base_url.is_some() {
        Ok(Box::new(OpenAiClient::new()))
    } else {
        Err(TrellisError::UnsupportedProvider(config.provider.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str, base_url: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model_id: "m".to_string(),
            api_key: None,
            base_url: base_url.map(String::from),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_known_providers() {
        assert!(create_client(&model("openai", None)).is_ok());
        assert!(create_client(&model("Ollama", None)).is_ok());
    }

    #[test]
    fn test_unknown_provider_with_base_url() {
        assert!(create_client(&model("custom", Some("http://localhost:8000/v1/chat/completions"))).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let err = create_client(&model("mystery", None)).err().unwrap();
        assert!(matches!(err, TrellisError::UnsupportedProvider(p) if p == "mystery"));
    }
}
