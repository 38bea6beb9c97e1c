use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    Missing(&'static str),

    #[error("invalid value `{value}` for `{key}`")]
    Invalid { key: &'static str, value: String },
}

/// Generation budget sent with every text-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub return_full_text: bool,
}

/// Settings read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_token: String,
    pub inference_endpoint: String,
    pub image_api_url: String,
    pub image_model: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub min_prompt_length: usize,
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub end_of_turn_marker: String,
    pub static_dir: PathBuf,
    pub docs_path: Option<PathBuf>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_token = get("HF_API_TOKEN").ok_or(ConfigError::Missing("HF_API_TOKEN"))?;

        Ok(Self {
            api_token,
            inference_endpoint: get("HF_INFERENCE_ENDPOINT_URL").unwrap_or_else(|| {
                "https://api-inference.huggingface.co/models/HuggingFaceH4/zephyr-7b-beta"
                    .to_string()
            }),
            image_api_url: get("HF_IMAGE_API_URL")
                .unwrap_or_else(|| "https://api-inference.huggingface.co/models".to_string()),
            image_model: get("IMAGE_MODEL")
                .unwrap_or_else(|| "stabilityai/stable-diffusion-xl-base-1.0".to_string()),
            port: parse_or("PORT", get("PORT"), 7860)?,
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                15 * 60,
            )?),
            min_prompt_length: parse_or("MIN_PROMPT_LENGTH", get("MIN_PROMPT_LENGTH"), 16)?,
            max_new_tokens: parse_or("MAX_NEW_TOKENS", get("MAX_NEW_TOKENS"), 1150)?,
            do_sample: parse_or("DO_SAMPLE", get("DO_SAMPLE"), true)?,
            end_of_turn_marker: get("END_OF_TURN_MARKER").unwrap_or_else(|| "<|end|>".to_string()),
            static_dir: get("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            docs_path: get("DOCS_PATH").map(PathBuf::from),
        })
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            do_sample: self.do_sample,
            return_full_text: false,
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = GatewayConfig::from_lookup(lookup(&[("HF_API_TOKEN", "hf_x")])).unwrap();
        assert_eq!(config.api_token, "hf_x");
        assert_eq!(config.port, 7860);
        assert_eq!(config.min_prompt_length, 16);
        assert_eq!(config.request_timeout, Duration::from_secs(900));
        assert!(config.do_sample);
        assert!(config.docs_path.is_none());
    }

    #[test]
    fn token_is_required() {
        let err = GatewayConfig::from_lookup(lookup(&[("PORT", "8080")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("HF_API_TOKEN"));

        let err = GatewayConfig::from_lookup(lookup(&[("HF_API_TOKEN", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("HF_API_TOKEN"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("HF_API_TOKEN", "hf_x"),
            ("PORT", "3000"),
            ("REQUEST_TIMEOUT_SECS", "180"),
            ("MAX_NEW_TOKENS", "4096"),
            ("DO_SAMPLE", "false"),
            ("END_OF_TURN_MARKER", "</s>"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.request_timeout, Duration::from_secs(180));
        assert_eq!(
            config.generation_params(),
            GenerationParams {
                max_new_tokens: 4096,
                do_sample: false,
                return_full_text: false,
            }
        );
        assert_eq!(config.end_of_turn_marker, "</s>");
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("HF_API_TOKEN", "hf_x"), ("PORT", "eighty")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }
}
