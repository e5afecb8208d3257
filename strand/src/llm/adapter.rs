//! Provider adapters: request formatting and response extraction per model
//! family.
//!
//! The wire format is OpenAI-compatible chat completions for every family;
//! families differ in how reasoning is wrapped in the returned content.
//! DeepSeek-R1 and Qwen emit `<think>…</think>` blocks; GPT-OSS uses harmony
//! channel markers. Adapters hide the chain-of-thought by default, exposing
//! it as `LlmReply::thinking`.

use serde_json::{json, Value};

use super::{ChatMessage, ChatOptions, LlmError, LlmReply, LlmUsage};

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Generic OpenAI-compatible server (vLLM, llama.cpp, etc.).
    OpenAiCompatible,
    DeepSeekR1,
    Qwen,
    GptOss,
}

impl ModelFamily {
    /// Detects the family from a model name.
    pub fn from_model_name(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("deepseek-r1") || lower.contains("deepseek_r1") {
            ModelFamily::DeepSeekR1
        } else if lower.contains("qwen") {
            ModelFamily::Qwen
        } else if lower.contains("gpt-oss") || lower.contains("gpt_oss") {
            ModelFamily::GptOss
        } else {
            ModelFamily::OpenAiCompatible
        }
    }

    /// Builds the `POST /chat/completions` body.
    ///
    /// `tools` is included verbatim when non-empty so providers that support
    /// function calling can return `tool_calls`.
    pub fn request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        tools: &[Value],
    ) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(ref stop) = options.stop {
            body["stop"] = json!(stop);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Extracts the normalized reply from a chat-completion response body.
    ///
    /// Empty content after stripping wrappers is reported as `Transient` so
    /// the failover loop retries it.
    pub fn extract(&self, body: &Value) -> Result<LlmReply, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::Transient("response has no choices".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::Transient("choice has no message".to_string()))?;
        let raw_content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let tool_calls = message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        // Some servers surface reasoning in a sibling field.
        let side_thinking = message
            .get("reasoning_content")
            .and_then(|r| r.as_str())
            .map(str::to_string);

        let (content, extracted_thinking) = match self {
            ModelFamily::OpenAiCompatible => (raw_content, None),
            ModelFamily::DeepSeekR1 | ModelFamily::Qwen => split_think_block(&raw_content),
            ModelFamily::GptOss => split_harmony(&raw_content),
        };
        let thinking = extracted_thinking.or(side_thinking);

        if content.trim().is_empty() && tool_calls.is_empty() {
            return Err(LlmError::Transient("empty response content".to_string()));
        }

        let usage = body.get("usage").map(|u| LlmUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(str::to_string);

        Ok(LlmReply {
            content: content.trim().to_string(),
            thinking,
            tool_calls,
            usage,
            finish_reason,
        })
    }
}

/// Splits `<think>…</think>` reasoning out of the content. An unclosed
/// `<think>` swallows the rest of the text.
fn split_think_block(raw: &str) -> (String, Option<String>) {
    let Some(start) = raw.find("<think>") else {
        return (raw.to_string(), None);
    };
    match raw[start..].find("</think>") {
        Some(rel_end) => {
            let end = start + rel_end;
            let thinking = raw[start + "<think>".len()..end].trim().to_string();
            let mut content = String::new();
            content.push_str(&raw[..start]);
            content.push_str(&raw[end + "</think>".len()..]);
            let thinking = if thinking.is_empty() {
                None
            } else {
                Some(thinking)
            };
            (content, thinking)
        }
        None => {
            let thinking = raw[start + "<think>".len()..].trim().to_string();
            (
                raw[..start].to_string(),
                if thinking.is_empty() {
                    None
                } else {
                    Some(thinking)
                },
            )
        }
    }
}

/// Extracts the `final` channel from harmony-format content; everything from
/// `analysis` channels becomes thinking. Content without harmony markers is
/// passed through.
fn split_harmony(raw: &str) -> (String, Option<String>) {
    if !raw.contains("<|channel|>") {
        return (raw.to_string(), None);
    }
    let mut finals = Vec::new();
    let mut analysis = Vec::new();
    for segment in raw.split("<|channel|>").skip(1) {
        let Some((channel, rest)) = segment.split_once("<|message|>") else {
            continue;
        };
        let text = rest
            .split("<|end|>")
            .next()
            .unwrap_or(rest)
            .split("<|start|>")
            .next()
            .unwrap_or(rest)
            .trim();
        if channel.trim().starts_with("final") {
            finals.push(text.to_string());
        } else {
            analysis.push(text.to_string());
        }
    }
    let content = if finals.is_empty() {
        // No final channel: fall back to the raw text minus markers.
        raw.to_string()
    } else {
        finals.join("\n")
    };
    let thinking = if analysis.is_empty() {
        None
    } else {
        Some(analysis.join("\n"))
    };
    (content, thinking)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> Value {
        json!({
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[test]
    fn family_detection_from_model_name() {
        assert_eq!(
            ModelFamily::from_model_name("DeepSeek-R1-Distill-Qwen-32B"),
            ModelFamily::DeepSeekR1
        );
        assert_eq!(
            ModelFamily::from_model_name("Qwen2.5-Coder-32B"),
            ModelFamily::Qwen
        );
        assert_eq!(ModelFamily::from_model_name("gpt-oss-20b"), ModelFamily::GptOss);
        assert_eq!(
            ModelFamily::from_model_name("llama-3.1-8b"),
            ModelFamily::OpenAiCompatible
        );
    }

    /// **Scenario**: DeepSeek think blocks become `thinking`, not content.
    #[test]
    fn deepseek_think_block_hidden() {
        let body = response("<think>step by step</think>{\"action\": \"COMPLETE\"}");
        let reply = ModelFamily::DeepSeekR1.extract(&body).unwrap();
        assert_eq!(reply.content, "{\"action\": \"COMPLETE\"}");
        assert_eq!(reply.thinking.as_deref(), Some("step by step"));
    }

    /// **Scenario**: unclosed think block swallows the tail but keeps the prefix.
    #[test]
    fn unclosed_think_block() {
        let body = response("the answer<think>incomplete reasoning");
        let reply = ModelFamily::Qwen.extract(&body).unwrap();
        assert_eq!(reply.content, "the answer");
        assert!(reply.thinking.unwrap().contains("incomplete"));
    }

    /// **Scenario**: harmony final channel is extracted; analysis hidden.
    #[test]
    fn harmony_final_channel_extracted() {
        let raw = "<|channel|>analysis<|message|>thinking here<|end|>\
                   <|start|>assistant<|channel|>final<|message|>the answer<|end|>";
        let body = response(raw);
        let reply = ModelFamily::GptOss.extract(&body).unwrap();
        assert_eq!(reply.content, "the answer");
        assert_eq!(reply.thinking.as_deref(), Some("thinking here"));
    }

    /// **Scenario**: empty content is a transient error (retryable).
    #[test]
    fn empty_content_is_transient() {
        let body = response("");
        let err = ModelFamily::OpenAiCompatible.extract(&body).unwrap_err();
        assert!(matches!(err, LlmError::Transient(_)));
    }

    /// **Scenario**: whole-response think block leaves empty content → transient.
    #[test]
    fn all_thinking_no_content_is_transient() {
        let body = response("<think>only reasoning</think>");
        let err = ModelFamily::DeepSeekR1.extract(&body).unwrap_err();
        assert!(matches!(err, LlmError::Transient(_)));
    }

    /// **Scenario**: usage and finish_reason pass through.
    #[test]
    fn usage_and_finish_reason_extracted() {
        let reply = ModelFamily::OpenAiCompatible
            .extract(&response("hi"))
            .unwrap();
        assert_eq!(reply.usage.unwrap().total_tokens, 15);
        assert_eq!(reply.finish_reason.as_deref(), Some("stop"));
    }

    /// **Scenario**: request body carries sampling knobs and optional tools.
    #[test]
    fn request_body_shape() {
        let msgs = vec![ChatMessage::user("hello")];
        let opts = ChatOptions::default().with_temperature(0.2).with_max_tokens(100);
        let body =
            ModelFamily::OpenAiCompatible.request_body("m", &msgs, &opts, &[json!({"type": "function"})]);
        assert_eq!(body["model"], "m");
        // f32 → JSON number; compare with tolerance.
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream"], false);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
