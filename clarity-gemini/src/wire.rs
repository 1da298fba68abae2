//! Gemini `generateContent` request and response bodies.
//!
//! Only the fields Clarity reads or writes are modelled; unknown response
//! fields are ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use clarity_core::error::{ClarityError, Result};
use clarity_core::generator::GenerationParams;
use clarity_core::payload::Segment;

/// Finish reasons meaning the candidate was withheld by a content filter
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "RECITATION",
    "IMAGE_SAFETY",
];

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 (standard alphabet, padded)
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerateContentRequest {
    /// Single user turn whose parts follow payload order exactly.
    pub fn from_payload(payload: &[Segment], params: &GenerationParams) -> Self {
        let parts = payload
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => Part::Text { text: text.clone() },
                Segment::Image { data, mime_type } => Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: STANDARD.encode(data),
                    },
                },
            })
            .collect();

        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, or the matching failure.
    pub fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ClarityError::content_blocked(reason));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(ClarityError::empty_response("response contained no candidates"));
        };

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }

        match candidate.finish_reason {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                Err(ClarityError::content_blocked(reason))
            }
            Some(reason) => Err(ClarityError::empty_response(format!(
                "first candidate has no text (finish reason {reason})"
            ))),
            None => Err(ClarityError::empty_response("first candidate has no text")),
        }
    }
}

/// Parse a 2xx body. Anything unparsable counts as an empty response.
pub fn parse_success_body(body: &str) -> Result<String> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ClarityError::empty_response(format!("unparseable response body: {e}")))?;
    response.into_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_core::error::FailureKind;
    use serde_json::json;

    #[test]
    fn request_keeps_segment_order_and_encodes_images() {
        let payload = vec![
            Segment::Text("instruction".to_string()),
            Segment::Image {
                data: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
            },
            Segment::Text("\nADDITIONAL CONTEXT: note\n".to_string()),
        ];
        let request = GenerateContentRequest::from_payload(&payload, &GenerationParams::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value["contents"],
            json!([{
                "role": "user",
                "parts": [
                    {"text": "instruction"},
                    {"inline_data": {"mime_type": "image/png", "data": "AQID"}},
                    {"text": "\nADDITIONAL CONTEXT: note\n"}
                ]
            }])
        );
        let config = &value["generationConfig"];
        assert_eq!(config["maxOutputTokens"], 8192);
        let temperature = config["temperature"].as_f64().unwrap();
        assert!((temperature - 0.2).abs() < 1e-6);
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let body = json!({
            "candidates": [
                {"content": {"parts": [{"text": "# PBI: A"}, {"text": "\nbody"}]}, "finishReason": "STOP"},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        assert_eq!(parse_success_body(&body.to_string()).unwrap(), "# PBI: A\nbody");
    }

    #[test]
    fn block_reason_is_content_blocked() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_success_body(&body.to_string()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ContentBlocked);
    }

    #[test]
    fn safety_finish_without_text_is_content_blocked() {
        let body = json!({"candidates": [{"finishReason": "SAFETY"}]});
        let err = parse_success_body(&body.to_string()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ContentBlocked);
    }

    #[test]
    fn zero_candidates_and_garbage_are_empty_responses() {
        let err = parse_success_body(r#"{"candidates": []}"#).unwrap_err();
        assert_eq!(err.kind(), FailureKind::EmptyResponse);

        let err = parse_success_body("<html>oops</html>").unwrap_err();
        assert_eq!(err.kind(), FailureKind::EmptyResponse);

        let err = parse_success_body(r#"{"candidates": [{"finishReason": "MAX_TOKENS"}]}"#).unwrap_err();
        assert_eq!(err.kind(), FailureKind::EmptyResponse);
    }
}
