//! Template-driven request/response marshalling (spec.md §4.2).

use crate::error::{KrawallError, KrawallResult};
use crate::model::{RequestTemplate, ResponseTemplate, ResponseTransform, TokenUsage};
use crate::path::Path;
use serde_json::Value;

/// Deep-clones `template.structure`, sets `messagePath` to `msg`, then
/// substitutes every `variables` entry wherever `${name}` or the bare
/// literal `name` appears as a full string value.
///
/// Pure: `template` is never mutated, and two calls with equal inputs
/// produce structurally equal outputs (testable property 2).
pub fn build_request(msg: &str, template: &RequestTemplate) -> Value {
    let mut body = template.structure.clone();
    let path = Path::parse(&template.message_path);
    path.assign(&mut body, Value::String(msg.to_string()));

    if !template.variables.is_empty() {
        substitute_variables(&mut body, &template.variables);
    }
    body
}

fn substitute_variables(node: &mut Value, variables: &std::collections::HashMap<String, Value>) {
    match node {
        Value::String(s) => {
            for (name, value) in variables {
                let placeholder = format!("${{{name}}}");
                if s == &placeholder || s == name {
                    *node = value.clone();
                    return;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_variables(item, variables);
            }
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                substitute_variables(value, variables);
            }
        }
        _ => {}
    }
}

/// Evaluates `responsePath` on `raw` and applies the configured transform.
/// Failing evaluation raises [`KrawallError::ResponseShape`] naming the path.
pub fn extract_response(raw: &Value, template: &ResponseTemplate) -> KrawallResult<String> {
    let path = Path::parse(&template.response_path);
    let value = path
        .evaluate(raw)
        .ok_or_else(|| KrawallError::ResponseShape {
            path: template.response_path.clone(),
        })?;

    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    Ok(match template.transform {
        ResponseTransform::None => text,
        ResponseTransform::MarkdownStrip => strip_markdown(&text),
        ResponseTransform::HtmlStrip => strip_html(&text),
    })
}

/// Returns the object at `tokenUsagePath`, or `None` if absent or the path
/// does not resolve.
pub fn extract_tokens(raw: &Value, template: &ResponseTemplate) -> Option<TokenUsage> {
    let path = template.token_usage_path.as_ref()?;
    let value = Path::parse(path).evaluate(raw)?;
    serde_json::from_value(value.clone()).ok()
}

/// Returns the string at `errorPath`, or `None` if absent or the path does
/// not resolve.
pub fn extract_error(raw: &Value, template: &ResponseTemplate) -> Option<String> {
    let path = template.error_path.as_ref()?;
    let value = Path::parse(path).evaluate(raw)?;
    match value {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Removes ATX headers, bold/italic markers and backtick code-spans
/// (spec.md §4.2, scenario S3).
fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start_matches('#').trim_start();
        out.push_str(trimmed);
        out.push('\n');
    }
    let mut result = out.trim_end_matches('\n').to_string();
    for marker in ["***", "**", "__", "*", "_", "`"] {
        result = result.replace(marker, "");
    }
    result
}

/// Removes any tag-like token `<...>`.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseTransform;
    use serde_json::json;
    use std::collections::HashMap;

    fn openai_template() -> RequestTemplate {
        RequestTemplate {
            message_path: "messages.0.content".into(),
            structure: json!({"model": "x", "messages": [{"role": "user", "content": ""}]}),
            variables: HashMap::new(),
        }
    }

    #[test]
    fn scenario_s1_openai_shaped_request_and_response() {
        let body = build_request("hello", &openai_template());
        assert_eq!(
            body,
            json!({"model": "x", "messages": [{"role": "user", "content": "hello"}]})
        );

        let response = json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        });
        let template = ResponseTemplate {
            response_path: "choices.0.message.content".into(),
            token_usage_path: Some("usage".into()),
            error_path: None,
            transform: ResponseTransform::None,
        };
        assert_eq!(extract_response(&response, &template).unwrap(), "hi");
        let usage = extract_tokens(&response, &template).unwrap();
        assert_eq!(usage.prompt_tokens, Some(1));
        assert_eq!(usage.total_tokens, Some(2));
    }

    #[test]
    fn scenario_s2_gemini_shaped() {
        let template = RequestTemplate {
            message_path: "contents.0.parts.0.text".into(),
            structure: json!({"contents": [{"parts": [{"text": ""}]}]}),
            variables: HashMap::new(),
        };
        let body = build_request("Hi", &template);
        assert_eq!(
            Path::parse("contents.0.parts.0.text").evaluate(&body),
            Some(&json!("Hi"))
        );

        let response = json!({"candidates": [{"content": {"parts": [{"text": "Hi"}]}}]});
        let response_template = ResponseTemplate {
            response_path: "candidates.0.content.parts.0.text".into(),
            token_usage_path: None,
            error_path: None,
            transform: ResponseTransform::None,
        };
        assert_eq!(
            extract_response(&response, &response_template).unwrap(),
            "Hi"
        );
    }

    #[test]
    fn scenario_s3_markdown_strip() {
        let result = strip_markdown("# Hello **world**");
        assert_eq!(result, "Hello world");
    }

    #[test]
    fn html_strip_removes_tags() {
        assert_eq!(strip_html("<b>hi</b> <i>there</i>"), "hi there");
    }

    #[test]
    fn build_request_is_pure_and_deterministic() {
        let template = openai_template();
        let before = template.structure.clone();
        let a = build_request("hi", &template);
        let b = build_request("hi", &template);
        assert_eq!(template.structure, before);
        assert_eq!(a, b);
    }

    #[test]
    fn variables_substitute_placeholder_and_bare_literal() {
        let mut variables = HashMap::new();
        variables.insert("system".to_string(), json!("be nice"));
        let template = RequestTemplate {
            message_path: "messages.1.content".into(),
            structure: json!({
                "messages": [
                    {"role": "system", "content": "${system}"},
                    {"role": "user", "content": ""}
                ]
            }),
            variables,
        };
        let body = build_request("hi", &template);
        assert_eq!(body["messages"][0]["content"], json!("be nice"));
        assert_eq!(body["messages"][1]["content"], json!("hi"));
    }

    #[test]
    fn missing_response_path_raises_response_shape_error() {
        let template = ResponseTemplate {
            response_path: "nope.here".into(),
            token_usage_path: None,
            error_path: None,
            transform: ResponseTransform::None,
        };
        let err = extract_response(&json!({}), &template).unwrap_err();
        match err {
            KrawallError::ResponseShape { path } => assert_eq!(path, "nope.here"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extract_error_reads_configured_path() {
        let template = ResponseTemplate {
            response_path: "x".into(),
            token_usage_path: None,
            error_path: Some("error.message".into()),
            transform: ResponseTransform::None,
        };
        let raw = json!({"error": {"message": "bad request"}});
        assert_eq!(
            extract_error(&raw, &template),
            Some("bad request".to_string())
        );
    }
}
