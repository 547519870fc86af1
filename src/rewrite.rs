//! In-place rewrite rules applied to inbound completion documents before
//! they are forwarded upstream.

use serde_json::Value;

use crate::config::Config;

/// Fixed model identifier forced onto every code-completion request.
pub const INSTRUCT_MODEL: &str = "deepseek-coder";

/// Marker phrase checked before locale injection; its presence means the
/// instruction was already appended on an earlier pass.
const LOCALE_MARKER: &str = "Respond in the following locale";

/// Backend-incompatible fields injected by some client versions.
const CHAT_DROP_FIELDS: [&str; 3] = ["intent", "intent_threshold", "intent_content"];

/// Rewrite a chat completion document: resolve the model through the map
/// (unmapped names collapse to the default), inject the locale instruction
/// into the last message, strip client-only fields, and clamp `max_tokens`.
pub fn rewrite_chat(doc: &mut Value, cfg: &Config) {
    resolve_model(doc, cfg);
    if doc.get("function_call").is_none() {
        inject_locale(doc, cfg.locale());
    }
    if let Some(obj) = doc.as_object_mut() {
        for field in CHAT_DROP_FIELDS {
            obj.remove(field);
        }
    }
    clamp_max_tokens(doc, cfg.chat_max_tokens);
}

/// Rewrite a code completion document: strip `extra`/`nwo` and force the
/// instruct model, overriding any caller-supplied value.
pub fn rewrite_codex(doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("extra");
        obj.remove("nwo");
        obj.insert(
            "model".to_string(),
            Value::String(INSTRUCT_MODEL.to_string()),
        );
    }
}

fn resolve_model(doc: &mut Value, cfg: &Config) {
    let requested = doc
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    // 映射是全量的：不在表中的模型一律落到默认模型。
    let resolved = cfg
        .chat_model_map
        .get(requested)
        .cloned()
        .unwrap_or_else(|| cfg.chat_model_default.clone());
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("model".to_string(), Value::String(resolved));
    }
}

/// Append the locale instruction to the last message's content, at most once
/// per document pass. Empty or absent `messages` is a no-op.
fn inject_locale(doc: &mut Value, locale: &str) {
    let Some(last) = doc
        .get_mut("messages")
        .and_then(|m| m.as_array_mut())
        .and_then(|arr| arr.last_mut())
    else {
        return;
    };
    let Some(content) = last.get("content").and_then(|c| c.as_str()) else {
        return;
    };
    if content.contains(LOCALE_MARKER) {
        return;
    }
    let appended = format!("{content}Respond in the following locale: {locale}.");
    if let Some(obj) = last.as_object_mut() {
        obj.insert("content".to_string(), Value::String(appended));
    }
}

fn clamp_max_tokens(doc: &mut Value, ceiling: u64) {
    let Some(requested) = doc.get("max_tokens").and_then(Value::as_u64) else {
        return;
    };
    if requested > ceiling
        && let Some(obj) = doc.as_object_mut()
    {
        obj.insert("max_tokens".to_string(), Value::from(ceiling));
    }
}
