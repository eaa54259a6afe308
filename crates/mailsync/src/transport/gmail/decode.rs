//! Gmail MIME payload decoding
//!
//! Walks the payload tree of a `format=full` message and pulls out the
//! headers, the first `text/plain` part and the first `text/html` part.

use anyhow::{Context, Result, bail};
use base64::prelude::*;
use std::collections::BTreeMap;

use super::api::{MessagePart, MessagePayload};
use crate::transport::{DecodedMessage, MessageDecoder, RawMessage};

/// Decoder for Gmail API message payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct GmailDecoder;

impl GmailDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl MessageDecoder for GmailDecoder {
    fn decode(&self, raw: &RawMessage) -> Result<DecodedMessage> {
        if raw.payload.is_null() {
            bail!("Message {} has no payload", raw.id);
        }
        let payload: MessagePayload = serde_json::from_value(raw.payload.clone())
            .with_context(|| format!("Malformed payload for message {}", raw.id))?;

        let headers = collect_headers(&payload);
        let body_html = extract_html_body(&payload).unwrap_or_default();
        let body_text = match extract_plain_text_body(&payload) {
            Some(text) => text,
            None if !body_html.is_empty() => html_to_text(&body_html),
            None => String::new(),
        };

        Ok(DecodedMessage {
            headers,
            body_text,
            body_html,
        })
    }
}

/// Lowercased header map; the first occurrence of a name wins
fn collect_headers(payload: &MessagePayload) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for h in payload.headers.iter().flatten() {
        headers
            .entry(h.name.to_ascii_lowercase())
            .or_insert_with(|| h.value.clone());
    }
    headers
}

fn is_mime(mime_type: &Option<String>, prefix: &str) -> bool {
    mime_type
        .as_ref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with(prefix))
}

/// Extract plain text body from message payload
fn extract_plain_text_body(payload: &MessagePayload) -> Option<String> {
    // Check if this is a simple message with body data
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && is_mime(&payload.mime_type, "text/plain")
    {
        return decode_base64_body(data);
    }

    payload
        .parts
        .as_deref()
        .and_then(|parts| find_part(parts, "text/plain"))
}

/// Extract HTML body from message payload
fn extract_html_body(payload: &MessagePayload) -> Option<String> {
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && is_mime(&payload.mime_type, "text/html")
    {
        return decode_base64_body(data);
    }

    payload
        .parts
        .as_deref()
        .and_then(|parts| find_part(parts, "text/html"))
}

/// Depth-first search for the first decodable part of a MIME type
fn find_part(parts: &[MessagePart], mime_prefix: &str) -> Option<String> {
    for part in parts {
        // Attachments carry a filename; skip them even when they're text
        let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());

        if !is_attachment
            && is_mime(&part.mime_type, mime_prefix)
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_part(nested, mime_prefix)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data.trim()) {
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
    }

    None
}

/// Strip tags, drop script/style content, decode common entities and
/// collapse whitespace
pub(crate) fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let after = &rest[lt..];
        let Some(gt) = after.find('>') else {
            rest = "";
            break;
        };

        let tag = after[1..gt].trim().to_ascii_lowercase();
        rest = &after[gt + 1..];

        for skipped in ["script", "style"] {
            if tag == skipped || tag.starts_with(&format!("{} ", skipped)) {
                let close = format!("</{}", skipped);
                rest = match rest.to_ascii_lowercase().find(&close) {
                    Some(end) => {
                        let tail = &rest[end..];
                        tail.find('>').map_or("", |gt| &tail[gt + 1..])
                    }
                    None => "",
                };
            }
        }

        // Block-level tags become line breaks
        let name = tag.trim_start_matches('/');
        if ["br", "p", "div", "tr", "li", "h1", "h2", "h3", "table"]
            .iter()
            .any(|b| name == *b || name.starts_with(&format!("{} ", b)) || name.starts_with(&format!("{}/", b)))
        {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }
    out.push_str(rest);

    let decoded = decode_html_entities(&out);
    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode HTML entities in text
fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
