//! Retrieval-augmented answers over an account's mail
//!
//! Search hits are hydrated into numbered excerpts that fit a fixed prompt
//! budget. The chat model is asked to cite those numbers, and the matching
//! citations travel back with its answer.

mod openai;

pub use openai::OpenAiChat;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::MessageId;
use crate::search::{SearchHit, SemanticSearch};
use crate::storage::MessageStore;

/// Budget for all excerpts in one prompt, in characters
pub const MAX_CONTEXT_CHARS: usize = 8000;

/// Longest body excerpt taken from one message
pub const MAX_EXCERPT_CHARS: usize = 1500;

/// Budget for prior conversation turns, in characters
pub const MAX_HISTORY_CHARS: usize = 6000;

/// Prior user/assistant exchanges carried into the prompt
pub const MAX_HISTORY_TURNS: usize = 6;

/// Longest single prior turn
const MAX_TURN_CHARS: usize = 2000;

/// Per-turn allowance for role framing
const TURN_OVERHEAD_CHARS: usize = 20;

pub const SYSTEM_PROMPT: &str = "You are an email research assistant. Use the provided email \
excerpts when relevant. Cite sources with bracketed numbers like [1], [2]. Be concise and do \
not fabricate details.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A message the answer may cite as `[number]`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub number: usize,
    pub message_id: MessageId,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub score: f32,
}

/// Excerpt block for the prompt plus the citations it numbers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerContext {
    pub context: String,
    pub citations: Vec<Citation>,
}

/// A model's reply with the citations its prompt offered
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Chat completion backend
pub trait ChatModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Hydrate search hits into numbered excerpts.
///
/// Hits keep their order. Hits whose message is gone are skipped without
/// using a number. The first excerpt that would overflow
/// [`MAX_CONTEXT_CHARS`] ends the context, so every citation returned
/// appears in it.
pub fn build_context(
    store: &dyn MessageStore,
    account_id: &str,
    hits: &[SearchHit],
) -> Result<AnswerContext> {
    let mut out = AnswerContext::default();
    let mut total = 0;

    for hit in hits {
        let Some(record) = store.get_message(account_id, &hit.message_id)? else {
            debug!("Answer context skips missing message {}", hit.message_id);
            continue;
        };

        let number = out.citations.len() + 1;
        let excerpt: String = record.body_text.chars().take(MAX_EXCERPT_CHARS).collect();
        let date = record.date.map(|d| d.to_rfc3339()).unwrap_or_default();
        let block = format!(
            "[{}] Subject: {}\nFrom: {}\nDate: {}\n---\n{}\n\n",
            number,
            record.subject.as_deref().unwrap_or(""),
            record.from.as_deref().unwrap_or(""),
            date,
            excerpt
        );

        let len = block.chars().count();
        if total + len > MAX_CONTEXT_CHARS {
            break;
        }
        total += len;
        out.context.push_str(&block);
        out.citations.push(Citation {
            number,
            message_id: record.id,
            thread_id: record.thread_id,
            subject: record.subject,
            from: record.from,
            date: record.date,
            snippet: record.snippet,
            score: hit.score,
        });
    }

    Ok(out)
}

/// Keep the most recent turns that fit the history budget, oldest first.
///
/// Turns are trimmed and capped before budgeting. System turns from an
/// earlier prompt are dropped.
pub fn trim_history(history: &[ChatMessage]) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(MAX_HISTORY_TURNS * 2)..];

    let mut kept = Vec::new();
    let mut total = 0;
    for turn in recent.iter().rev().filter(|t| t.role != Role::System) {
        let content: String = turn.content.trim().chars().take(MAX_TURN_CHARS).collect();
        let len = content.chars().count();
        if total + len > MAX_HISTORY_CHARS {
            break;
        }
        total += len + TURN_OVERHEAD_CHARS;
        kept.push(ChatMessage::new(turn.role, content));
    }
    kept.reverse();
    kept
}

/// Assemble the prompt: system instructions, prior turns, then the query
/// with its excerpts
pub fn build_messages(query: &str, context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new(Role::System, SYSTEM_PROMPT)];
    messages.extend(trim_history(history));

    let context = if context.is_empty() { "(none)" } else { context };
    messages.push(ChatMessage::new(
        Role::User,
        format!("Query: {}\n\nRelevant email excerpts:\n{}", query, context),
    ));
    messages
}

/// Search, build the cited context and ask the chat model
pub struct AnswerService {
    search: SemanticSearch,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl AnswerService {
    pub const DEFAULT_TOP_K: usize = 8;

    pub fn new(search: SemanticSearch, model: Arc<dyn ChatModel>) -> Self {
        Self {
            search,
            model,
            top_k: Self::DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Answer a question from an account's mail
    pub fn answer(
        &self,
        account_id: &str,
        query: &str,
        history: &[ChatMessage],
    ) -> Result<Answer> {
        let hits = self.search.search(account_id, query, self.top_k)?;
        let context = build_context(self.search.store().as_ref(), account_id, &hits)?;
        debug!(
            "Answering for account {} with {} of {} hits in context",
            account_id,
            context.citations.len(),
            hits.len()
        );

        let messages = build_messages(query, &context.context, history);
        let text = self.model.complete(&messages)?;
        Ok(Answer {
            text,
            citations: context.citations,
        })
    }
}
