//! LLM-backed daily summaries via the Groq chat-completions API.
//!
//! The API key is supplied by the caller per request and never stored
//! server-side. Requests try the primary model first and retry once on the
//! fallback model; if both fail the caller gets a placeholder string rather
//! than an error, since a summary is decoration on top of the feed.

use serde::{Deserialize, Serialize};

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const PRIMARY_MODEL: &str = "llama-3.3-70b-versatile";
const FALLBACK_MODEL: &str = "llama-3.1-8b-instant";

/// Cap on posts fed into a family summary prompt.
const MAX_PROMPT_POSTS: usize = 50;
/// Cap on messages fed into a user summary prompt.
const MAX_PROMPT_MESSAGES: usize = 20;
/// Per-post content excerpt length (chars).
const POST_EXCERPT_CHARS: usize = 200;
/// Per-message content excerpt length (chars).
const MESSAGE_EXCERPT_CHARS: usize = 150;

const EMPTY_FAMILY_DAY: &str = "No posts were shared by the family today.";
const SUMMARY_UNAVAILABLE: &str = "Summary is unavailable right now. Please try again later.";

/// A post reduced to what the prompt needs.
#[derive(Debug, Clone)]
pub struct PostExcerpt {
    pub author: String,
    pub content: String,
}

/// Per-user daily summary: a prose recap plus a free-text mood description.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub post_summary: String,
    pub sentiment: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Thin Groq chat client bound to one caller-supplied API key.
pub struct GroqClient {
    http: reqwest::Client,
    api_key: String,
}

impl GroqClient {
    pub fn new(http: reqwest::Client, api_key: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_owned(),
        }
    }

    /// One chat completion. Tries the primary model, then the fallback model
    /// on any error.
    async fn chat(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        match self.chat_with(PRIMARY_MODEL, prompt, temperature, max_tokens).await {
            Ok(content) => Ok(content),
            Err(e) => {
                tracing::warn!("Primary summary model failed, trying fallback: {e}");
                self.chat_with(FALLBACK_MODEL, prompt, temperature, max_tokens)
                    .await
            }
        }
    }

    async fn chat_with(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature,
            max_tokens,
        };

        let resp = self
            .http
            .post(GROQ_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("Groq returned status {}", resp.status());
        }

        let chat_resp: ChatResponse = resp.json().await?;
        let content = chat_resp
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("Groq returned empty response");
        }
        Ok(content)
    }

    /// Family-wide recap of a day's posts. Returns a fixed line for an empty
    /// day and a placeholder when the provider is unreachable.
    pub async fn family_summary(&self, posts: &[PostExcerpt], members: &[String]) -> String {
        if posts.is_empty() {
            return EMPTY_FAMILY_DAY.to_string();
        }

        let posts_text = posts
            .iter()
            .take(MAX_PROMPT_POSTS)
            .map(|p| format!("- {}: {}", p.author, excerpt(&p.content, POST_EXCERPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are a helpful family assistant. Summarize the family's activity today \
             in a warm, engaging way.\n\n\
             Family Members: {}\n\n\
             Today's Posts:\n{posts_text}\n\n\
             Create a brief, friendly summary (2-3 sentences) highlighting:\n\
             1. Overall family mood and activity\n\
             2. Key topics or themes\n\
             3. Any notable moments or updates\n\n\
             Keep it positive and family-friendly.",
            members.join(", "),
        );

        match self.chat(&prompt, 0.7, 300).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("Family summary generation failed: {e}");
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }

    /// Per-member recap: post summary plus a free-text mood description,
    /// optionally informed by messages between the member and the caller.
    pub async fn user_summary(&self, posts: &[String], messages: &[String]) -> UserSummary {
        if posts.is_empty() && messages.is_empty() {
            return UserSummary {
                post_summary: "No activity today.".to_string(),
                sentiment: "No posts or messages to analyze today.".to_string(),
            };
        }

        let posts_text = posts
            .iter()
            .map(|c| format!("- {}", excerpt(c, POST_EXCERPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");
        let messages_text = messages
            .iter()
            .take(MAX_PROMPT_MESSAGES)
            .map(|c| format!("- {}", excerpt(c, MESSAGE_EXCERPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Analyze this person's activity today and provide:\n\
             1. A brief summary of their posts (2-3 sentences)\n\
             2. Their overall sentiment/mood for the day as free-flowing descriptive text \
             (not a score, but a natural description of how they seem to be feeling)\n\n\
             Today's Posts:\n{posts_text}\n\n\
             Recent Messages:\n{messages_text}\n\n\
             Respond in this format:\n\
             POST_SUMMARY: [summary text here]\n\
             SENTIMENT: [free-flowing description of their mood and emotional state today]\n\n\
             Keep the sentiment description warm, empathetic, and family-friendly.",
        );

        match self.chat(&prompt, 0.5, 400).await {
            Ok(content) => parse_user_summary(&content, posts),
            Err(e) => {
                tracing::warn!("User summary generation failed: {e}");
                UserSummary {
                    post_summary: SUMMARY_UNAVAILABLE.to_string(),
                    sentiment: "Unable to analyze sentiment at this time.".to_string(),
                }
            }
        }
    }
}

/// First `max` characters of `content`.
fn excerpt(content: &str, max: usize) -> String {
    content.chars().take(max).collect()
}

/// Extract the `POST_SUMMARY:` / `SENTIMENT:` sections from a model reply,
/// tolerating missing labels, with content-derived fallbacks.
fn parse_user_summary(content: &str, posts: &[String]) -> UserSummary {
    let (mut post_summary, mut sentiment) = if let Some((_, rest)) =
        content.split_once("POST_SUMMARY:")
    {
        match rest.split_once("SENTIMENT:") {
            Some((summary, mood)) => (summary.trim().to_string(), mood.trim().to_string()),
            None => (rest.trim().to_string(), String::new()),
        }
    } else if let Some((before, mood)) = content.split_once("SENTIMENT:") {
        (before.trim().to_string(), mood.trim().to_string())
    } else {
        let mut lines = content.lines();
        (
            lines.next().unwrap_or_default().trim().to_string(),
            lines.collect::<Vec<_>>().join(" ").trim().to_string(),
        )
    };

    if post_summary.is_empty() {
        post_summary = match posts.len() {
            0 => "No posts shared today.".to_string(),
            1 => format!("Shared 1 post today: {}...", excerpt(&posts[0], 100)),
            n => format!("Shared {n} posts today covering various topics."),
        };
    }
    if sentiment.is_empty() {
        sentiment = "Unable to determine sentiment from available content.".to_string();
    }

    UserSummary {
        post_summary,
        sentiment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_labeled_response() {
        let reply = "POST_SUMMARY: Shared photos from the park.\nSENTIMENT: seems happy and energetic";
        let parsed = parse_user_summary(reply, &[]);
        assert_eq!(parsed.post_summary, "Shared photos from the park.");
        assert_eq!(parsed.sentiment, "seems happy and energetic");
    }

    #[test]
    fn parse_sentiment_only() {
        let reply = "They posted about dinner.\nSENTIMENT: appears relaxed";
        let parsed = parse_user_summary(reply, &[]);
        assert_eq!(parsed.post_summary, "They posted about dinner.");
        assert_eq!(parsed.sentiment, "appears relaxed");
    }

    #[test]
    fn parse_unlabeled_response_splits_on_lines() {
        let reply = "A busy day of posting.\nSeems cheerful.\nVery social.";
        let parsed = parse_user_summary(reply, &[]);
        assert_eq!(parsed.post_summary, "A busy day of posting.");
        assert_eq!(parsed.sentiment, "Seems cheerful. Very social.");
    }

    #[test]
    fn parse_empty_summary_falls_back_to_post_count() {
        let posts = vec!["morning coffee thoughts".to_string(), "evening walk".to_string()];
        let parsed = parse_user_summary("POST_SUMMARY:\nSENTIMENT:", &posts);
        assert_eq!(
            parsed.post_summary,
            "Shared 2 posts today covering various topics."
        );
        assert_eq!(
            parsed.sentiment,
            "Unable to determine sentiment from available content."
        );
    }

    #[test]
    fn parse_single_post_fallback_quotes_content() {
        let posts = vec!["hello world".to_string()];
        let parsed = parse_user_summary("", &posts);
        assert_eq!(parsed.post_summary, "Shared 1 post today: hello world...");
    }

    #[test]
    fn excerpt_is_char_safe() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("short", 100), "short");
    }

    #[tokio::test]
    async fn empty_day_needs_no_provider() {
        let client = GroqClient::new(reqwest::Client::new(), "gsk_unused");
        let summary = client.family_summary(&[], &["alice".to_string()]).await;
        assert_eq!(summary, "No posts were shared by the family today.");

        let user = client.user_summary(&[], &[]).await;
        assert_eq!(user.post_summary, "No activity today.");
    }
}
