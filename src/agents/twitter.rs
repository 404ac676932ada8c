//! Short-form social content agent.

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};

use super::{format_search_results, stream_chat, Agent, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Specialized in creating engaging social media content. Best suited for:
- Short-form, impactful messages
- Viral marketing content
- Social media threads and discussions
- Breaking news and updates
- Quick tips and insights
- Trending topics
- Hashtag-optimized content
- Community engagement posts";

const SYSTEM_PROMPT: &str = "\
You are a Twitter thread writer. Create engaging, informative threads that:
1. Start with a hook
2. Break complex topics into digestible tweets
3. Use clear, concise language
4. Include relevant emojis
5. End with a call to action
Each tweet should be prefixed with \u{1F9F5} and limited to 280 characters.
Format each tweet on a new line.";

pub struct TwitterAgent {
    chat: Arc<dyn ChatApi>,
}

impl TwitterAgent {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Agent for TwitterAgent {
    fn label(&self) -> &str {
        "twitter"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn generate(&self, prompt: String, context: GenerationContext) -> ChunkStream {
        let request = ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Create a Twitter thread about: {prompt}\nSearch Results: {}",
                format_search_results(&context.search_results)
            )),
        ])
        .with_temperature(0.7);

        stream_chat(self.chat.clone(), self.label().to_string(), request)
    }
}
