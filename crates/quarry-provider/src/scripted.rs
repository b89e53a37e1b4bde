//! A provider that answers from a script instead of the network.
//!
//! Used by tests and by the offline demo. Queued responses are returned in
//! order; once the queue is empty the optional responder is consulted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use quarry_contracts::{
    agent::ProviderKind,
    error::{QuarryError, QuarryResult},
    message::{ChatRequest, ChatResponse},
    tool::ToolCall,
};

use crate::client::ProviderClient;

/// Computes a response from the request when no scripted one is queued.
pub type Responder = Box<dyn Fn(&ChatRequest) -> QuarryResult<ChatResponse> + Send + Sync>;

/// One call seen by the scripted provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub provider: ProviderKind,
    pub model: String,
    pub request: ChatRequest,
}

#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<QuarryResult<ChatResponse>>>,
    responder: Option<Responder>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that answers every call with `responder`.
    pub fn from_fn(responder: impl Fn(&ChatRequest) -> QuarryResult<ChatResponse> + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push(&self, response: QuarryResult<ChatResponse>) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    pub fn push_text(&self, content: &str) -> &Self {
        self.push(Ok(ChatResponse::text(content)))
    }

    pub fn push_tool_calls(&self, calls: Vec<ToolCall>) -> &Self {
        self.push(Ok(ChatResponse {
            content: String::new(),
            tool_calls: Some(calls),
        }))
    }

    pub fn push_error(&self, error: QuarryError) -> &Self {
        self.push(Err(error))
    }

    /// Shared handle to every call made so far.
    pub fn recorder(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn call(
        &self,
        provider: ProviderKind,
        model: &str,
        request: &ChatRequest,
        _api_key: Option<&str>,
    ) -> QuarryResult<ChatResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                provider,
                model: model.to_string(),
                request: request.clone(),
            });

        let queued = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match (queued, &self.responder) {
            (Some(response), _) => response,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(QuarryError::ProviderResponse {
                reason: "scripted provider has no response left".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_contracts::{
        agent::ProviderKind,
        message::{ChatMessage, ChatRequest, ChatResponse},
        tool::ToolCall,
    };

    use super::ScriptedProvider;
    use crate::client::ProviderClient;

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn test_queue_is_served_in_order_and_recorded() {
        let provider = ScriptedProvider::new();
        provider
            .push_tool_calls(vec![ToolCall::new("c1", "query_collection", "{}")])
            .push_text("done");

        let first = provider.call(ProviderKind::OpenAi, "gpt-4o", &request(), None).await.unwrap();
        let second = provider.call(ProviderKind::OpenAi, "gpt-4o", &request(), None).await.unwrap();
        assert_eq!(first.requested_calls().len(), 1);
        assert_eq!(second.content, "done");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.calls()[0].model, "gpt-4o");

        assert!(provider.call(ProviderKind::OpenAi, "gpt-4o", &request(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_responder_answers_after_queue() {
        let provider = ScriptedProvider::from_fn(|req| {
            Ok(ChatResponse::text(format!("{} messages", req.messages.len())))
        });
        provider.push_text("queued");

        let a = provider.call(ProviderKind::Google, "m", &request(), None).await.unwrap();
        let b = provider.call(ProviderKind::Google, "m", &request(), None).await.unwrap();
        assert_eq!(a.content, "queued");
        assert_eq!(b.content, "1 messages");
    }
}
