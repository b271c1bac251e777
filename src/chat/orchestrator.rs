//! One chat turn: persist the question, let the model decide whether to
//! search, run the search, and persist exactly one assistant reply.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::instructions::{
    self, EMPTY_REPLY_TEXT, HISTORY_FAILURE_TEXT, PROVIDER_FAILURE_TEXT, SEARCH_TOOL_NAME,
};
use crate::core::config::{ChatSettings, SearchSettings};
use crate::history::{ConversationStore, Message, NewMessage, Role, StoreError};
use crate::llm::{
    Content, FunctionCall, FunctionCallingMode, GenerateRequest, GenerativeModelClient, Turn,
};
use crate::search::{prune, DocumentSearch, PrunedResult};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to persist message: {0}")]
    Persistence(#[source] StoreError),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ChatError::NotFound(msg),
            other => ChatError::Persistence(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub user: Message,
    pub assistant: Message,
}

/// Text and metadata of the assistant reply, before it is persisted.
struct Reply {
    text: String,
    metadata: Map<String, Value>,
}

impl Reply {
    fn new(text: impl Into<String>, retrieved_from: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("retrieved_from".to_string(), json!(retrieved_from));
        Self {
            text: text.into(),
            metadata,
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Clone)]
pub struct RagOrchestrator {
    store: Arc<dyn ConversationStore>,
    search: Arc<dyn DocumentSearch>,
    model: GenerativeModelClient,
    search_settings: SearchSettings,
    chat_settings: ChatSettings,
}

impl RagOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        search: Arc<dyn DocumentSearch>,
        model: GenerativeModelClient,
        search_settings: SearchSettings,
        chat_settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            search,
            model,
            search_settings,
            chat_settings,
        }
    }

    /// Handles one user utterance. Fails only before the user message is
    /// stored (validation, unknown conversation, store failure); every later
    /// failure becomes the assistant's reply.
    pub async fn handle_user_message(
        &self,
        conversation_id: &str,
        content: &str,
        metadata: Value,
    ) -> Result<ChatTurn, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("content is required".to_string()));
        }

        let pair_id = Uuid::new_v4().to_string();

        let user = self
            .store
            .insert_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                pair_id: Some(pair_id.clone()),
                role: Role::User,
                content: content.to_string(),
                metadata,
            })
            .await?;

        let reply = match self.store.list_messages(conversation_id).await {
            Ok(history) => self.generate_reply(&history).await,
            Err(err) => {
                tracing::error!(
                    conversation_id,
                    pair_id = %pair_id,
                    error = %err,
                    "Failed to load conversation history"
                );
                Reply::new(HISTORY_FAILURE_TEXT, "none").with("error", json!("history_unavailable"))
            }
        };

        let assistant = self.persist_reply(conversation_id, &pair_id, reply).await;

        Ok(ChatTurn { user, assistant })
    }

    async fn generate_reply(&self, history: &[Message]) -> Reply {
        let turns: Vec<Content> = history.iter().map(|m| to_turn(m).into()).collect();

        let request = GenerateRequest {
            contents: turns.clone(),
            system_instruction: Some(instructions::system_instruction()),
            tools: vec![instructions::search_tool_declaration()],
            mode: FunctionCallingMode::Auto,
        };

        let first = match self.model.generate(&request).await {
            Ok(generation) => generation,
            Err(err) => {
                tracing::warn!(
                    provider = self.model.provider_name(),
                    error = %err,
                    "Model round 1 failed"
                );
                return Reply::new(PROVIDER_FAILURE_TEXT, "none")
                    .with("error", json!("provider_error"));
            }
        };

        let Some(call) = first.function_call else {
            return Reply::new(non_empty_text(&first.text), "none");
        };

        if call.name != SEARCH_TOOL_NAME {
            tracing::warn!(function = %call.name, "Model requested an unknown function");
            return Reply::new(instructions::unexpected_function_text(&call.name), "none")
                .with("error", json!("unexpected_function_call"))
                .with("function_name", json!(call.name));
        }

        let Some(query) = call
            .args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
        else {
            tracing::warn!("Search tool called without a query");
            return Reply::new(instructions::missing_query_text(), "none")
                .with("error", json!("missing_tool_argument"));
        };

        let max_hits = self.resolve_max_hits(call.args.get("max_results"));

        let hits = match self.search.search(&query, max_hits).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(query = %query, error = %err, "Document search failed");
                return Reply::new(instructions::search_failure_text(), "elasticsearch_error")
                    .with("tool_query", json!(query))
                    .with("error", json!(err.to_string()));
            }
        };

        let pruned = prune(&hits, self.chat_settings.max_tool_result_bytes);
        tracing::info!(
            query = %query,
            original = pruned.original_count,
            kept = pruned.final_count,
            snippet = pruned.snippet_length,
            bytes = pruned.bytes,
            "Search results prepared"
        );

        let grounded = self.tool_metadata(&query, &pruned);
        let request = self.second_round_request(turns, first.candidate, call, &query, &pruned);

        match self.model.generate(&request).await {
            Ok(second) => Reply {
                text: non_empty_text(&second.text),
                metadata: grounded,
            },
            Err(err) => {
                tracing::warn!(
                    provider = self.model.provider_name(),
                    error = %err,
                    "Model round 2 failed"
                );
                Reply {
                    text: PROVIDER_FAILURE_TEXT.to_string(),
                    metadata: grounded,
                }
                .with("error", json!("provider_error"))
            }
        }
    }

    fn second_round_request(
        &self,
        mut contents: Vec<Content>,
        candidate: Option<Value>,
        call: FunctionCall,
        query: &str,
        pruned: &PrunedResult,
    ) -> GenerateRequest {
        contents.push(replay_turn(candidate, call));
        contents.push(
            Turn::function_response(
                SEARCH_TOOL_NAME,
                json!({
                    "query": query,
                    "hits": pruned.hits,
                    "original_count": pruned.original_count,
                    "final_count": pruned.final_count,
                    "truncated": pruned.truncated,
                }),
            )
            .into(),
        );

        GenerateRequest {
            contents,
            system_instruction: Some(instructions::grounding_instruction()),
            tools: vec![instructions::search_tool_declaration()],
            mode: FunctionCallingMode::None,
        }
    }

    fn tool_metadata(&self, query: &str, pruned: &PrunedResult) -> Map<String, Value> {
        let sample: Vec<_> = pruned
            .hits
            .iter()
            .take(self.chat_settings.hits_sample_limit)
            .collect();

        Reply::new("", "elasticsearch_tool")
            .with("tool_query", json!(query))
            .with("tool_original_hits_count", json!(pruned.original_count))
            .with("tool_final_hits_count", json!(pruned.final_count))
            .with("tool_snippet_length", json!(pruned.snippet_length))
            .with("tool_bytes", json!(pruned.bytes))
            .with("tool_truncated", json!(pruned.truncated))
            .with("tool_hits_sample", json!(sample))
            .metadata
    }

    /// Requested hit count clamped to `[1, max_hits_limit]`.
    fn resolve_max_hits(&self, requested: Option<&Value>) -> usize {
        let limit = self.search_settings.max_hits_limit.max(1);
        let requested = requested.and_then(|value| match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .or(Some(0)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        });

        match requested {
            Some(n) => (n.min(limit as u64) as usize).max(1),
            None => self.search_settings.default_max_hits.clamp(1, limit),
        }
    }

    async fn persist_reply(&self, conversation_id: &str, pair_id: &str, reply: Reply) -> Message {
        let result = self
            .store
            .insert_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                pair_id: Some(pair_id.to_string()),
                role: Role::Assistant,
                content: reply.text.clone(),
                metadata: Value::Object(reply.metadata.clone()),
            })
            .await;

        match result {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(
                    conversation_id,
                    pair_id,
                    error = %err,
                    "Assistant reply generated but not persisted"
                );
                let mut metadata = reply.metadata;
                metadata.insert("persisted".to_string(), json!(false));
                Message {
                    id: format!("temp-{}", pair_id),
                    conversation_id: conversation_id.to_string(),
                    pair_id: Some(pair_id.to_string()),
                    role: Role::Assistant,
                    content: reply.text,
                    metadata: Value::Object(metadata),
                    created_at: chrono::Utc::now()
                        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                        .to_string(),
                }
            }
        }
    }
}

fn to_turn(message: &Message) -> Turn {
    match message.role {
        Role::User => Turn::user(message.content.clone()),
        Role::Assistant | Role::System => Turn::model(message.content.clone()),
    }
}

fn non_empty_text(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        EMPTY_REPLY_TEXT.to_string()
    } else {
        text.to_string()
    }
}

/// The model turn that precedes the function response in round 2. The raw
/// candidate is replayed only when it actually carries the call.
fn replay_turn(candidate: Option<Value>, call: FunctionCall) -> Content {
    match candidate {
        Some(Value::Object(mut raw)) if carries_function_call(&raw) => {
            raw.insert("role".to_string(), json!("model"));
            Content::Opaque(Value::Object(raw))
        }
        _ => Turn::function_call(call).into(),
    }
}

fn carries_function_call(content: &Map<String, Value>) -> bool {
    content
        .get("parts")
        .and_then(Value::as_array)
        .is_some_and(|parts| {
            parts
                .iter()
                .any(|part| part.get("functionCall").or_else(|| part.get("function_call")).is_some())
        })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::history::{
        Conversation, ConversationSummary, MessageDeletion, SqliteConversationStore,
    };
    use crate::llm::{LlmProvider, Part, ProviderError};
    use crate::search::{SearchError, SearchHit};

    #[derive(Default)]
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<Value, String>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<Value, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, idx: usize) -> GenerateRequest {
            self.requests.lock().unwrap()[idx].clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate_content(&self, request: &GenerateRequest) -> Result<Value, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(ProviderError::Upstream(message)),
                None => Err(ProviderError::Upstream("no scripted response".to_string())),
            }
        }
    }

    struct FakeSearch {
        hits: Option<Vec<SearchHit>>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl FakeSearch {
        fn returning(hits: Vec<SearchHit>) -> Arc<Self> {
            Arc::new(Self {
                hits: Some(hits),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                hits: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentSearch for FakeSearch {
        async fn search(&self, query: &str, max_hits: usize) -> Result<Vec<SearchHit>, SearchError> {
            self.calls.lock().unwrap().push((query.to_string(), max_hits));
            match &self.hits {
                Some(hits) => Ok(hits.clone()),
                None => Err(SearchError::Status {
                    status: 401,
                    body: "security_exception".to_string(),
                }),
            }
        }
    }

    /// Delegates to SQLite but can be told to fail specific operations.
    struct FlakyStore {
        inner: SqliteConversationStore,
        fail_user_insert: bool,
        fail_assistant_insert: bool,
        fail_history: bool,
    }

    fn broken() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl ConversationStore for FlakyStore {
        async fn create_conversation(
            &self,
            title: Option<String>,
            metadata: Value,
        ) -> Result<Conversation, StoreError> {
            self.inner.create_conversation(title, metadata).await
        }

        async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
            self.inner.list_conversations().await
        }

        async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
            self.inner.get_conversation(id).await
        }

        async fn update_title(&self, id: &str, title: &str) -> Result<Conversation, StoreError> {
            self.inner.update_title(id, title).await
        }

        async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_conversation(id).await
        }

        async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
            if self.fail_user_insert && message.role == Role::User {
                return Err(broken());
            }
            if self.fail_assistant_insert && message.role == Role::Assistant {
                return Err(broken());
            }
            self.inner.insert_message(message).await
        }

        async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
            if self.fail_history {
                return Err(broken());
            }
            self.inner.list_messages(conversation_id).await
        }

        async fn delete_message(
            &self,
            conversation_id: &str,
            message_id: &str,
        ) -> Result<MessageDeletion, StoreError> {
            self.inner.delete_message(conversation_id, message_id).await
        }

        async fn delete_message_pair(
            &self,
            conversation_id: &str,
            pair_id: &str,
        ) -> Result<u64, StoreError> {
            self.inner.delete_message_pair(conversation_id, pair_id).await
        }
    }

    async fn sqlite_store() -> SqliteConversationStore {
        let path = std::env::temp_dir().join(format!("querynest-chat-test-{}.db", Uuid::new_v4()));
        SqliteConversationStore::new(path).await.unwrap()
    }

    struct Harness {
        orchestrator: RagOrchestrator,
        store: Arc<dyn ConversationStore>,
        provider: Arc<ScriptedProvider>,
        search: Arc<FakeSearch>,
        conversation_id: String,
    }

    async fn harness_with(
        store: Arc<dyn ConversationStore>,
        provider: Arc<ScriptedProvider>,
        search: Arc<FakeSearch>,
    ) -> Harness {
        let conversation_id = store
            .create_conversation(None, json!({}))
            .await
            .unwrap()
            .id;
        let orchestrator = RagOrchestrator::new(
            store.clone(),
            search.clone(),
            GenerativeModelClient::new(provider.clone()),
            SearchSettings::default(),
            ChatSettings::default(),
        );
        Harness {
            orchestrator,
            store,
            provider,
            search,
            conversation_id,
        }
    }

    async fn harness(responses: Vec<Result<Value, String>>, search: Arc<FakeSearch>) -> Harness {
        harness_with(Arc::new(sqlite_store().await), ScriptedProvider::new(responses), search).await
    }

    fn text_response(text: &str) -> Result<Value, String> {
        Ok(json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] }))
    }

    fn call_response(name: &str, args: Value) -> Result<Value, String> {
        Ok(json!({ "candidates": [{ "content": { "role": "model", "parts": [
            { "functionCall": { "name": name, "args": args } }
        ]}}]}))
    }

    fn hit(id: &str, content: &str) -> SearchHit {
        SearchHit::from_raw(&json!({
            "_id": id,
            "_score": 1.5,
            "_source": { "originalName": format!("{id}.pdf"), "content": content }
        }))
    }

    fn assert_single_pair(messages: &[Message], turn: &ChatTurn) {
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(turn.user.pair_id, turn.assistant.pair_id);
        assert_eq!(messages[0].pair_id, messages[1].pair_id);
    }

    #[tokio::test]
    async fn blank_content_is_rejected_without_writes() {
        let h = harness(vec![], FakeSearch::returning(vec![])).await;

        for content in ["", "   "] {
            let err = h
                .orchestrator
                .handle_user_message(&h.conversation_id, content, json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }

        assert!(h.store.list_messages(&h.conversation_id).await.unwrap().is_empty());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let h = harness(vec![text_response("hi")], FakeSearch::returning(vec![])).await;

        let err = h
            .orchestrator
            .handle_user_message("missing", "hello", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn plain_answer_uses_one_model_call() {
        let h = harness(
            vec![text_response("Paris is the capital of France.")],
            FakeSearch::returning(vec![]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "  What is the capital of France? ", json!({ "client": "web" }))
            .await
            .unwrap();

        assert_eq!(turn.user.content, "What is the capital of France?");
        assert_eq!(turn.user.metadata["client"], "web");
        assert_eq!(turn.assistant.content, "Paris is the capital of France.");
        assert_eq!(turn.assistant.metadata["retrieved_from"], "none");
        assert_eq!(h.provider.calls(), 1);
        assert!(h.search.calls().is_empty());

        let round1 = h.provider.request(0);
        assert_eq!(round1.mode, FunctionCallingMode::Auto);
        assert_eq!(round1.tools[0].name, SEARCH_TOOL_NAME);
        assert_eq!(
            round1.contents,
            vec![Content::Turn(Turn::user("What is the capital of France?"))]
        );

        let messages = h.store.list_messages(&h.conversation_id).await.unwrap();
        assert_single_pair(&messages, &turn);
    }

    #[tokio::test]
    async fn history_maps_non_user_roles_to_model_turns() {
        let h = harness(vec![text_response("ok")], FakeSearch::returning(vec![])).await;
        for (role, content) in [(Role::System, "note"), (Role::Assistant, "earlier answer")] {
            h.store
                .insert_message(NewMessage {
                    conversation_id: h.conversation_id.clone(),
                    pair_id: None,
                    role,
                    content: content.to_string(),
                    metadata: json!({}),
                })
                .await
                .unwrap();
        }

        h.orchestrator
            .handle_user_message(&h.conversation_id, "next", json!({}))
            .await
            .unwrap();

        assert_eq!(
            h.provider.request(0).contents,
            vec![
                Content::Turn(Turn::model("note")),
                Content::Turn(Turn::model("earlier answer")),
                Content::Turn(Turn::user("next")),
            ]
        );
    }

    #[tokio::test]
    async fn blank_model_text_gets_notice() {
        let h = harness(vec![text_response("   ")], FakeSearch::returning(vec![])).await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "hello", json!({}))
            .await
            .unwrap();

        assert_eq!(turn.assistant.content, EMPTY_REPLY_TEXT);
    }

    #[tokio::test]
    async fn tool_call_runs_search_and_second_round() {
        let hits = vec![
            hit("a", "Budget for Q3 is 1.2M"),
            hit("b", "Marketing spend"),
            hit("c", "Headcount plan"),
        ];
        let h = harness(
            vec![
                call_response(SEARCH_TOOL_NAME, json!({ "query": "budget" })),
                text_response("The Q3 budget is 1.2M."),
            ],
            FakeSearch::returning(hits),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "What is our budget?", json!({}))
            .await
            .unwrap();

        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.search.calls(), vec![("budget".to_string(), 5)]);
        assert_eq!(turn.assistant.content, "The Q3 budget is 1.2M.");

        let meta = &turn.assistant.metadata;
        assert_eq!(meta["retrieved_from"], "elasticsearch_tool");
        assert_eq!(meta["tool_query"], "budget");
        assert_eq!(meta["tool_original_hits_count"], 3);
        assert_eq!(meta["tool_final_hits_count"], 3);
        assert_eq!(meta["tool_truncated"], false);
        assert_eq!(meta["tool_snippet_length"], 400);
        assert_eq!(meta["tool_hits_sample"].as_array().unwrap().len(), 3);

        let round2 = h.provider.request(1);
        assert_eq!(round2.mode, FunctionCallingMode::None);
        assert_eq!(round2.contents.len(), 3);
        assert_eq!(
            round2.contents[1],
            Content::Opaque(json!({ "role": "model", "parts": [
                { "functionCall": { "name": SEARCH_TOOL_NAME, "args": { "query": "budget" } } }
            ]}))
        );
        let Content::Turn(function_turn) = &round2.contents[2] else {
            panic!("expected a function response turn");
        };
        assert_eq!(function_turn.role, "function");
        assert!(round2
            .system_instruction
            .unwrap()
            .contains("grounding source"));

        let messages = h.store.list_messages(&h.conversation_id).await.unwrap();
        assert_single_pair(&messages, &turn);
    }

    #[tokio::test]
    async fn missing_candidate_content_is_synthesized() {
        let h = harness(
            vec![
                Ok(json!({ "functionCalls": [{ "name": SEARCH_TOOL_NAME, "args": { "query": "notes" } }] })),
                Ok(json!({ "text": "Found it." })),
            ],
            FakeSearch::returning(vec![hit("a", "notes")]),
        )
        .await;

        h.orchestrator
            .handle_user_message(&h.conversation_id, "find my notes", json!({}))
            .await
            .unwrap();

        let round2 = h.provider.request(1);
        let Content::Turn(call_turn) = &round2.contents[1] else {
            panic!("expected a synthesized model turn");
        };
        assert_eq!(call_turn.role, "model");
    }

    #[tokio::test]
    async fn candidate_without_the_call_is_not_replayed() {
        let h = harness(
            vec![
                Ok(json!({ "candidates": [{
                    "functionCall": { "name": SEARCH_TOOL_NAME, "args": { "query": "budget" } },
                    "content": { "parts": [{ "text": "let me check" }] }
                }]})),
                text_response("The budget is 1.2M."),
            ],
            FakeSearch::returning(vec![hit("a", "Budget is 1.2M")]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "What is our budget?", json!({}))
            .await
            .unwrap();
        assert_eq!(turn.assistant.content, "The budget is 1.2M.");

        let round2 = h.provider.request(1);
        let Content::Turn(call_turn) = &round2.contents[1] else {
            panic!("expected a synthesized model turn");
        };
        assert_eq!(call_turn.role, "model");
        let Part::FunctionCall { function_call } = &call_turn.parts[0] else {
            panic!("expected a function call part");
        };
        assert_eq!(function_call.name, SEARCH_TOOL_NAME);
        assert_eq!(function_call.args["query"], "budget");
    }

    #[tokio::test]
    async fn replayed_candidate_gets_model_role() {
        let h = harness(
            vec![
                Ok(json!({ "candidates": [{ "content": { "parts": [
                    { "functionCall": { "name": SEARCH_TOOL_NAME, "args": { "query": "budget" } } }
                ]}}]})),
                text_response("ok"),
            ],
            FakeSearch::returning(vec![hit("a", "Budget")]),
        )
        .await;

        h.orchestrator
            .handle_user_message(&h.conversation_id, "budget?", json!({}))
            .await
            .unwrap();

        assert_eq!(
            h.provider.request(1).contents[1],
            Content::Opaque(json!({ "role": "model", "parts": [
                { "functionCall": { "name": SEARCH_TOOL_NAME, "args": { "query": "budget" } } }
            ]}))
        );
    }

    #[tokio::test]
    async fn search_failure_is_terminal() {
        let h = harness(
            vec![call_response(SEARCH_TOOL_NAME, json!({ "query": "budget" }))],
            FakeSearch::failing(),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "budget?", json!({}))
            .await
            .unwrap();

        assert_eq!(h.provider.calls(), 1);
        assert!(turn.assistant.content.contains("searching your documents failed"));
        assert_eq!(turn.assistant.metadata["retrieved_from"], "elasticsearch_error");
        assert_eq!(turn.assistant.metadata["tool_query"], "budget");

        let messages = h.store.list_messages(&h.conversation_id).await.unwrap();
        assert_single_pair(&messages, &turn);
    }

    #[tokio::test]
    async fn unknown_tool_skips_search() {
        let h = harness(
            vec![call_response("weather", json!({ "city": "Oslo" }))],
            FakeSearch::returning(vec![hit("a", "x")]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "weather in Oslo?", json!({}))
            .await
            .unwrap();

        assert!(turn.assistant.content.contains("unexpected function"));
        assert_eq!(turn.assistant.metadata["error"], "unexpected_function_call");
        assert_eq!(turn.assistant.metadata["function_name"], "weather");
        assert!(h.search.calls().is_empty());
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn missing_query_argument_is_diagnosed() {
        let h = harness(
            vec![call_response(SEARCH_TOOL_NAME, json!({ "query": "  " }))],
            FakeSearch::returning(vec![]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "search please", json!({}))
            .await
            .unwrap();

        assert_eq!(turn.assistant.metadata["error"], "missing_tool_argument");
        assert!(h.search.calls().is_empty());
    }

    #[tokio::test]
    async fn max_results_is_clamped() {
        for (args, expected) in [
            (json!({ "query": "q", "max_results": 500 }), 20),
            (json!({ "query": "q", "max_results": 0 }), 1),
            (json!({ "query": "q", "max_results": "3" }), 3),
            (json!({ "query": "q", "max_results": null }), 5),
        ] {
            let h = harness(
                vec![call_response(SEARCH_TOOL_NAME, args), text_response("done")],
                FakeSearch::returning(vec![]),
            )
            .await;

            h.orchestrator
                .handle_user_message(&h.conversation_id, "q", json!({}))
                .await
                .unwrap();

            assert_eq!(h.search.calls()[0].1, expected);
        }
    }

    #[tokio::test]
    async fn provider_failure_in_round_one_persists_apology() {
        let h = harness(vec![Err("unavailable".to_string())], FakeSearch::returning(vec![])).await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "hello", json!({}))
            .await
            .unwrap();

        assert_eq!(turn.assistant.content, PROVIDER_FAILURE_TEXT);
        assert_eq!(turn.assistant.metadata["error"], "provider_error");
        assert_eq!(turn.assistant.metadata["retrieved_from"], "none");

        let messages = h.store.list_messages(&h.conversation_id).await.unwrap();
        assert_single_pair(&messages, &turn);
    }

    #[tokio::test]
    async fn provider_failure_in_round_two_keeps_tool_stats() {
        let h = harness(
            vec![
                call_response(SEARCH_TOOL_NAME, json!({ "query": "budget" })),
                Err("overloaded".to_string()),
            ],
            FakeSearch::returning(vec![hit("a", "numbers")]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "budget?", json!({}))
            .await
            .unwrap();

        assert_eq!(turn.assistant.content, PROVIDER_FAILURE_TEXT);
        assert_eq!(turn.assistant.metadata["error"], "provider_error");
        assert_eq!(turn.assistant.metadata["retrieved_from"], "elasticsearch_tool");
        assert_eq!(turn.assistant.metadata["tool_original_hits_count"], 1);
    }

    #[tokio::test]
    async fn resubmission_creates_a_new_pair() {
        let h = harness(
            vec![text_response("first"), text_response("second")],
            FakeSearch::returning(vec![]),
        )
        .await;

        let first = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "same question", json!({}))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "same question", json!({}))
            .await
            .unwrap();

        assert_ne!(first.user.pair_id, second.user.pair_id);
        assert_eq!(h.store.list_messages(&h.conversation_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn user_insert_failure_aborts_before_any_model_call() {
        let store = Arc::new(FlakyStore {
            inner: sqlite_store().await,
            fail_user_insert: true,
            fail_assistant_insert: false,
            fail_history: false,
        });
        let inner_view = store.inner.clone();
        let h = harness_with(
            store,
            ScriptedProvider::new(vec![text_response("unused")]),
            FakeSearch::returning(vec![]),
        )
        .await;

        let err = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "hello", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Persistence(_)));
        assert_eq!(h.provider.calls(), 0);
        assert!(h.search.calls().is_empty());
        assert!(inner_view.list_messages(&h.conversation_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpersisted_reply_is_still_returned() {
        let store = Arc::new(FlakyStore {
            inner: sqlite_store().await,
            fail_user_insert: false,
            fail_assistant_insert: true,
            fail_history: false,
        });
        let h = harness_with(
            store,
            ScriptedProvider::new(vec![text_response("generated")]),
            FakeSearch::returning(vec![]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "hello", json!({}))
            .await
            .unwrap();

        let pair_id = turn.user.pair_id.clone().unwrap();
        assert_eq!(turn.assistant.id, format!("temp-{pair_id}"));
        assert_eq!(turn.assistant.content, "generated");
        assert_eq!(turn.assistant.metadata["persisted"], false);
        assert_eq!(h.store.list_messages(&h.conversation_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_failure_degrades_to_apology() {
        let store = Arc::new(FlakyStore {
            inner: sqlite_store().await,
            fail_user_insert: false,
            fail_assistant_insert: false,
            fail_history: true,
        });
        let inner_view = store.inner.clone();
        let h = harness_with(
            store,
            ScriptedProvider::new(vec![text_response("unused")]),
            FakeSearch::returning(vec![]),
        )
        .await;

        let turn = h
            .orchestrator
            .handle_user_message(&h.conversation_id, "hello", json!({}))
            .await
            .unwrap();

        assert_eq!(h.provider.calls(), 0);
        assert_eq!(turn.assistant.content, HISTORY_FAILURE_TEXT);
        assert_eq!(turn.assistant.metadata["error"], "history_unavailable");
        assert_eq!(inner_view.list_messages(&h.conversation_id).await.unwrap().len(), 2);
    }
}
