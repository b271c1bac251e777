use serde_json::json;

use crate::llm::FunctionDeclaration;

pub const SEARCH_TOOL_NAME: &str = "search_documents";

pub const PROVIDER_FAILURE_TEXT: &str = "I'm sorry — I couldn't generate a response right now.";
pub const EMPTY_REPLY_TEXT: &str = "Sorry — the assistant produced no textual reply.";
pub const HISTORY_FAILURE_TEXT: &str =
    "I'm sorry, I couldn't load this conversation's history, so I can't answer right now.";

pub fn system_instruction() -> String {
    format!(
        "You are QueryNest, a helpful assistant for questions about the user's uploaded documents.\n\
Answer clearly and concisely.\n\
Call the `{tool}` tool whenever the question may depend on the user's own documents \
(files, reports, notes, scans). Do not guess their contents.\n\
For general questions that do not involve the user's documents, answer directly without calling any tool.",
        tool = SEARCH_TOOL_NAME
    )
}

/// Appended to the system instruction for the round that carries tool output.
pub fn grounding_instruction() -> String {
    format!(
        "{}\n\n\
The `{tool}` results are provided in the conversation as a function response. \
Use them as the grounding source for your answer and cite document titles where relevant. \
If the results do not contain the answer, say so plainly instead of inventing one.",
        system_instruction(),
        tool = SEARCH_TOOL_NAME
    )
}

pub fn search_tool_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Full-text search over the documents the user has uploaded. \
Returns the best matching passages with their titles."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search terms describing what to look for."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of documents to return."
                }
            },
            "required": ["query"]
        }),
    }
}

pub fn unexpected_function_text(name: &str) -> String {
    format!(
        "I tried to call an unexpected function (`{}`), so I couldn't complete this request.",
        name
    )
}

pub fn missing_query_text() -> String {
    format!(
        "I tried to search your documents but no search query was provided to `{}`. Please rephrase your question.",
        SEARCH_TOOL_NAME
    )
}

pub fn search_failure_text() -> &'static str {
    "I'm sorry, searching your documents failed, so I can't give a grounded answer right now. Please try again."
}
