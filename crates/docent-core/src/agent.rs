//! The bounded answering loop.
//!
//! Each pass shows the language model the conversation so far, the
//! evidence gathered, the actions already taken and the document
//! directory, and asks it to pick exactly one action:
//!
//! | Action | Effect |
//! |--------|--------|
//! | `QUERY_DOCS` | retrieve chunks, append them as `<SOURCE>` blocks, loop |
//! | `INVALID` | stop with a fixed refusal |
//! | `QUESTION` | stop and return the clarifying question |
//! | `RESPOND` | stop and return the answer with citations linked |
//!
//! The loop makes at most [`AgentConfig::max_iterations`] decisions. The
//! last permitted pass tells the model it must answer now; if it still
//! does not, the loop stops with a fixed fallback instead of calling the
//! model again.

use thiserror::Error;

use crate::capability::{CompletionError, DocumentCatalog, LanguageModel, Retriever};
use crate::citation::CitationLinker;
use crate::models::{DocFilter, Document, SearchHit};
use crate::tags::get_tag;

pub const INVALID_REPLY: &str = "I'm sorry, I cannot help with that question.";
pub const EXHAUSTED_REPLY: &str =
    "I'm sorry, I could not determine a valid response within the time limit.";
pub const UNAVAILABLE_REPLY: &str =
    "I'm sorry, the service is temporarily unavailable. Please try again in a moment.";

/// Request-scoped failures of the loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model chose an unknown action: {0:?}")]
    UnknownAction(String),
    #[error("language model call failed: {0}")]
    Decision(String),
    #[error("document catalog unavailable: {0}")]
    Catalog(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

/// One parsed decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAction {
    QueryDocs {
        filter: DocFilter,
        search_text: String,
    },
    Invalid,
    Question {
        text: String,
    },
    Respond {
        answer: String,
    },
}

impl AgentAction {
    /// Parse a decision response. Missing fields read as empty; an
    /// `ACTION` outside the four known labels is an error.
    pub fn parse(response: &str) -> Result<Self, AgentError> {
        let label = get_tag(response, "ACTION");
        match label.trim() {
            "QUERY_DOCS" => Ok(AgentAction::QueryDocs {
                filter: DocFilter::from_docs_tag(&get_tag(response, "DOCS")),
                search_text: get_tag(response, "SEARCH_FOR").trim().to_string(),
            }),
            "INVALID" => Ok(AgentAction::Invalid),
            "QUESTION" => Ok(AgentAction::Question {
                text: get_tag(response, "QUESTION"),
            }),
            "RESPOND" => Ok(AgentAction::Respond {
                answer: get_tag(response, "ANSWER"),
            }),
            other => Err(AgentError::UnknownAction(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgentAction::QueryDocs { .. } => "QUERY_DOCS",
            AgentAction::Invalid => "INVALID",
            AgentAction::Question { .. } => "QUESTION",
            AgentAction::Respond { .. } => "RESPOND",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on decision calls per request.
    pub max_iterations: usize,
    /// Chunks retrieved per `QUERY_DOCS`.
    pub result_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            result_limit: 5,
        }
    }
}

/// Mutable state of one request.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub conversation_history: String,
    pub accumulated_context: String,
    pub action_log: String,
    pub iteration_count: usize,
}

impl AgentState {
    pub fn new(conversation_history: &str) -> Self {
        Self {
            conversation_history: conversation_history.to_string(),
            ..Default::default()
        }
    }

    fn log(&mut self, line: &str) {
        if !self.action_log.is_empty() {
            self.action_log.push('\n');
        }
        self.action_log.push_str(line);
    }

    fn add_sources(&mut self, hits: &[SearchHit]) {
        for hit in hits {
            self.accumulated_context.push_str(&format!(
                "<SOURCE doc_file_name='{}' page='{}'>\n{}\n</SOURCE>\n",
                hit.file_name, hit.page, hit.text
            ));
        }
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Invalid,
    Clarification,
    Exhausted,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub outcome: Outcome,
    /// Decisions made before stopping.
    pub iterations: usize,
}

/// One line per document: `doc_name:'N' (manufacturer model): description`.
pub fn format_directory(docs: &[Document]) -> String {
    docs.iter()
        .map(|doc| {
            let mut line = format!("doc_name:'{}'", doc.display_name());
            let product = format!("{} {}", doc.manufacturer.trim(), doc.model.trim());
            if !product.trim().is_empty() {
                line.push_str(&format!(" ({})", product.trim()));
            }
            let description = doc.doc_description.trim();
            if !description.is_empty() {
                line.push_str(&format!(": {}", description));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const LAST_ATTEMPT_WARNING: &str = "#### LAST ATTEMPT\n\
This is your final attempt: you must choose <ACTION>RESPOND</ACTION> now. \
If <VALID_SOURCES_YOU_REQUESTED_BEFORE> and <CONVERSATION_HISTORY> do not \
hold what is needed, say what you found and what you could not find.";

/// Assemble the decision prompt for one pass.
pub fn build_prompt(query: &str, state: &AgentState, directory: &str, last_attempt: bool) -> String {
    let warning = if last_attempt { LAST_ATTEMPT_WARNING } else { "" };
    format!(
        r#"# Document Assistant

<CONVERSATION_HISTORY>
{history}
</CONVERSATION_HISTORY>

<LIST_OF_PREVIOUS_ACTIONS_YOU_REQUESTED>
{actions}
</LIST_OF_PREVIOUS_ACTIONS_YOU_REQUESTED>

<USER_QUERY>
{query}
</USER_QUERY>

<AVAILABLE_DOCS>
{directory}
</AVAILABLE_DOCS>

<VALID_SOURCES_YOU_REQUESTED_BEFORE>
{context}
</VALID_SOURCES_YOU_REQUESTED_BEFORE>

## TASK
You help technicians find information in the documents listed in <AVAILABLE_DOCS>.
Work out what the user needs from <USER_QUERY> and <CONVERSATION_HISTORY>, then choose EXACTLY ONE action:

A. QUERY_DOCS: more evidence is needed.
   - Put the relevant doc_name values from <AVAILABLE_DOCS> in <DOCS>, separated by |, or * to search every document.
   - Put the text to search for in <SEARCH_FOR>.
B. INVALID: the query is unrelated to the available documents or misuses the assistant.
C. QUESTION: the query is relevant but ambiguous. Put one precise clarifying question in <QUESTION>.
D. RESPOND: <VALID_SOURCES_YOU_REQUESTED_BEFORE> or <CONVERSATION_HISTORY> is enough to answer.
   - Put a complete, concise markdown answer in <ANSWER>.
   - Use only information from the tagged sections above. Never invent facts.
   - Quote and cite sources as <SOURCE doc_file_name='file.pdf' page='12'>quoted text</SOURCE>.

## RESPONSE FORMAT
One of:

<DOCS>name|name or *</DOCS>
<SEARCH_FOR>search text</SEARCH_FOR>
<ACTION>QUERY_DOCS</ACTION>

<ACTION>INVALID</ACTION>

<QUESTION>clarifying question</QUESTION>
<ACTION>QUESTION</ACTION>

<ANSWER>markdown answer with <SOURCE ...> citations</ANSWER>
<ACTION>RESPOND</ACTION>

{warning}
"#,
        history = state.conversation_history,
        actions = state.action_log,
        query = query,
        directory = directory,
        context = state.accumulated_context,
        warning = warning,
    )
}

/// The answering loop over injected collaborators.
pub struct Agent<'a> {
    pub model: &'a dyn LanguageModel,
    pub catalog: &'a dyn DocumentCatalog,
    pub retriever: &'a dyn Retriever,
    pub linker: &'a CitationLinker,
    pub config: AgentConfig,
}

impl Agent<'_> {
    /// Answer `query` in the context of `history`.
    pub async fn run(&self, query: &str, history: &str) -> Result<AgentReply, AgentError> {
        let mut state = AgentState::new(history);
        loop {
            if state.iteration_count >= self.config.max_iterations {
                tracing::warn!(
                    iterations = state.iteration_count,
                    "iteration bound reached without a final action"
                );
                return Ok(reply(EXHAUSTED_REPLY, Outcome::Exhausted, &state));
            }

            let docs = self
                .catalog
                .list_documents()
                .await
                .map_err(|e| AgentError::Catalog(e.to_string()))?;
            let last_attempt = state.iteration_count + 1 == self.config.max_iterations;
            let prompt = build_prompt(query, &state, &format_directory(&docs), last_attempt);

            let response = match self.model.complete(&prompt).await {
                Ok(r) => r,
                Err(CompletionError::AllBackendsThrottled | CompletionError::RateLimited) => {
                    tracing::warn!("all language model backends throttled");
                    return Ok(reply(UNAVAILABLE_REPLY, Outcome::Unavailable, &state));
                }
                Err(CompletionError::Backend(msg)) => return Err(AgentError::Decision(msg)),
            };
            tracing::debug!(response = %response, "decision response");

            let action = AgentAction::parse(&response);
            state.iteration_count += 1;
            let action = match action {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!(error = %e, "unparseable decision");
                    return Err(e);
                }
            };
            state.log(action.label());
            tracing::info!(
                iteration = state.iteration_count,
                action = action.label(),
                "agent action"
            );

            match action {
                AgentAction::QueryDocs {
                    filter,
                    search_text,
                } => {
                    if state.iteration_count >= self.config.max_iterations {
                        tracing::warn!(
                            iterations = state.iteration_count,
                            "final pass asked for more documents"
                        );
                        return Ok(reply(EXHAUSTED_REPLY, Outcome::Exhausted, &state));
                    }
                    let hits = self
                        .retriever
                        .retrieve(&search_text, &filter, self.config.result_limit)
                        .await
                        .map_err(|e| AgentError::Retrieval(e.to_string()))?;
                    tracing::info!(
                        search = %search_text,
                        docs = %filter,
                        results = hits.len(),
                        "retrieval"
                    );
                    if hits.is_empty() {
                        state.log(&format!(
                            "You searched for: '{}' in these docs: [{}], nothing similar found.",
                            search_text, filter
                        ));
                    } else {
                        state.add_sources(&hits);
                        state.log(&format!(
                            "You searched for: '{}' in these docs: [{}], the results are in <VALID_SOURCES_YOU_REQUESTED_BEFORE>.",
                            search_text, filter
                        ));
                    }
                }
                AgentAction::Invalid => {
                    return Ok(reply(INVALID_REPLY, Outcome::Invalid, &state));
                }
                AgentAction::Question { text } => {
                    state.log(&format!(
                        "You asked the user to answer this question: '{}'",
                        text
                    ));
                    return Ok(reply(&text, Outcome::Clarification, &state));
                }
                AgentAction::Respond { answer } => {
                    let linked = self.linker.link(&answer).await;
                    return Ok(reply(&linked, Outcome::Answered, &state));
                }
            }
        }
    }
}

fn reply(text: &str, outcome: Outcome, state: &AgentState) -> AgentReply {
    AgentReply {
        text: text.to_string(),
        outcome,
        iterations: state.iteration_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LinkResolver;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedModel {
        replies: Mutex<VecDeque<std::result::Result<String, CompletionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<std::result::Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn always(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string()); 20])
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Backend("script exhausted".into())))
        }
    }

    struct StaticCatalog(Vec<Document>);

    #[async_trait]
    impl DocumentCatalog for StaticCatalog {
        async fn list_documents(&self) -> Result<Vec<Document>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingRetriever {
        hits: Vec<SearchHit>,
        calls: Mutex<Vec<(String, DocFilter, usize)>>,
    }

    #[async_trait]
    impl Retriever for RecordingRetriever {
        async fn retrieve(
            &self,
            search_text: &str,
            filter: &DocFilter,
            limit: usize,
        ) -> Result<Vec<SearchHit>> {
            self.calls
                .lock()
                .unwrap()
                .push((search_text.to_string(), filter.clone(), limit));
            Ok(self.hits.clone())
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl LinkResolver for FixedResolver {
        async fn resolve(&self, file_name: &str, _expiry_secs: u64) -> Result<String> {
            Ok(format!("https://files.example/{}", file_name))
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog(vec![Document {
            file_name: "pump.pdf".to_string(),
            doc_name: "Pump Manual".to_string(),
            doc_type: "service_manual".to_string(),
            doc_description: "Service procedures for the P-9 pump.".to_string(),
            manufacturer: "Acme".to_string(),
            model: "P-9".to_string(),
        }])
    }

    fn hit() -> SearchHit {
        SearchHit {
            id: "c1".to_string(),
            file_name: "pump.pdf".to_string(),
            doc_name: "Pump Manual".to_string(),
            page: 4,
            text: "Torque the housing bolts to 40 Nm.".to_string(),
            vector_score: 0.02,
            fulltext_score: 0.0,
            score: 0.02,
        }
    }

    async fn run_with(
        model: &ScriptedModel,
        retriever: &RecordingRetriever,
    ) -> Result<AgentReply, AgentError> {
        let linker = CitationLinker::new(Arc::new(FixedResolver), 3600);
        let catalog = catalog();
        let agent = Agent {
            model,
            catalog: &catalog,
            retriever,
            linker: &linker,
            config: AgentConfig::default(),
        };
        agent.run("What torque for the housing bolts?", "").await
    }

    #[test]
    fn test_parse_query_docs() {
        let action = AgentAction::parse(
            "<DOCS>Pump Manual | Valve Guide</DOCS><SEARCH_FOR> bolt torque </SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>",
        )
        .unwrap();
        assert_eq!(
            action,
            AgentAction::QueryDocs {
                filter: DocFilter::Only(vec!["Pump Manual".into(), "Valve Guide".into()]),
                search_text: "bolt torque".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_missing_action_is_unknown() {
        assert!(matches!(
            AgentAction::parse("I think the answer is 40 Nm."),
            Err(AgentError::UnknownAction(a)) if a.is_empty()
        ));
    }

    #[test]
    fn test_format_directory() {
        let mut docs = catalog().0;
        docs.push(Document {
            file_name: "notes.txt".to_string(),
            ..Default::default()
        });
        assert_eq!(
            format_directory(&docs),
            "doc_name:'Pump Manual' (Acme P-9): Service procedures for the P-9 pump.\ndoc_name:'notes.txt'"
        );
    }

    #[tokio::test]
    async fn test_wildcard_docs_retrieve_unrestricted() {
        let model = ScriptedModel::new(vec![
            Ok("<DOCS>*</DOCS><SEARCH_FOR>bolt torque</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>".into()),
            Ok("<ANSWER>40 Nm</ANSWER><ACTION>RESPOND</ACTION>".into()),
        ]);
        let retriever = RecordingRetriever::default();
        run_with(&model, &retriever).await.unwrap();
        let calls = retriever.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("bolt torque".to_string(), DocFilter::All, 5));
    }

    #[tokio::test]
    async fn test_unknown_action_is_fatal_and_distinct_from_invalid() {
        let model = ScriptedModel::new(vec![Ok("<ACTION>BOGUS</ACTION>".into())]);
        let err = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownAction(ref a) if a == "BOGUS"));
    }

    #[tokio::test]
    async fn test_invalid_returns_fixed_reply() {
        let model = ScriptedModel::new(vec![Ok("<ACTION>INVALID</ACTION>".into())]);
        let reply = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap();
        assert_eq!(reply.text, INVALID_REPLY);
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert_eq!(reply.iterations, 1);
    }

    #[tokio::test]
    async fn test_question_returned_verbatim() {
        let model = ScriptedModel::new(vec![Ok(
            "<QUESTION>Which pump model do you have?</QUESTION><ACTION>QUESTION</ACTION>".into(),
        )]);
        let reply = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap();
        assert_eq!(reply.text, "Which pump model do you have?");
        assert_eq!(reply.outcome, Outcome::Clarification);
    }

    #[tokio::test]
    async fn test_endless_queries_stop_after_bound() {
        let model = ScriptedModel::always(
            "<DOCS>*</DOCS><SEARCH_FOR>torque</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>",
        );
        let retriever = RecordingRetriever::default();
        let reply = run_with(&model, &retriever).await.unwrap();
        assert_eq!(reply.text, EXHAUSTED_REPLY);
        assert_eq!(reply.outcome, Outcome::Exhausted);
        assert_eq!(reply.iterations, 6);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 6);
        assert!(prompts[..5].iter().all(|p| !p.contains("LAST ATTEMPT")));
        assert!(prompts[5].contains("LAST ATTEMPT"));
        assert_eq!(retriever.calls.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_logged_for_next_pass() {
        let model = ScriptedModel::new(vec![
            Ok("<DOCS>Pump Manual</DOCS><SEARCH_FOR>gasket</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>".into()),
            Ok("<ACTION>INVALID</ACTION>".into()),
        ]);
        let reply = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap();
        assert_eq!(reply.text, INVALID_REPLY);
        assert_eq!(reply.outcome, Outcome::Invalid);
        let prompts = model.prompts();
        assert!(prompts[1].contains(
            "You searched for: 'gasket' in these docs: [Pump Manual], nothing similar found."
        ));
    }

    #[tokio::test]
    async fn test_invalid_after_sources_with_history() {
        let model = ScriptedModel::new(vec![
            Ok("<DOCS>*</DOCS><SEARCH_FOR>torque</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>".into()),
            Ok("<ACTION>INVALID</ACTION>".into()),
        ]);
        let retriever = RecordingRetriever {
            hits: vec![hit()],
            ..Default::default()
        };
        let linker = CitationLinker::new(Arc::new(FixedResolver), 3600);
        let catalog = catalog();
        let agent = Agent {
            model: &model,
            catalog: &catalog,
            retriever: &retriever,
            linker: &linker,
            config: AgentConfig::default(),
        };
        let reply = agent
            .run(
                "And the impeller?",
                "user: What torque for the housing bolts?\nassistant: 40 Nm.",
            )
            .await
            .unwrap();
        assert_eq!(reply.text, INVALID_REPLY);
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert_eq!(reply.iterations, 2);
        assert!(model.prompts()[1].contains("<SOURCE doc_file_name='pump.pdf' page='4'>"));
    }

    #[tokio::test]
    async fn test_sources_accumulate_and_answer_is_linked() {
        let model = ScriptedModel::new(vec![
            Ok("<DOCS>*</DOCS><SEARCH_FOR>torque</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>".into()),
            Ok("<DOCS>*</DOCS><SEARCH_FOR>bolts</SEARCH_FOR><ACTION>QUERY_DOCS</ACTION>".into()),
            Ok("<ANSWER>Use <SOURCE doc_file_name='pump.pdf' page='4'>40 Nm</SOURCE>.</ANSWER><ACTION>RESPOND</ACTION>".into()),
        ]);
        let retriever = RecordingRetriever {
            hits: vec![hit()],
            ..Default::default()
        };
        let reply = run_with(&model, &retriever).await.unwrap();
        assert_eq!(
            reply.text,
            "Use 40 Nm [source 📄](https://files.example/pump.pdf#page=4)."
        );
        assert_eq!(reply.outcome, Outcome::Answered);

        let prompts = model.prompts();
        assert!(prompts[1].contains("<SOURCE doc_file_name='pump.pdf' page='4'>"));
        assert_eq!(
            prompts[2]
                .matches("<SOURCE doc_file_name='pump.pdf' page='4'>")
                .count(),
            2
        );
        assert!(prompts[2].contains("QUERY_DOCS\nYou searched for: 'torque'"));
    }

    #[tokio::test]
    async fn test_throttled_backends_give_unavailable_reply() {
        let model = ScriptedModel::new(vec![Err(CompletionError::AllBackendsThrottled)]);
        let reply = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap();
        assert_eq!(reply.text, UNAVAILABLE_REPLY);
        assert_eq!(reply.outcome, Outcome::Unavailable);
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal() {
        let model = ScriptedModel::new(vec![Err(CompletionError::Backend("401".into()))]);
        let err = run_with(&model, &RecordingRetriever::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Decision(ref m) if m == "401"));
    }
}
