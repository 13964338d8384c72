//! Natural language to SQL translation
//!
//! The model's answer is passed through as-is apart from whitespace and an
//! optional surrounding markdown fence. Nothing here parses or checks the SQL;
//! a bad column name surfaces later as an execution error.

use hsaql_schema::SchemaDescriptor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::llm::{CompletionProvider, LlmError, Prompt};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Error generating SQL query: {0}")]
    Provider(#[from] LlmError),

    #[error("Error generating SQL query: model did not answer within {} s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("Error generating SQL query: model returned no SQL")]
    EmptyCompletion,
}

pub struct QueryTranslator {
    provider: Arc<dyn CompletionProvider>,
    schema: &'static SchemaDescriptor,
    timeout: Duration,
}

impl QueryTranslator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        schema: &'static SchemaDescriptor,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            schema,
            timeout,
        }
    }

    pub fn schema(&self) -> &'static SchemaDescriptor {
        self.schema
    }

    /// Ask the model for a single SQL statement answering `question`
    pub async fn translate(&self, question: &str) -> Result<String, TranslationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TranslationError::EmptyQuestion);
        }

        let prompt = build_prompt(self.schema, question);
        let started = Instant::now();

        let completion = tokio::time::timeout(self.timeout, self.provider.generate_completion(&prompt))
            .await
            .map_err(|_| TranslationError::Timeout(self.timeout))??;

        let sql = clean_completion(&completion);
        if sql.is_empty() {
            return Err(TranslationError::EmptyCompletion);
        }

        crate::log_event!(
            level: tracing::Level::INFO,
            event: "sql_generated",
            duration_ms: started.elapsed().as_millis(),
            sql: sql
        );

        Ok(sql)
    }
}

pub fn build_prompt(schema: &SchemaDescriptor, question: &str) -> Prompt {
    let system = format!(
        "You are an assistant that converts natural language queries into SQL queries for the '{}' table. \
         Ensure the SQL query is syntactically correct and uses only the columns provided in the schema. \
         Respond with the SQL statement only.",
        schema.table()
    );

    let user = format!(
        "Schema:\n{}\n\nQuery:\n\"{}\"\n\nSQL:",
        schema.to_prompt_json(),
        question
    );

    Prompt { system, user }
}

/// Trim the completion and unwrap it if the whole answer is one ``` block
fn clean_completion(text: &str) -> String {
    let trimmed = text.trim();

    let inner = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map(|body| body.strip_prefix("sql").unwrap_or(body));

    inner.unwrap_or(trimmed).trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use hsaql_schema::get_schema;
    use std::sync::Mutex;

    /// Deterministic stand-in for the hosted model
    pub(crate) enum StubProvider {
        Reply(String),
        Fail,
        Hang,
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn generate_completion(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            match self {
                StubProvider::Reply(text) => Ok(text.clone()),
                StubProvider::Fail => Err(LlmError::EmptyResponse),
                StubProvider::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("SELECT 1".to_string())
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        prompts: Mutex<Vec<Prompt>>,
    }

    #[async_trait]
    impl CompletionProvider for RecordingProvider {
        async fn generate_completion(&self, prompt: &Prompt) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok("SELECT COUNT(*) FROM hsa_data".to_string())
        }
    }

    pub(crate) fn translator(provider: StubProvider) -> QueryTranslator {
        QueryTranslator::new(Arc::new(provider), get_schema(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_translate_returns_trimmed_sql() {
        let translator = translator(StubProvider::Reply(
            "\n  SELECT * FROM hsa_data WHERE total_days_of_care > 40 LIMIT 30;  \n".to_string(),
        ));

        let sql = translator.translate("long stays").await.unwrap();

        assert_eq!(sql, "SELECT * FROM hsa_data WHERE total_days_of_care > 40 LIMIT 30;");
    }

    #[tokio::test]
    async fn test_translate_strips_code_fence() {
        let translator = translator(StubProvider::Reply(
            "```sql\nSELECT zip_cd_of_residence FROM hsa_data\n```".to_string(),
        ));

        let sql = translator.translate("zips").await.unwrap();

        assert_eq!(sql, "SELECT zip_cd_of_residence FROM hsa_data");
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_error() {
        let translator = translator(StubProvider::Fail);

        let err = translator.translate("anything").await.unwrap_err();

        assert!(matches!(err, TranslationError::Provider(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let translator = translator(StubProvider::Hang);
        let started = Instant::now();

        let err = translator.translate("anything").await.unwrap_err();

        assert!(matches!(err, TranslationError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_blank_completion_is_error() {
        let translator = translator(StubProvider::Reply("   \n".to_string()));

        let err = translator.translate("anything").await.unwrap_err();

        assert!(matches!(err, TranslationError::EmptyCompletion));
    }

    #[tokio::test]
    async fn test_blank_question_skips_provider() {
        let recorder = Arc::new(RecordingProvider::default());
        let translator = QueryTranslator::new(recorder.clone(), get_schema(), Duration::from_secs(1));

        let err = translator.translate("   ").await.unwrap_err();

        assert!(matches!(err, TranslationError::EmptyQuestion));
        assert!(recorder.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_carries_schema_and_question() {
        let recorder = Arc::new(RecordingProvider::default());
        let translator = QueryTranslator::new(recorder.clone(), get_schema(), Duration::from_secs(1));

        translator
            .translate("Calculate the average total_charges by zip_cd_of_residence")
            .await
            .unwrap();

        let prompts = recorder.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].system.contains("'hsa_data'"));
        assert!(prompts[0].user.contains("\"column_name\": \"zip_cd_of_residence\""));
        assert!(prompts[0]
            .user
            .contains("Query:\n\"Calculate the average total_charges by zip_cd_of_residence\""));
        assert!(prompts[0].user.ends_with("SQL:"));
    }

    #[tokio::test]
    async fn test_exactly_one_outcome() {
        let cases = vec![
            StubProvider::Reply("SELECT 1".to_string()),
            StubProvider::Reply(String::new()),
            StubProvider::Fail,
        ];

        for provider in cases {
            match translator(provider).translate("how many cases?").await {
                Ok(sql) => assert!(!sql.is_empty()),
                Err(e) => assert!(!e.to_string().is_empty()),
            }
        }
    }

    #[test]
    fn test_clean_completion_leaves_plain_sql() {
        assert_eq!(clean_completion("  SELECT 1 "), "SELECT 1");
        assert_eq!(clean_completion("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(clean_completion("```SELECT 1```"), "SELECT 1");
        assert_eq!(clean_completion("```sql SELECT 1"), "```sql SELECT 1");
        assert_eq!(
            clean_completion("SELECT '```' AS fence FROM hsa_data"),
            "SELECT '```' AS fence FROM hsa_data"
        );
    }
}
