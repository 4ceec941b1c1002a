use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation tool unreachable")]
    Unreachable,
    #[error("annotation tool unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("annotation tool returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("unexpected annotation tool response: {0}")]
    Decode(String),
}

impl AnnotationError {
    /// Connectivity problems degrade a sync to `is_available = false`;
    /// anything else surfaces as an external-service error.
    pub fn is_unreachable(&self) -> bool {
        match self {
            AnnotationError::Unreachable => true,
            AnnotationError::Transport(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// An annotation pulled back from the external tool, keyed by the external
/// task id it belongs to.
#[derive(Debug, Clone)]
pub struct ExternalAnnotation {
    pub task_id: i32,
    pub annotation_id: i64,
    pub result: Value,
}

#[async_trait]
pub trait AnnotationBackend: Send + Sync + 'static {
    async fn create_project(
        &self,
        title: &str,
        description: &str,
        label_config: &str,
    ) -> AnnotationResult<i32>;

    async fn import_tasks(&self, project_id: i32, items: Vec<Value>) -> AnnotationResult<Vec<i32>>;

    async fn list_annotations(&self, project_id: i32) -> AnnotationResult<Vec<ExternalAnnotation>>;

    async fn delete_project(&self, project_id: i32) -> AnnotationResult<()>;

    fn project_url(&self, project_id: i32) -> Option<String>;
}

pub struct LabelStudio {
    client: Client,
    base_url: String,
    api_key: String,
}

impl LabelStudio {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_key)
    }

    async fn check_response(response: reqwest::Response) -> AnnotationResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AnnotationError::Api { status, body })
        }
    }
}

#[async_trait]
impl AnnotationBackend for LabelStudio {
    async fn create_project(
        &self,
        title: &str,
        description: &str,
        label_config: &str,
    ) -> AnnotationResult<i32> {
        #[derive(Deserialize)]
        struct CreatedProject {
            id: i32,
        }

        let response = self
            .client
            .post(format!("{}/api/projects", self.base_url))
            .header("authorization", self.auth_header())
            .json(&json!({
                "title": title,
                "description": description,
                "label_config": label_config,
            }))
            .send()
            .await?;

        let created: CreatedProject = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|err| AnnotationError::Decode(err.to_string()))?;
        Ok(created.id)
    }

    async fn import_tasks(&self, project_id: i32, items: Vec<Value>) -> AnnotationResult<Vec<i32>> {
        #[derive(Deserialize)]
        struct ImportResult {
            task_ids: Vec<i32>,
        }

        let response = self
            .client
            .post(format!(
                "{}/api/projects/{}/import?return_task_ids=1",
                self.base_url, project_id
            ))
            .header("authorization", self.auth_header())
            .json(&items)
            .send()
            .await?;

        let imported: ImportResult = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|err| AnnotationError::Decode(err.to_string()))?;
        Ok(imported.task_ids)
    }

    async fn list_annotations(&self, project_id: i32) -> AnnotationResult<Vec<ExternalAnnotation>> {
        #[derive(Deserialize)]
        struct ExternalTask {
            id: i32,
            #[serde(default)]
            annotations: Vec<TaskAnnotation>,
        }

        #[derive(Deserialize)]
        struct TaskAnnotation {
            id: i64,
            #[serde(default)]
            result: Value,
        }

        let response = self
            .client
            .get(format!(
                "{}/api/projects/{}/tasks",
                self.base_url, project_id
            ))
            .header("authorization", self.auth_header())
            .send()
            .await?;

        let tasks: Vec<ExternalTask> = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|err| AnnotationError::Decode(err.to_string()))?;

        let annotations = tasks
            .into_iter()
            .flat_map(|task| {
                task.annotations
                    .into_iter()
                    .map(move |annotation| ExternalAnnotation {
                        task_id: task.id,
                        annotation_id: annotation.id,
                        result: annotation.result,
                    })
            })
            .collect();
        Ok(annotations)
    }

    async fn delete_project(&self, project_id: i32) -> AnnotationResult<()> {
        let response = self
            .client
            .delete(format!("{}/api/projects/{}", self.base_url, project_id))
            .header("authorization", self.auth_header())
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }

    fn project_url(&self, project_id: i32) -> Option<String> {
        Some(format!("{}/projects/{}", self.base_url, project_id))
    }
}

const CLASSIFICATION_CONFIG: &str = r#"<View>
  <Text name="text" value="$text"/>
  <Choices name="label" toName="text" choice="single">
    <Choice value="positive"/>
    <Choice value="negative"/>
    <Choice value="neutral"/>
  </Choices>
</View>"#;

const SENTIMENT_CONFIG: &str = r#"<View>
  <Text name="text" value="$text"/>
  <Choices name="sentiment" toName="text" choice="single">
    <Choice value="very_positive" alias="Very Positive"/>
    <Choice value="positive" alias="Positive"/>
    <Choice value="neutral" alias="Neutral"/>
    <Choice value="negative" alias="Negative"/>
    <Choice value="very_negative" alias="Very Negative"/>
  </Choices>
</View>"#;

const NER_CONFIG: &str = r##"<View>
  <Labels name="label" toName="text">
    <Label value="PER" background="#FF0000"/>
    <Label value="ORG" background="#00FF00"/>
    <Label value="LOC" background="#0000FF"/>
    <Label value="MISC" background="#FFFF00"/>
  </Labels>
  <Text name="text" value="$text"/>
</View>"##;

const TRANSCRIPTION_CONFIG: &str = r#"<View>
  <Audio name="audio" value="$audio"/>
  <TextArea name="transcription" toName="audio"
            rows="4" editable="true" maxSubmissions="1"/>
</View>"#;

const TRANSLATION_CONFIG: &str = r#"<View>
  <Text name="source_text" value="$text"/>
  <Header value="Translation"/>
  <TextArea name="translation" toName="source_text"
            rows="4" editable="true" maxSubmissions="1"/>
</View>"#;

/// Resolve the labeling view for a project. A custom config stored on the
/// project (under the `"xml"` key) wins; otherwise the annotation type picks
/// a stock template, falling back to classification for unknown types.
pub fn label_config_for(annotation_type: &str, custom: Option<&Value>) -> String {
    if let Some(xml) = custom
        .and_then(|config| config.get("xml"))
        .and_then(Value::as_str)
    {
        return xml.to_string();
    }

    match annotation_type {
        "sentiment" => SENTIMENT_CONFIG,
        "ner" => NER_CONFIG,
        "transcription" => TRANSCRIPTION_CONFIG,
        "translation" => TRANSLATION_CONFIG,
        _ => CLASSIFICATION_CONFIG,
    }
    .to_string()
}
