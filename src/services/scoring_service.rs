use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::policy::FallbackScoring;
use crate::models::section::PromptScore;
use crate::services::grading_service::GradingService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AnswerPayload {
    AudioBase64(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRequest {
    pub answer: AnswerPayload,
    pub prompt: String,
    pub task_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleScores {
    pub pronunciation: f64,
    pub fluency: f64,
    pub vocabulary: f64,
    pub grammar: f64,
    pub overall: f64,
    pub cefr_level: Option<String>,
    pub passed: bool,
}

impl OracleScores {
    pub fn into_prompt_score(self, prompt_index: usize, fallback: bool) -> PromptScore {
        PromptScore {
            prompt_index,
            pronunciation: self.pronunciation,
            fluency: self.fluency,
            vocabulary: self.vocabulary,
            grammar: self.grammar,
            overall: self.overall,
            cefr_level: self.cefr_level,
            fallback,
        }
    }
}

/// Scores spoken and written answers. Latency is unbounded; callers must not hold locks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn score(&self, request: ScoringRequest) -> Result<OracleScores>;
}

/// Scores used when the oracle cannot be reached.
pub fn fallback_scores(policy: FallbackScoring) -> OracleScores {
    match policy {
        FallbackScoring::Conservative => OracleScores {
            pronunciation: 0.0,
            fluency: 0.0,
            vocabulary: 0.0,
            grammar: 0.0,
            overall: 0.0,
            cefr_level: Some("A1".to_string()),
            passed: false,
        },
        FallbackScoring::Optimistic => OracleScores {
            pronunciation: 85.0,
            fluency: 80.0,
            vocabulary: 82.0,
            grammar: 78.0,
            overall: 81.0,
            cefr_level: Some("B2".to_string()),
            passed: true,
        },
    }
}

#[derive(Clone)]
pub struct OpenAiScoringOracle {
    client: Client,
    api_key: String,
    base_url: url::Url,
}

impl OpenAiScoringOracle {
    pub fn new(api_key: String, base_url: url::Url, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid scoring endpoint '{}': {}", path, e)))
    }

    async fn transcribe(&self, audio_base64: &str) -> Result<String> {
        let audio = base64::engine::general_purpose::STANDARD
            .decode(audio_base64)
            .map_err(|e| Error::BadRequest(format!("Invalid audio encoding: {}", e)))?;
        if audio.is_empty() {
            return Err(Error::BadRequest("Empty audio recording".to_string()));
        }

        #[derive(Deserialize)]
        struct Transcription {
            text: String,
        }

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("answer.webm")
            .mime_str("audio/webm")?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let resp = self
            .client
            .post(self.endpoint("audio/transcriptions")?)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::ScoringOracle(format!(
                "transcription failed with status {}",
                resp.status()
            )));
        }
        Ok(resp.json::<Transcription>().await?.text)
    }

    async fn assess(&self, answer: &str, prompt: &str, task_type: &str) -> Result<OracleScores> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: String,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            r#type: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            temperature: f32,
            response_format: ResponseFormat<'a>,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct RespChoiceMsg {
            content: String,
        }
        #[derive(Deserialize)]
        struct RespChoice {
            message: RespChoiceMsg,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<RespChoice>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Assessment {
            #[serde(default)]
            pronunciation: f64,
            #[serde(default)]
            fluency: f64,
            #[serde(default)]
            vocabulary: f64,
            #[serde(default)]
            grammar: f64,
            overall_score: f64,
            cefr_level: Option<String>,
            passed: Option<bool>,
        }

        let system = "You assess English proficiency of customer service candidates. \
            Reply with a JSON object containing pronunciation, fluency, vocabulary, grammar, \
            overallScore (all 0-100), passed (boolean) and cefrLevel (A1-C2).";
        let user = serde_json::json!({
            "taskType": task_type,
            "prompt": prompt,
            "answer": answer,
        });

        let req = Req {
            model: "gpt-4o",
            temperature: 0.1,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
            messages: vec![
                Msg {
                    role: "system",
                    content: system.to_string(),
                },
                Msg {
                    role: "user",
                    content: serde_json::to_string(&user)?,
                },
            ],
        };

        let resp = self
            .client
            .post(self.endpoint("chat/completions")?)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::ScoringOracle(format!(
                "assessment failed with status {}",
                resp.status()
            )));
        }

        let body = resp.json::<Resp>().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::ScoringOracle("empty assessment response".to_string()))?;
        let a: Assessment = serde_json::from_str(&content)
            .map_err(|e| Error::ScoringOracle(format!("unreadable assessment: {}", e)))?;

        let overall = a.overall_score.clamp(0.0, 100.0);
        Ok(OracleScores {
            pronunciation: a.pronunciation,
            fluency: a.fluency,
            vocabulary: a.vocabulary,
            grammar: a.grammar,
            overall,
            cefr_level: a
                .cefr_level
                .or_else(|| Some(GradingService::cefr_from_score(overall).to_string())),
            passed: a.passed.unwrap_or(overall >= 75.0),
        })
    }
}

#[async_trait]
impl ScoringOracle for OpenAiScoringOracle {
    async fn score(&self, request: ScoringRequest) -> Result<OracleScores> {
        let answer = match &request.answer {
            AnswerPayload::AudioBase64(audio) => self.transcribe(audio).await?,
            AnswerPayload::Text(text) => text.clone(),
        };
        tracing::debug!(task_type = %request.task_type, chars = answer.len(), "scoring answer");
        self.assess(&answer, &request.prompt, &request.task_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_fallback_never_passes() {
        let s = fallback_scores(FallbackScoring::Conservative);
        assert!(!s.passed);
        assert_eq!(s.overall, 0.0);
    }

    #[test]
    fn optimistic_fallback_matches_legacy_defaults() {
        let s = fallback_scores(FallbackScoring::Optimistic);
        assert!(s.passed);
        assert_eq!(s.overall, 81.0);
        assert_eq!(s.cefr_level.as_deref(), Some("B2"));
    }

    #[test]
    fn prompt_score_keeps_fallback_flag() {
        let p = fallback_scores(FallbackScoring::Optimistic).into_prompt_score(2, true);
        assert_eq!(p.prompt_index, 2);
        assert!(p.fallback);
        assert_eq!(p.pronunciation, 85.0);
    }

    #[tokio::test]
    async fn invalid_audio_is_rejected_before_any_request() {
        let oracle = OpenAiScoringOracle::new(
            "key".into(),
            url::Url::parse("http://127.0.0.1:9/v1/").unwrap(),
            Client::new(),
        );
        let err = oracle
            .score(ScoringRequest {
                answer: AnswerPayload::AudioBase64("%%%".into()),
                prompt: "p".into(),
                task_type: "reading".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
