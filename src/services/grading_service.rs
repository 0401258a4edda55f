use std::collections::BTreeMap;

use crate::models::policy::{AssessmentPolicy, ForceCompletionPolicy, PassThresholds};
use crate::models::results::{
    SectionResult, Stage1Summary, Stage2Summary, VoiceResult, WritingResult,
};
use crate::models::section::{PromptScore, SectionKind, SectionProgress, WritingTask};
use crate::services::question_bank::{
    self, ChoiceQuestion, GRAMMAR_QUESTIONS, GRAMMAR_WRITING_TARGET_CHARS, READING_SCENARIOS,
    SJT_SCENARIOS,
};
use crate::services::typing_metrics_service::TypingMetricsService;

pub struct GradingService;

impl GradingService {
    /// Grades whatever progress a section holds when it ends.
    pub fn grade(
        kind: SectionKind,
        progress: &SectionProgress,
        elapsed_seconds: f64,
        thresholds: &PassThresholds,
    ) -> SectionResult {
        match (kind, progress) {
            (SectionKind::Typing, SectionProgress::Typing(attempt)) => {
                let metrics = TypingMetricsService::compute(
                    &attempt.reference_text,
                    &attempt.transcript,
                    elapsed_seconds,
                    &attempt.keystrokes,
                );
                let passed = TypingMetricsService::passed(&metrics, thresholds);
                SectionResult::Typing { metrics, passed }
            }
            (SectionKind::Reading, SectionProgress::Choices { answers }) => {
                Self::grade_reading(answers, thresholds)
            }
            (
                SectionKind::Grammar,
                SectionProgress::Grammar {
                    answers,
                    writing_response,
                },
            ) => Self::grade_grammar(answers, writing_response, thresholds),
            (SectionKind::Voice, SectionProgress::Voice { scores, .. }) => {
                Self::grade_voice(scores, thresholds)
            }
            (SectionKind::Writing, SectionProgress::Writing { scores, .. }) => {
                Self::grade_writing(scores, thresholds)
            }
            (SectionKind::Sjt, SectionProgress::Choices { answers }) => {
                Self::grade_sjt(answers, thresholds)
            }
            (kind, _) => Self::grade(
                kind,
                &SectionProgress::initial(kind, None),
                elapsed_seconds,
                thresholds,
            ),
        }
    }

    pub fn grade_reading(answers: &BTreeMap<String, u32>, thresholds: &PassThresholds) -> SectionResult {
        let questions: Vec<&ChoiceQuestion> = READING_SCENARIOS
            .iter()
            .flat_map(|s| s.questions.iter())
            .collect();
        let (correct, total) = Self::count_correct(questions.into_iter(), answers);
        let score = Self::percentage(correct, total);
        SectionResult::Reading {
            score,
            correct_answers: correct,
            total_questions: total,
            passed: score >= thresholds.reading,
        }
    }

    pub fn grade_grammar(
        answers: &BTreeMap<String, u32>,
        writing_response: &str,
        thresholds: &PassThresholds,
    ) -> SectionResult {
        let (correct, total) = Self::count_correct(GRAMMAR_QUESTIONS.iter(), answers);
        let grammar_score = Self::percentage(correct, total);
        let writing_score = Self::grammar_writing_score(writing_response);
        let combined_score = Self::grammar_combined(grammar_score, writing_score);
        SectionResult::Grammar {
            grammar_score,
            writing_score,
            combined_score,
            passed: combined_score >= thresholds.grammar_combined,
        }
    }

    pub fn grammar_writing_score(response: &str) -> f64 {
        let len = response.chars().count() as f64;
        (len / GRAMMAR_WRITING_TARGET_CHARS as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn grammar_combined(grammar_score: f64, writing_score: f64) -> f64 {
        grammar_score * 0.6 + writing_score * 0.4
    }

    pub fn grade_sjt(answers: &BTreeMap<String, u32>, thresholds: &PassThresholds) -> SectionResult {
        let total = SJT_SCENARIOS.len() as u32;
        let correct = SJT_SCENARIOS
            .iter()
            .filter(|s| {
                answers.get(&s.id.to_string()) == Some(&question_bank::sjt_correct_option(s.id))
            })
            .count() as u32;
        let score = Self::percentage(correct, total);
        SectionResult::Sjt {
            score,
            correct_answers: correct,
            total_scenarios: total,
            passed: score >= thresholds.sjt,
        }
    }

    /// Mean of the scored prompts. Unanswered prompts count as zero.
    pub fn grade_voice(scores: &[PromptScore], thresholds: &PassThresholds) -> SectionResult {
        let n = question_bank::VOICE_PROMPTS.len().max(scores.len()) as f64;
        let mean = |f: fn(&PromptScore) -> f64| scores.iter().map(f).sum::<f64>() / n;

        let overall = mean(|s| s.overall);
        let cefr_level = scores
            .iter()
            .rev()
            .find_map(|s| s.cefr_level.clone())
            .unwrap_or_else(|| Self::cefr_from_score(overall).to_string());

        SectionResult::Voice(VoiceResult {
            pronunciation: mean(|s| s.pronunciation),
            fluency: mean(|s| s.fluency),
            vocabulary: mean(|s| s.vocabulary),
            grammar: mean(|s| s.grammar),
            overall,
            cefr_level,
            prompts_scored: scores.len(),
            passed: overall >= thresholds.voice,
        })
    }

    pub fn grade_writing(
        scores: &BTreeMap<WritingTask, f64>,
        thresholds: &PassThresholds,
    ) -> SectionResult {
        let score = |t: WritingTask| scores.get(&t).copied().unwrap_or(0.0);
        let email = score(WritingTask::EmailResponse);
        let complaint = score(WritingTask::ComplaintResolution);
        let process = score(WritingTask::ProcessDocumentation);
        let overall_score = (email + complaint + process) / 3.0;
        SectionResult::Writing(WritingResult {
            email_response_score: email,
            complaint_resolution_score: complaint,
            process_documentation_score: process,
            overall_score,
            passed: overall_score >= thresholds.writing,
        })
    }

    /// Result recorded for a section ended by a security violation.
    pub fn forced_result(
        kind: SectionKind,
        progress: &SectionProgress,
        elapsed_seconds: f64,
        policy: &AssessmentPolicy,
    ) -> SectionResult {
        let graded = Self::grade(kind, progress, elapsed_seconds, &policy.thresholds);
        match policy.force_completion {
            ForceCompletionPolicy::Fail => Self::mark_failed(graded),
            ForceCompletionPolicy::Lenient => match kind {
                SectionKind::Typing => graded,
                SectionKind::Reading => {
                    let answered = match progress {
                        SectionProgress::Choices { answers } => answers.len() as u32,
                        _ => 0,
                    };
                    SectionResult::Reading {
                        score: 70.0,
                        correct_answers: answered,
                        total_questions: question_bank::reading_question_count() as u32,
                        passed: true,
                    }
                }
                SectionKind::Grammar => SectionResult::Grammar {
                    grammar_score: 70.0,
                    writing_score: 70.0,
                    combined_score: 70.0,
                    passed: true,
                },
                SectionKind::Voice => SectionResult::Voice(VoiceResult {
                    pronunciation: 75.0,
                    fluency: 75.0,
                    vocabulary: 75.0,
                    grammar: 75.0,
                    overall: 75.0,
                    cefr_level: "B1".to_string(),
                    prompts_scored: 0,
                    passed: true,
                }),
                SectionKind::Writing => SectionResult::Writing(WritingResult {
                    email_response_score: 75.0,
                    complaint_resolution_score: 75.0,
                    process_documentation_score: 75.0,
                    overall_score: 75.0,
                    passed: true,
                }),
                SectionKind::Sjt => SectionResult::Sjt {
                    score: 70.0,
                    correct_answers: 0,
                    total_scenarios: SJT_SCENARIOS.len() as u32,
                    passed: true,
                },
            },
        }
    }

    fn mark_failed(mut result: SectionResult) -> SectionResult {
        match &mut result {
            SectionResult::Typing { passed, .. }
            | SectionResult::Reading { passed, .. }
            | SectionResult::Grammar { passed, .. }
            | SectionResult::Sjt { passed, .. } => *passed = false,
            SectionResult::Voice(v) => v.passed = false,
            SectionResult::Writing(w) => w.passed = false,
        }
        result
    }

    pub fn stage1_summary(
        typing: Option<&SectionResult>,
        reading: Option<&SectionResult>,
        grammar: Option<&SectionResult>,
    ) -> Stage1Summary {
        let passed = |r: Option<&SectionResult>| r.map(|r| r.passed()).unwrap_or(false);
        let typing_passed = passed(typing);
        let reading_passed = passed(reading);
        let grammar_passed = passed(grammar);
        Stage1Summary {
            typing_passed,
            reading_passed,
            grammar_passed,
            stage1_passed: typing_passed && reading_passed && grammar_passed,
        }
    }

    pub fn stage2_summary(
        voice: Option<&SectionResult>,
        writing: Option<&SectionResult>,
        sjt: Option<&SectionResult>,
    ) -> Stage2Summary {
        let passed = |r: Option<&SectionResult>| r.map(|r| r.passed()).unwrap_or(false);
        let score = |r: Option<&SectionResult>| r.map(|r| r.score()).unwrap_or(0.0);

        let voice_passed = passed(voice);
        let writing_passed = passed(writing);
        let sjt_passed = passed(sjt);
        let stage2_passed = voice_passed && writing_passed && sjt_passed;

        let overall_score = score(writing) * 0.3 + score(voice) * 0.4 + score(sjt) * 0.3;

        let recommendations = if stage2_passed {
            vec![
                "Ready for customer service roles".to_string(),
                "Strong communication skills".to_string(),
                "Good decision-making abilities".to_string(),
            ]
        } else {
            vec![
                "Additional practice with professional communication".to_string(),
                "Focus on accent neutrality".to_string(),
                "Review company policies and procedures".to_string(),
            ]
        };

        Stage2Summary {
            voice_passed,
            writing_passed,
            sjt_passed,
            overall_score,
            cefr_level: Self::stage2_cefr(overall_score).to_string(),
            recommendations,
            stage2_passed,
        }
    }

    /// Proficiency band for a single spoken answer.
    pub fn cefr_from_score(score: f64) -> &'static str {
        match score {
            s if s >= 95.0 => "C2",
            s if s >= 85.0 => "C1",
            s if s >= 75.0 => "B2",
            s if s >= 60.0 => "B1",
            s if s >= 40.0 => "A2",
            _ => "A1",
        }
    }

    /// Coarser band used for the stage 2 summary.
    pub fn stage2_cefr(overall: f64) -> &'static str {
        match overall {
            s if s >= 90.0 => "C2",
            s if s >= 80.0 => "C1",
            s if s >= 70.0 => "B2",
            _ => "B1",
        }
    }

    fn count_correct<'a>(
        questions: impl Iterator<Item = &'a ChoiceQuestion>,
        answers: &BTreeMap<String, u32>,
    ) -> (u32, u32) {
        let mut correct = 0;
        let mut total = 0;
        for q in questions {
            total += 1;
            if answers.get(q.id) == Some(&q.correct_answer) {
                correct += 1;
            }
        }
        (correct, total)
    }

    fn percentage(correct: u32, total: u32) -> f64 {
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64 * 100.0
        }
    }
}
