pub mod assessment_machine;
pub mod assessment_service;
pub mod grading_service;
pub mod media_service;
pub mod proctoring_service;
pub mod question_bank;
pub mod results_service;
pub mod scoring_service;
pub mod session_service;
pub mod typing_metrics_service;
pub mod typing_text_service;
