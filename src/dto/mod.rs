pub mod assessment_dto;
pub mod session_dto;
pub mod typing_text_dto;
