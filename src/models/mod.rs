pub mod media;
pub mod policy;
pub mod proctoring;
pub mod results;
pub mod section;
pub mod session;
pub mod typing;
pub mod typing_text;
