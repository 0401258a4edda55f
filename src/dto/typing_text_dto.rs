use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTypingTextPayload {
    #[validate(length(min = 20))]
    pub text: String,
    #[validate(length(min = 1))]
    pub category: Option<String>,
    #[validate(range(min = 1, max = 3))]
    pub difficulty: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTypingTextPayload {
    #[validate(length(min = 20))]
    pub text: Option<String>,
    #[validate(length(min = 1))]
    pub category: Option<String>,
    #[validate(range(min = 1, max = 3))]
    pub difficulty: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RandomTypingTextQuery {
    #[validate(range(min = 1, max = 3))]
    pub difficulty: Option<i32>,
}
