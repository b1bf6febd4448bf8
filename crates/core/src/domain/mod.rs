pub mod questionnaire;
pub mod recommendation;
pub mod risk;
