pub mod eligibility;
pub mod registration;
