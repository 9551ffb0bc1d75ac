//! Email classification and reply generation
//!
//! [`Classifier`] assigns one of the closed [`Category`] values to an email and
//! [`Answerer`] writes a reply for general inquiries. [`OpenAiChat`] implements
//! both against an OpenAI-compatible chat completions endpoint.

mod openai;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::Category;

pub use openai::OpenAiChat;

/// Assigns a category to an email
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Must return one of the closed category values; anything else is a
    /// contract violation
    async fn classify(&self, subject: &str, text: &str) -> Result<Category>;
}

/// Writes reply text for an email
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, subject: &str, text: &str) -> Result<String>;
}

/// System prompt for classification
pub fn classification_prompt(organization: &str) -> String {
    format!(
        "You are an email categorization agent for {org}. Your task is to categorize incoming emails based on their content.\n\
\n\
Here are the categories:\n\
- Spam: The email is an unsolicited offer or clearly not related to {org}'s business of electronic parts.\n\
- DistributorInquiry: The email is from a company asking to become a participant distributor or to have their electronic parts listed on {org}.\n\
- QuoteRequestSingle: The email is a request for a quote for a single electronic part.\n\
- QuoteRequestMulti: The email is a request for a quote for multiple electronic parts.\n\
- GeneralInquiry: The email is a question about {org} that does not fall into the other categories.\n\
\n\
Respond with JSON only, in the form {{\"category\": \"<one of {names}>\"}}.",
        org = organization,
        names = Category::ALL
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// System prompt for reply drafting
pub fn answer_prompt(organization: &str) -> String {
    format!(
        "You are a helpful assistant for {org}.\n\
Your task is to write a draft response to the email you are given.\n\
The response should be professional and helpful.\n\
\n\
Respond with JSON only, in the form {{\"response\": \"<reply text>\"}}.",
        org = organization,
    )
}

/// User message carrying the email
pub fn email_message(subject: &str, text: &str) -> String {
    format!("Subject: {}\nBody: {}", subject, text)
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    category: String,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    response: String,
}

/// Parse the classifier's reply strictly
pub fn parse_classification(raw: &str) -> Result<Category> {
    let json = extract_json_object(raw);
    let response: ClassificationResponse = serde_json::from_str(&json).map_err(|e| {
        Error::ContractViolation(format!("classifier reply is not valid JSON: {}", e))
    })?;
    response.category.parse()
}

/// Parse the answerer's reply
pub fn parse_answer(raw: &str) -> Result<String> {
    let json = extract_json_object(raw);
    let response: AnswerResponse = serde_json::from_str(&json)
        .map_err(|e| Error::ContractViolation(format!("answer reply is not valid JSON: {}", e)))?;

    if response.response.trim().is_empty() {
        return Err(Error::ContractViolation("answer reply is empty".to_string()));
    }
    Ok(response.response)
}

/// Pull a JSON object out of a model reply that may be wrapped in markdown
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
