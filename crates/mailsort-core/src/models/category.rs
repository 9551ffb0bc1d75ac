//! Email categories assigned by the classifier

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Closed set of categories an email can be classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Unsolicited offer or unrelated to the business
    Spam,
    /// A company asking to participate as a distributor
    DistributorInquiry,
    /// Quote request for a single part
    QuoteRequestSingle,
    /// Quote request for multiple parts
    QuoteRequestMulti,
    /// Any other question about the business
    GeneralInquiry,
}

impl Category {
    /// Every category, in declaration order
    pub const ALL: [Category; 5] = [
        Category::Spam,
        Category::DistributorInquiry,
        Category::QuoteRequestSingle,
        Category::QuoteRequestMulti,
        Category::GeneralInquiry,
    ];

    /// Wire name used in prompts and model responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Spam => "Spam",
            Category::DistributorInquiry => "DistributorInquiry",
            Category::QuoteRequestSingle => "QuoteRequestSingle",
            Category::QuoteRequestMulti => "QuoteRequestMulti",
            Category::GeneralInquiry => "GeneralInquiry",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    /// Strict parse: anything outside the closed set is a contract violation
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| Error::ContractViolation(format!("unknown category '{}'", s)))
    }
}
