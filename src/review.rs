use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::GrabError;
use crate::registry::TIMESTAMP_FORMAT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub name: String,
    pub rating: u8,
    pub review: String,
    pub date: String,
}

/// Validates and stamps a submitted review. Blank names become `Anonymous`.
pub fn submit_review(name: &str, rating: u8, text: &str) -> Result<Review, GrabError> {
    if !(1..=5).contains(&rating) {
        return Err(GrabError::InvalidInput(format!(
            "rating must be between 1 and 5, got {rating}"
        )));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(GrabError::InvalidInput("review text is empty".into()));
    }
    let name = match name.trim() {
        "" => "Anonymous",
        name => name,
    };
    Ok(Review {
        name: name.to_string(),
        rating,
        review: text.to_string(),
        date: Local::now().format(TIMESTAMP_FORMAT).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_is_anonymous() {
        let review = submit_review("   ", 5, "works great").unwrap();
        assert_eq!(review.name, "Anonymous");
        assert_eq!(review.rating, 5);
        assert_eq!(review.review, "works great");
    }

    #[test]
    fn rejects_out_of_range_ratings_and_empty_text() {
        assert!(submit_review("a", 0, "x").is_err());
        assert!(submit_review("a", 6, "x").is_err());
        assert!(submit_review("a", 3, "  \n").is_err());
        assert!(submit_review("a", 1, "meh").is_ok());
    }
}
