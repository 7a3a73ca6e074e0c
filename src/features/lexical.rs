use crate::features::{FeatureSchema, FeatureStrategy, FeatureVector};
use crate::record::EmailRecord;
use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Immutable reference data for the lexical extractor. Injected at
/// construction so tests can substitute their own lists; the defaults are
/// the curated production lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLists {
    pub suspicious_keywords: Vec<String>,
    pub free_email_providers: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub shortener_hosts: Vec<String>,
}

impl Default for ReferenceLists {
    fn default() -> Self {
        let keywords = [
            "urgent",
            "password",
            "verify",
            "bank",
            "account",
            "login",
            "click",
            "update",
            "free",
            "win",
            "prize",
            "guarantee",
            "limited offer",
            "unsubscribe",
            "claim now",
            "congratulations",
            "lottery",
            "credit card",
            "security alert",
            "confirm",
            "verify your account",
            "update your information",
            "click here to login",
            "urgent action required",
            "confirm your password",
            "your account has been compromised",
            "reset your password",
            "you have won",
            "claim your prize",
            "banking notification",
            "free gift",
            "download attachment",
        ];
        let providers = [
            "gmail.com",
            "yahoo.com",
            "hotmail.com",
            "outlook.com",
            "aol.com",
        ];
        let tlds = [".ru", ".cn", ".xyz", ".top", ".biz", ".tk"];
        let shorteners = ["bit.ly", "tinyurl.com", "t.co", "goo.gl"];

        Self {
            suspicious_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            free_email_providers: providers.iter().map(|s| s.to_string()).collect(),
            suspicious_tlds: tlds.iter().map(|s| s.to_string()).collect(),
            shortener_hosts: shorteners.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Fixed-order lexical feature names. This order IS the schema; it never
/// changes between training and serving.
const FEATURE_NAMES: &[&str] = &[
    "num_words",
    "num_chars",
    "num_uppercase",
    "num_special_chars",
    "subject_length",
    "num_urls",
    "num_shortened_urls",
    "url_avg_length",
    "url_contains_numbers",
    "suspicious_domain_count",
    "num_encoded_urls",
    "num_suspicious_keywords",
    "suspicious_word_ratio",
    "subject_contains_suspicious_word",
    "num_exclamation",
    "num_question_marks",
    "contains_html",
    "sender_is_free_email",
    "sender_email_length",
    "sender_has_random_numbers",
];

/// Lexical/structural feature extractor. Total: absent optional fields are
/// treated as empty strings and an empty body yields zero counts.
pub struct LexicalExtractor {
    lists: ReferenceLists,
    url_regex: Regex,
    html_regex: Regex,
}

impl Default for LexicalExtractor {
    fn default() -> Self {
        Self::new(ReferenceLists::default())
    }
}

impl LexicalExtractor {
    pub fn new(lists: ReferenceLists) -> Self {
        Self {
            lists,
            url_regex: Regex::new(r"https?://\S+").unwrap(),
            html_regex: Regex::new(r"<[^>]+>").unwrap(),
        }
    }

    /// Extract the fixed-order feature row for one email. Never fails.
    pub fn extract(&self, email: &EmailRecord) -> FeatureVector {
        let body = email.body.as_str();
        let subject = email.subject.as_str();
        let sender = email.sender.as_str();

        let body_lower = body.to_lowercase();
        let subject_lower = subject.to_lowercase();

        let num_words = body.split_whitespace().count();
        let num_chars = body.chars().count();
        let num_uppercase = body.chars().filter(|c| c.is_uppercase()).count();
        let num_special = body.chars().filter(|c| "!@#$%^&*()".contains(*c)).count();

        let urls: Vec<&str> = self.url_regex.find_iter(body).map(|m| m.as_str()).collect();
        let num_urls = urls.len();
        let num_shortened = urls
            .iter()
            .filter(|u| self.lists.shortener_hosts.iter().any(|h| u.contains(h.as_str())))
            .count();
        let url_avg_length = if urls.is_empty() {
            0.0
        } else {
            urls.iter().map(|u| u.chars().count()).sum::<usize>() as f64 / urls.len() as f64
        };
        let url_with_digits = urls
            .iter()
            .filter(|u| u.chars().any(|c| c.is_ascii_digit()))
            .count();
        let suspicious_domains = urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(|h| h.to_string()))
            .filter(|host| self.lists.suspicious_tlds.iter().any(|t| host.contains(t.as_str())))
            .count();
        let encoded_urls = urls.iter().filter(|u| is_encoded_url(u)).count();

        let keyword_hits = self
            .lists
            .suspicious_keywords
            .iter()
            .filter(|k| body_lower.contains(k.as_str()))
            .count();
        let keyword_ratio = if num_words > 0 {
            keyword_hits as f64 / num_words as f64
        } else {
            0.0
        };
        let subject_suspicious = self
            .lists
            .suspicious_keywords
            .iter()
            .any(|k| subject_lower.contains(k.as_str()));

        let num_exclamation = body.matches('!').count();
        let num_question = body.matches('?').count();
        let contains_html = self.html_regex.is_match(body);

        let sender_is_free = email
            .sender_domain()
            .map(|d| {
                let d = d.to_lowercase();
                self.lists.free_email_providers.iter().any(|p| p == &d)
            })
            .unwrap_or(false);
        let sender_len = sender.chars().count();
        let sender_has_digit = sender.chars().any(|c| c.is_ascii_digit());

        FeatureVector::new(vec![
            num_words as f64,
            num_chars as f64,
            num_uppercase as f64,
            num_special as f64,
            subject.chars().count() as f64,
            num_urls as f64,
            num_shortened as f64,
            url_avg_length,
            url_with_digits as f64,
            suspicious_domains as f64,
            encoded_urls as f64,
            keyword_hits as f64,
            keyword_ratio,
            subject_suspicious as u8 as f64,
            num_exclamation as f64,
            num_question as f64,
            contains_html as u8 as f64,
            sender_is_free as u8 as f64,
            sender_len as f64,
            sender_has_digit as u8 as f64,
        ])
    }
}

/// A URL whose last path segment is substantial valid base64 is likely
/// carrying an encoded payload.
fn is_encoded_url(url: &str) -> bool {
    let segment = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    segment.len() >= 8 && general_purpose::STANDARD.decode(segment).is_ok()
}

impl FeatureStrategy for LexicalExtractor {
    fn name(&self) -> &str {
        "lexical"
    }

    fn schema(&self) -> FeatureSchema {
        FeatureSchema::new(FEATURE_NAMES.iter().map(|s| s.to_string()).collect())
    }

    fn extract_batch(&self, emails: &[EmailRecord]) -> Result<Vec<FeatureVector>> {
        Ok(emails.iter().map(|e| self.extract(e)).collect())
    }
}
