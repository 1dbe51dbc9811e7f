// Advisory hints derived from the text of failed strategy attempts

use lazy_static::lazy_static;
use regex::Regex;

use crate::media::StrategyAttempt;

pub const AGE_RESTRICTED: &str =
    "This video may be age-restricted. Try logging in to YouTube and exporting cookies.txt (--cookies).";
pub const GEO_RESTRICTED: &str =
    "This video may be geographically restricted. Try a different proxy or a VPN.";
pub const RATE_LIMITED: &str =
    "The upstream service appears to be throttling requests. Slow down (raise the pacing delay) or rotate identity.";

lazy_static! {
    static ref AGE_PATTERN: Regex =
        Regex::new(r"(?i)\bage\b|age[- ]restrict|confirm your age|inappropriate for some users").expect("valid regex");
    static ref GEO_PATTERN: Regex =
        Regex::new(r"(?i)\bgeo\b|geo[- ]?restrict|your country|not available in your").expect("valid regex");
    static ref RATE_PATTERN: Regex =
        Regex::new(r"(?i)\b429\b|too many requests|rate[- ]limit|not a bot|unusual traffic|captcha")
            .expect("valid regex");
}

/// Hints for every restriction the attempt log suggests, in a fixed order
pub fn detect(attempts: &[StrategyAttempt]) -> Vec<String> {
    let details: Vec<&str> = attempts.iter().filter_map(|a| a.detail.as_deref()).collect();
    let any = |pattern: &Regex| details.iter().any(|d| pattern.is_match(d));

    let mut hints = Vec::new();
    if any(&*AGE_PATTERN) {
        hints.push(AGE_RESTRICTED.to_string());
    }
    if any(&*GEO_PATTERN) {
        hints.push(GEO_RESTRICTED.to_string());
    }
    if any(&*RATE_PATTERN) {
        hints.push(RATE_LIMITED.to_string());
    }
    hints
}
