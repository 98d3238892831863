use crate::error::AppError;

/// Payloads shorter than this are treated as empty.
pub const MIN_CONTENT_BYTES: usize = 50;

/// Phrases that only show up on bot-wall and CAPTCHA interstitials.
const BLOCK_PHRASES: [&str; 8] = [
    "captcha",
    "verify you are human",
    "are you a robot",
    "access denied",
    "request blocked",
    "unusual traffic from your computer",
    "please enable cookies",
    "checking your browser before accessing",
];

/// Accept a payload unless it is near-empty or an explicit block page.
///
/// Deliberately permissive: page structure varies too much across sources
/// for anything stricter, and downstream consumers filter semantically.
pub fn validate_content(body: &str) -> Result<(), AppError> {
    let trimmed = body.trim();
    if trimmed.len() < MIN_CONTENT_BYTES {
        return Err(AppError::ContentValidation(format!(
            "payload too short ({} bytes)",
            trimmed.len()
        )));
    }

    let lowered = trimmed.to_lowercase();
    if let Some(phrase) = BLOCK_PHRASES.iter().find(|p| lowered.contains(*p)) {
        return Err(AppError::ContentValidation(format!(
            "block page detected (\"{phrase}\")"
        )));
    }

    Ok(())
}
