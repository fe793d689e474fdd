use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Error markers switch CLIs echo back when a command is rejected.
    pub static ref CLI_ERROR_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Invalid input").unwrap(),
        Regex::new(r"(?i)Ambiguous command").unwrap(),
        Regex::new(r"(?i)Incomplete command").unwrap(),
        Regex::new(r"(?i)% Error").unwrap(),
    ];
}

/// Returns the first vendor-error marker found in the transcript, if any.
pub fn check_for_errors(output: &str) -> Option<String> {
    for pattern in CLI_ERROR_PATTERNS.iter() {
        if let Some(matched) = pattern.find(output) {
            return Some(matched.as_str().to_string());
        }
    }
    None
}
