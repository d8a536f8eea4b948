// src/email.rs

/// Consumer mail domain whose mailbox canonicalization is mirrored here.
const CANONICALIZED_DOMAIN: &str = "@gmail.com";

/// Normalizes an address so provider and store spellings agree.
///
/// Every address is trimmed and lowercased. Addresses on the canonicalized
/// domain additionally lose any `+tag` and every `.` of the local part.
pub fn normalize_email(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();

    if !lower.ends_with(CANONICALIZED_DOMAIN) {
        return lower;
    }

    let Some((local, domain)) = lower.split_once('@') else {
        return lower;
    };

    let without_tag = local.split('+').next().unwrap_or_default();
    let without_dots: String = without_tag.chars().filter(|c| *c != '.').collect();

    format!("{}@{}", without_dots, domain)
}
