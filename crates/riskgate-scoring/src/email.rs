//! Email and identity scorer.

use chrono::{Datelike, NaiveDate};

use riskgate_core::config::Policy;
use riskgate_core::constants::{
    MAX_PLAUSIBLE_AGE_YEARS, MIN_RENTER_AGE_YEARS, WEIGHT_DISPOSABLE_DOMAIN, WEIGHT_DOB_IMPLAUSIBLE, WEIGHT_DOB_MISSING,
    WEIGHT_EMAIL_MISSING, WEIGHT_EMAIL_UNVERIFIED, WEIGHT_FREE_MAIL_DOMAIN, WEIGHT_NAME_MISMATCH, WEIGHT_PHONE_MISSING,
    WEIGHT_PHONE_UNVERIFIED, WEIGHT_SUSPICIOUS_LOCAL_PART,
};
use riskgate_core::types::{Category, CategoryScore, RiskSignals};

use crate::scorer::Tally;

/// Throwaway inbox providers.
pub const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "fakeinbox.com",
    "getnada.com",
    "guerrillamail.com",
    "mailinator.com",
    "maildrop.cc",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

/// Free consumer webmail providers.
pub const FREE_MAIL_DOMAINS: &[&str] = &[
    "aol.com",
    "gmail.com",
    "gmx.com",
    "hotmail.com",
    "icloud.com",
    "mail.com",
    "outlook.com",
    "proton.me",
    "protonmail.com",
    "yahoo.com",
    "yandex.com",
];

/// Whether `domain` or any parent domain is in `list`.
fn listed(domain: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|d| domain == *d || domain.strip_suffix(d).is_some_and(|rest| rest.ends_with('.')))
}

/// Local parts that look generated rather than chosen by a person.
fn suspicious_local_part(local: &str) -> bool {
    let len = local.chars().count();
    if len < 3 {
        return true;
    }
    let digits = local.chars().filter(|c| c.is_ascii_digit()).count();
    if digits * 2 > len {
        return true;
    }
    let letters: Vec<char> = local.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    letters.len() >= 6 && !letters.iter().any(|c| "aeiouy".contains(*c))
}

/// No name token of three or more letters appears in the local part.
fn name_mismatch(display_name: &str, local: &str) -> bool {
    let local = local.to_lowercase();
    let tokens: Vec<String> = display_name
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .collect();
    !tokens.is_empty() && !tokens.iter().any(|t| local.contains(t.as_str()))
}

/// Whole years between `dob` and `on`.
fn age_on(dob: NaiveDate, on: NaiveDate) -> i32 {
    let mut age = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

pub fn score(signals: &RiskSignals, policy: &Policy) -> CategoryScore {
    let mut tally = Tally::new(Category::Email);

    match (signals.email.as_deref(), signals.email_domain.as_deref()) {
        (Some(email), Some(domain)) => {
            let local = email.split('@').next().unwrap_or_default();
            if listed(domain, DISPOSABLE_DOMAINS) || policy.is_extra_disposable(domain) {
                tally.add(WEIGHT_DISPOSABLE_DOMAIN, format!("disposable email domain: {domain}"));
            } else if listed(domain, FREE_MAIL_DOMAINS) {
                tally.add(WEIGHT_FREE_MAIL_DOMAIN, format!("free email domain: {domain}"));
            }
            if !signals.email_verified {
                tally.add(WEIGHT_EMAIL_UNVERIFIED, "email not verified");
            }
            if suspicious_local_part(local) {
                tally.add(WEIGHT_SUSPICIOUS_LOCAL_PART, format!("suspicious email local part: {local}"));
            }
            if let Some(name) = signals.display_name.as_deref() {
                if name_mismatch(name, local) {
                    tally.add(WEIGHT_NAME_MISMATCH, "display name does not match email");
                }
            }
        }
        _ => tally.add(WEIGHT_EMAIL_MISSING, "signal missing: email"),
    }

    match &signals.phone {
        None => tally.add(WEIGHT_PHONE_MISSING, "signal missing: phone"),
        Some(_) if !signals.phone_verified => tally.add(WEIGHT_PHONE_UNVERIFIED, "phone not verified"),
        Some(_) => {}
    }

    match signals.date_of_birth {
        None => tally.add(WEIGHT_DOB_MISSING, "signal missing: date of birth"),
        Some(dob) => {
            let age = age_on(dob, signals.captured_at.date_naive());
            if !(MIN_RENTER_AGE_YEARS..=MAX_PLAUSIBLE_AGE_YEARS).contains(&age) {
                tally.add(WEIGHT_DOB_IMPLAUSIBLE, format!("implausible declared age: {age}"));
            }
        }
    }

    tally.finish()
}
