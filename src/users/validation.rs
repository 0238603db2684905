use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::repo_types::{User, UserCandidate};

pub const NAME_MAX_LEN: usize = 50;
pub const EMAIL_MAX_LEN: usize = 255;
pub const PASSWORD_MIN_LEN: usize = 6;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").expect("name regex");
    // ASCII only. Local part: runs of letters, digits, `_ + -` joined by
    // single dots. Domain: labels that start and end alphanumeric, joined by
    // single dots, ending in an alphabetic TLD.
    static ref EMAIL_RE: Regex = Regex::new(concat!(
        r"^[A-Za-z0-9_+\-]+(?:\.[A-Za-z0-9_+\-]+)*",
        r"@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?",
        r"(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*",
        r"\.[A-Za-z]+$",
    ))
    .expect("email regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Email,
    Password,
    PasswordConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Blank,
    TooLong,
    InvalidFormat,
    NotUnique,
    TooShort,
    ConfirmationMismatch,
}

/// Why a candidate was rejected, one entry per failed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Violation {
    pub field: Field,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: Field, kind: ViolationKind) -> Self {
        Self { field, kind }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            Field::Name => "name",
            Field::Email => "email",
            Field::Password => "password",
            Field::PasswordConfirmation => "password_confirmation",
        };
        let msg = match self.kind {
            ViolationKind::Blank => "can't be blank".to_string(),
            ViolationKind::TooLong => match self.field {
                Field::Name => format!("is too long (maximum is {} characters)", NAME_MAX_LEN),
                _ => format!("is too long (maximum is {} characters)", EMAIL_MAX_LEN),
            },
            ViolationKind::InvalidFormat => "is invalid".to_string(),
            ViolationKind::NotUnique => "has already been taken".to_string(),
            ViolationKind::TooShort => {
                format!("is too short (minimum is {} characters)", PASSWORD_MIN_LEN)
            }
            ViolationKind::ConfirmationMismatch => "doesn't match password".to_string(),
        };
        write!(f, "{} {}", field, msg)
    }
}

/// All violations found for one candidate. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, field: Field, kind: ViolationKind) {
        self.0.push(Violation::new(field, kind));
    }

    pub fn contains(&self, field: Field, kind: ViolationKind) -> bool {
        self.0.iter().any(|v| v.field == field && v.kind == kind)
    }

    pub fn on(&self, field: Field) -> impl Iterator<Item = &Violation> {
        self.0.iter().filter(move |v| v.field == field)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    pub fn into_result(self) -> Result<(), Violations> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Violation> for Violations {
    fn from(v: Violation) -> Self {
        Self(vec![v])
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

/// Trimmed, lowercased form used for comparison and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Check `candidate` against every rule and collect what fails.
///
/// `existing` is the snapshot of stored records used for the email uniqueness
/// check; the record with the candidate's own id is skipped. The check is a
/// fast path only: two concurrent writers can both pass it, so the unique
/// index on `lower(email)` remains the authority.
///
/// `password_confirmation` is compared byte-for-byte when supplied.
pub fn validate(
    candidate: &UserCandidate,
    password_confirmation: Option<&str>,
    existing: &[User],
) -> Violations {
    let mut out = Violations::default();

    let name = candidate.name.as_str();
    if is_blank(name) {
        out.push(Field::Name, ViolationKind::Blank);
    }
    if name.chars().count() > NAME_MAX_LEN {
        out.push(Field::Name, ViolationKind::TooLong);
    }
    if !is_valid_name(name) {
        out.push(Field::Name, ViolationKind::InvalidFormat);
    }

    let email = candidate.email.as_str();
    if is_blank(email) {
        out.push(Field::Email, ViolationKind::Blank);
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        out.push(Field::Email, ViolationKind::TooLong);
    }
    if !is_valid_email(email) {
        out.push(Field::Email, ViolationKind::InvalidFormat);
    }
    if !is_blank(email) {
        let normalized = normalize_email(email);
        let taken = existing
            .iter()
            .filter(|u| Some(u.id) != candidate.id)
            .any(|u| normalize_email(&u.email) == normalized);
        if taken {
            out.push(Field::Email, ViolationKind::NotUnique);
        }
    }

    match candidate.password.as_deref() {
        // creating without a password is never acceptable
        None if candidate.id.is_none() => out.push(Field::Password, ViolationKind::Blank),
        None => {}
        Some(password) => {
            if is_blank(password) {
                out.push(Field::Password, ViolationKind::Blank);
            }
            if password.chars().count() < PASSWORD_MIN_LEN {
                out.push(Field::Password, ViolationKind::TooShort);
            }
            if let Some(confirmation) = password_confirmation {
                if confirmation.as_bytes() != password.as_bytes() {
                    out.push(Field::PasswordConfirmation, ViolationKind::ConfirmationMismatch);
                }
            }
        }
    }

    out
}
