//! Form validation.
//!
//! Every form is a set of named string inputs. `accept` validates it and turns
//! it into typed values, or returns one human-readable message per field.
//! Nothing here talks to a backend.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

use crate::identity::{EmailAddress, Password};
use crate::profile::ProfileUpdate;

/// Minimum age to open an account.
pub const MINIMUM_AGE: i64 = 18;

static DATE_OF_BIRTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date of birth regex")
});
static MOBILE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9]{10,15}$").expect("mobile number regex")
});

/// Field name to violation message.
pub type FieldErrors = BTreeMap<String, String>;

/// Keep the first message of every invalid field.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .iter()
        .filter_map(|(field, issues)| {
            issues.first().map(|issue| {
                let message = issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string());
                (field.to_string(), message)
            })
        })
        .collect()
}

fn single(field: &str, message: &str) -> FieldErrors {
    FieldErrors::from([(field.to_owned(), message.to_owned())])
}

fn violation(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

/// Required, and shaped like `local@domain`.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        Err(violation("required", "Email is required."))
    } else if !email.trim().validate_email() {
        Err(violation("email", "Email must be formatted."))
    } else {
        Ok(())
    }
}

/// Age must be a whole number of at least [`MINIMUM_AGE`].
pub fn validate_age(age: &str) -> Result<(), ValidationError> {
    let age = age.trim();
    if age.is_empty() {
        return Err(violation("required", "Age is required."));
    }

    match age.parse::<i64>() {
        Ok(age) if age >= MINIMUM_AGE => Ok(()),
        Ok(_) => Err(violation("age", "You must be at least 18 years old.")),
        Err(_) => Err(violation("age", "Age must be a number.")),
    }
}

/// Empty means "not provided". Otherwise `YYYY-MM-DD`, a real day, not in
/// the future.
pub fn validate_date_of_birth(date: &str) -> Result<(), ValidationError> {
    if date.is_empty() {
        return Ok(());
    }

    let invalid = || {
        violation("date_of_birth", "Date of birth must be formatted as YYYY-MM-DD.")
    };
    if !DATE_OF_BIRTH.is_match(date) {
        return Err(invalid());
    }

    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
    if day > Utc::now().date_naive() {
        return Err(violation(
            "date_of_birth",
            "Date of birth cannot be in the future.",
        ));
    }

    Ok(())
}

/// Empty means "not provided".
pub fn validate_mobile_number(number: &str) -> Result<(), ValidationError> {
    if number.is_empty() || MOBILE_NUMBER.is_match(number) {
        Ok(())
    } else {
        Err(violation(
            "mobile_number",
            "Mobile number must contain 10 to 15 digits.",
        ))
    }
}

/// Accepted sign-in input.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: EmailAddress,
    pub password: Password,
}

/// Accepted sign-up input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: EmailAddress,
    pub password: Password,
    pub age: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SignInForm {
    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

impl SignInForm {
    pub fn accept(&self) -> Result<Credentials, FieldErrors> {
        self.validate().map_err(|e| field_errors(&e))?;

        Ok(Credentials {
            email: EmailAddress::parse(&self.email)
                .map_err(|_| single("email", "Email must be formatted."))?,
            password: Password::new(self.password.clone()),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpForm {
    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(
        min = 6,
        message = "Password must contain at least 6 characters."
    ))]
    pub password: String,
    #[serde(default)]
    #[validate(must_match(other = "password", message = "Passwords must match."))]
    pub confirm_password: String,
    #[serde(default)]
    #[validate(custom(function = "validate_age"))]
    pub age: String,
}

impl SignUpForm {
    pub fn accept(&self) -> Result<Registration, FieldErrors> {
        self.validate().map_err(|e| field_errors(&e))?;

        let age = self
            .age
            .trim()
            .parse::<u8>()
            .map_err(|_| single("age", "Age must be a number."))?;

        Ok(Registration {
            email: EmailAddress::parse(&self.email)
                .map_err(|_| single("email", "Email must be formatted."))?,
            password: Password::new(self.password.clone()),
            age,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: String,
}

impl ForgotPasswordForm {
    pub fn accept(&self) -> Result<EmailAddress, FieldErrors> {
        self.validate().map_err(|e| field_errors(&e))?;

        EmailAddress::parse(&self.email)
            .map_err(|_| single("email", "Email must be formatted."))
    }
}

/// Profile edition. Absent fields are left untouched on save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileForm {
    #[validate(length(
        min = 2,
        max = 50,
        message = "Username must be 2 to 50 characters long."
    ))]
    pub username: Option<String>,
    #[validate(custom(function = "validate_date_of_birth"))]
    pub date_of_birth: Option<String>,
    #[validate(custom(function = "validate_mobile_number"))]
    pub mobile_number: Option<String>,
    #[validate(length(
        max = 200,
        message = "Address must be at most 200 characters long."
    ))]
    pub address: Option<String>,
}

impl ProfileForm {
    pub fn accept(&self) -> Result<ProfileUpdate, FieldErrors> {
        let trimmed = Self {
            username: self.username.as_deref().map(|s| s.trim().to_owned()),
            date_of_birth: self.date_of_birth.as_deref().map(|s| s.trim().to_owned()),
            mobile_number: self
                .mobile_number
                .as_deref()
                .map(|s| s.trim().replace(' ', "")),
            address: self.address.as_deref().map(|s| s.trim().to_owned()),
        };
        trimmed.validate().map_err(|e| field_errors(&e))?;

        Ok(ProfileUpdate {
            username: trimmed.username,
            date_of_birth: trimmed.date_of_birth,
            mobile_number: trimmed.mobile_number,
            address: trimmed.address,
            photo_url: None,
        })
    }

    /// Overlay the fields of `other` that are present.
    pub fn merge(&mut self, other: &ProfileForm) {
        if other.username.is_some() {
            self.username.clone_from(&other.username);
        }
        if other.date_of_birth.is_some() {
            self.date_of_birth.clone_from(&other.date_of_birth);
        }
        if other.mobile_number.is_some() {
            self.mobile_number.clone_from(&other.mobile_number);
        }
        if other.address.is_some() {
            self.address.clone_from(&other.address);
        }
    }
}
