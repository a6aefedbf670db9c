use crate::errors::{GuardError, GuardResult};
use regex::Regex;

/// Number of digits in an unlock PIN.
pub const PIN_LENGTH: usize = 4;

/// Input validation for credentials handled by the guard.
pub struct InputValidator {
    pin_pattern: Regex,
    email_pattern: Regex,
}

impl InputValidator {
    pub fn new() -> GuardResult<Self> {
        let pin_pattern = Regex::new(r"^[0-9]{4}$")
            .map_err(|e| GuardError::ValidationError(format!("Invalid PIN regex: {}", e)))?;

        let email_pattern = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .map_err(|e| GuardError::ValidationError(format!("Invalid email regex: {}", e)))?;

        Ok(InputValidator {
            pin_pattern,
            email_pattern,
        })
    }

    /// Validate a complete unlock PIN.
    pub fn validate_pin(&self, pin: &str) -> GuardResult<()> {
        if pin.is_empty() {
            return Err(GuardError::ValidationError(
                "PIN cannot be empty".to_string(),
            ));
        }

        if !self.pin_pattern.is_match(pin) {
            return Err(GuardError::ValidationError(format!(
                "PIN must be exactly {} digits",
                PIN_LENGTH
            )));
        }

        Ok(())
    }

    /// Validate a single keypad entry.
    pub fn validate_pin_digit(&self, digit: char) -> GuardResult<()> {
        if !digit.is_ascii_digit() {
            return Err(GuardError::ValidationError(format!(
                "'{}' is not a PIN digit",
                digit
            )));
        }
        Ok(())
    }

    /// Validate the email half of the sign-in marker.
    pub fn validate_email(&self, email: &str) -> GuardResult<()> {
        if email.len() > 254 {
            return Err(GuardError::ValidationError("Email too long".to_string()));
        }

        if !self.email_pattern.is_match(email) {
            return Err(GuardError::ValidationError(
                "Email format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Repeated or sequential PINs are accepted but worth a warning.
    /// Non-digit input is never trivial.
    pub fn is_trivial_pin(&self, pin: &str) -> bool {
        let Some(digits) = pin
            .chars()
            .map(|c| c.to_digit(10))
            .collect::<Option<Vec<u32>>>()
        else {
            return false;
        };
        if digits.len() < 2 {
            return false;
        }
        let all_same = digits.iter().all(|d| *d == digits[0]);
        let ascending = digits.windows(2).all(|w| w[1] == w[0] + 1);
        let descending = digits.windows(2).all(|w| w[0] == w[1] + 1);
        all_same || ascending || descending
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}
