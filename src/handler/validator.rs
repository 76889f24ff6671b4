//! PREPARE validation. Every failed check adds one reason; all checks run.

use super::remittance::PrepareFacts;
use crate::config::HandlerConfig;
use crate::crypto;
use crate::cyril::{DeterminingTransferCheck, ProxyObligation};
use crate::directory::{DirectoryError, ParticipantDirectory};
use crate::domain::{Decimal, Headers, ParticipantName};
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub reasons: Vec<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.reasons.is_empty()
    }

    /// All reasons joined for storage and error descriptions, `None` when passed.
    pub fn reason(&self) -> Option<String> {
        if self.passed() {
            None
        } else {
            Some(self.reasons.join(", "))
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    fn extend(&mut self, reasons: Vec<String>) {
        self.reasons.extend(reasons);
    }
}

pub struct PrepareValidator<'a> {
    directory: &'a dyn ParticipantDirectory,
    config: &'a HandlerConfig,
}

impl<'a> PrepareValidator<'a> {
    pub fn new(directory: &'a dyn ParticipantDirectory, config: &'a HandlerConfig) -> Self {
        PrepareValidator { directory, config }
    }

    pub async fn validate(
        &self,
        headers: &Headers,
        facts: &PrepareFacts<'_>,
        proxy: &ProxyObligation,
        check: &DeterminingTransferCheck,
        now: DateTime<Utc>,
    ) -> Result<ValidationResult, DirectoryError> {
        let mut result = ValidationResult::default();

        if !proxy.is_initiating_fsp_proxy() && !headers.source.matches(facts.debtor) {
            result.fail("FSPIOP-Source header should match Payer");
        }

        if !proxy.is_initiating_fsp_proxy() {
            self.validate_participant(facts.debtor, &mut result).await?;
        }
        if !proxy.is_counter_party_fsp_proxy() {
            self.validate_participant(facts.creditor, &mut result).await?;
        }

        for money in &facts.amounts {
            result.extend(validate_amount(
                &money.amount,
                self.config.amount_scale,
                self.config.amount_precision,
            ));
        }

        if !self.config.enable_on_us_transfers && facts.debtor.matches(facts.creditor) {
            result.fail("Payer and Payee should be different");
        }

        result.extend(validate_condition_and_expiration(
            facts.condition,
            facts.expiration,
            now,
        ));

        for pair in &check.participant_currency_validation_list {
            let account = self
                .directory
                .get_account_by_name_and_currency(&pair.participant_name, &pair.currency)
                .await?;
            match account {
                None => result.fail(format!(
                    "Participant {} {} account not found",
                    pair.participant_name, pair.currency
                )),
                Some(account) if !account.is_active => result.fail(format!(
                    "Participant {} {} account is inactive",
                    pair.participant_name, pair.currency
                )),
                Some(_) => {}
            }
        }

        Ok(result)
    }

    async fn validate_participant(
        &self,
        name: &ParticipantName,
        result: &mut ValidationResult,
    ) -> Result<(), DirectoryError> {
        match self.directory.get_by_name(name).await? {
            None => result.fail(format!("Participant {} not found", name)),
            Some(participant) if !participant.is_active => {
                result.fail(format!("Participant {} is inactive", name))
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// Amount must be positive and fit the configured scale and precision.
pub fn validate_amount(amount: &Decimal, scale: u32, precision: u32) -> Vec<String> {
    let mut reasons = Vec::new();
    if !amount.is_positive() {
        reasons.push(format!("Amount {} must be positive", amount));
    }
    if amount.scale() > scale {
        reasons.push(format!(
            "Amount {} exceeds allowed scale of {}",
            amount, scale
        ));
    }
    if amount.precision() > precision {
        reasons.push(format!(
            "Amount {} exceeds allowed precision of {}",
            amount, precision
        ));
    }
    reasons
}

pub fn validate_condition_and_expiration(
    condition: Option<&str>,
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reasons = Vec::new();
    match condition {
        None => reasons.push("Condition is required for a conditional transfer".to_string()),
        Some(condition) => {
            if crypto::validate_condition(&crypto::condition_uri(condition)).is_err() {
                reasons.push("Condition validation failed".to_string());
            }
        }
    }
    if let Some(expiration) = expiration {
        if expiration <= now {
            reasons.push(format!(
                "Expiration date {} is already in the past",
                expiration.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
        }
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const CONDITION: &str = "Zmh6rfhivXdsj8GLjp-OIAiXFIVu4jOzkCpZHQ1fKSU";

    fn amount(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_amount_within_limits() {
        assert!(validate_amount(&amount("100.50"), 4, 18).is_empty());
        assert!(validate_amount(&amount("1.0000"), 4, 18).is_empty());
    }

    #[test]
    fn test_amount_scale_exceeded() {
        let reasons = validate_amount(&amount("1.12345"), 4, 18);
        assert_eq!(reasons, vec!["Amount 1.12345 exceeds allowed scale of 4"]);
    }

    #[test]
    fn test_amount_precision_exceeded() {
        let reasons = validate_amount(&amount("123456"), 0, 5);
        assert_eq!(reasons, vec!["Amount 123456 exceeds allowed precision of 5"]);
    }

    #[test]
    fn test_amount_must_be_positive() {
        let reasons = validate_amount(&amount("0"), 4, 18);
        assert_eq!(reasons, vec!["Amount 0 must be positive"]);
    }

    #[test]
    fn test_missing_condition() {
        let now = Utc::now();
        let reasons = validate_condition_and_expiration(None, None, now);
        assert_eq!(reasons, vec!["Condition is required for a conditional transfer"]);
    }

    #[test]
    fn test_malformed_condition() {
        let now = Utc::now();
        let reasons = validate_condition_and_expiration(Some("not-a-hash"), None, now);
        assert_eq!(reasons, vec!["Condition validation failed"]);
        assert!(validate_condition_and_expiration(Some(CONDITION), None, now).is_empty());
    }

    #[test]
    fn test_expired_prepare() {
        let now = Utc::now();
        let past = now - Duration::seconds(5);
        let reasons = validate_condition_and_expiration(Some(CONDITION), Some(past), now);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("Expiration date "));
        assert!(reasons[0].ends_with(" is already in the past"));

        let future = now + Duration::minutes(5);
        assert!(validate_condition_and_expiration(Some(CONDITION), Some(future), now).is_empty());
    }

    #[test]
    fn test_reason_joins_all_failures() {
        let mut result = ValidationResult::default();
        assert!(result.passed());
        assert_eq!(result.reason(), None);
        result.fail("first");
        result.fail("second");
        assert!(!result.passed());
        assert_eq!(result.reason(), Some("first, second".to_string()));
    }
}
