//! Structured financial statement returned by the extraction stage.
//!
//! Field doc comments become schema descriptions in the strict JSON schema
//! sent with the extraction request.
//!
//! Cash convention: cash balances are reported as ordinary holdings (market
//! value and currency only), so an account's value must equal the sum of its
//! holdings' market values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{AccountValueMismatchError, StatementValidationError};

/// Default tolerance for the holdings-sum check, in currency units.
pub const DEFAULT_ACCOUNT_VALUE_TOLERANCE: f64 = 0.01;

// Absorbs binary representation error of cent amounts.
const FLOAT_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinancialStatement {
    /// Client information
    pub client: Client,
    /// List of accounts
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Client {
    /// First name of the client
    pub first_name: Option<String>,
    /// Last name of the client
    pub last_name: Option<String>,
    /// Unit number of the client's address
    pub client_unit_number: Option<String>,
    /// Street number of the client's address
    pub client_street_number: Option<String>,
    /// Street name of the client's address
    pub client_street_name: Option<String>,
    /// City of the client's address
    pub client_city: Option<String>,
    /// Province of the client's address
    pub client_province: Option<String>,
    /// Postal code of the client's address
    pub client_postal_code: Option<String>,
    /// Country of the client's address
    pub client_country: Option<String>,
}

/// Registered and non-registered Canadian account types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AccountType {
    #[serde(rename = "TFSA")]
    Tfsa,
    #[serde(rename = "FHSA")]
    Fhsa,
    Cash,
    #[serde(rename = "RRSP")]
    Rrsp,
    #[serde(rename = "RRSP-Spousal")]
    RrspSpousal,
    #[serde(rename = "LIRA")]
    Lira,
    #[serde(rename = "RESP-Family")]
    RespFamily,
    #[serde(rename = "RIF-Spousal")]
    RifSpousal,
    #[serde(rename = "RESP-Single")]
    RespSingle,
    #[serde(rename = "RRIF")]
    Rrif,
    #[serde(rename = "GRSP")]
    Grsp,
    #[serde(rename = "LRSP")]
    Lrsp,
    #[serde(rename = "LIF")]
    Lif,
    #[serde(rename = "PRIF")]
    Prif,
    #[serde(rename = "GTFSA")]
    Gtfsa,
    #[serde(rename = "LRIF")]
    Lrif,
    #[serde(rename = "RLIF")]
    Rlif,
    #[serde(rename = "GSRSP")]
    Gsrsp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Account {
    /// ID of the account
    pub account_id: Option<String>,
    /// Type of the account
    pub account_type: AccountType,
    /// Currency the account is reported in
    pub account_currency: Option<String>,
    /// Statement start date for the account
    pub statement_start_date: Option<String>,
    /// Statement end date for the account
    pub statement_end_date: Option<String>,
    /// Management fee amount for the account
    pub management_fee_amount: Option<f64>,
    /// List of holdings in the account, cash balances included
    pub holdings: Vec<Holding>,
    /// Total value of the account
    pub account_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Holding {
    /// Symbol or ticker of the investment
    pub symbol: Option<String>,
    /// Description or name of the investment ("Cash" for cash balances)
    pub description: String,
    /// CUSIP of the investment
    pub cusip: Option<String>,
    /// Quantity of the investment
    pub quantity: Option<f64>,
    /// Book value or cost basis of the investment
    pub book_value: Option<f64>,
    /// Cost per share of the investment
    pub cost_per_share: Option<f64>,
    /// Market value of the investment
    pub market_value: f64,
    /// Current price of the investment
    pub current_price: Option<f64>,
    /// Currency of the holding
    pub currency: String,
}

impl Holding {
    /// A cash balance reported as a holding.
    pub fn cash(market_value: f64, currency: impl Into<String>) -> Self {
        Self {
            symbol: None,
            description: "Cash".to_string(),
            cusip: None,
            quantity: None,
            book_value: None,
            cost_per_share: None,
            market_value,
            current_price: None,
            currency: currency.into(),
        }
    }
}

impl Account {
    pub fn holdings_total(&self) -> f64 {
        self.holdings.iter().map(|h| h.market_value).sum()
    }

    /// Label used in validation errors.
    pub fn display_id(&self) -> String {
        self.account_id
            .clone()
            .unwrap_or_else(|| format!("<unnamed {:?}>", self.account_type))
    }

    /// Check the reported value against the holdings total. Accounts without
    /// a reported value pass.
    pub fn validate_value(&self, tolerance: f64) -> Result<(), AccountValueMismatchError> {
        let Some(account_value) = self.account_value else {
            return Ok(());
        };
        let holdings_total = self.holdings_total();
        if (account_value - holdings_total).abs() > tolerance + FLOAT_SLACK {
            return Err(AccountValueMismatchError {
                account: self.display_id(),
                account_value,
                holdings_total,
                tolerance,
            });
        }
        Ok(())
    }
}

impl FinancialStatement {
    /// Validate every account, collecting all mismatches.
    pub fn validate(&self, tolerance: f64) -> Result<(), StatementValidationError> {
        let mismatches: Vec<_> = self
            .accounts
            .iter()
            .filter_map(|account| account.validate_value(tolerance).err())
            .collect();

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(StatementValidationError { mismatches })
        }
    }

    pub fn holdings_count(&self) -> usize {
        self.accounts.iter().map(|a| a.holdings.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openai_client::StructuredOutput;

    fn holding(market_value: f64) -> Holding {
        Holding {
            symbol: Some("XIU".into()),
            description: "ISHARES S&P/TSX 60 INDEX ETF".into(),
            cusip: None,
            quantity: Some(10.0),
            book_value: None,
            cost_per_share: None,
            market_value,
            current_price: None,
            currency: "CAD".into(),
        }
    }

    fn account(value: Option<f64>, holdings: Vec<Holding>) -> Account {
        Account {
            account_id: Some("3C8B0M-N".into()),
            account_type: AccountType::Lira,
            account_currency: Some("CAD".into()),
            statement_start_date: None,
            statement_end_date: None,
            management_fee_amount: None,
            holdings,
            account_value: value,
        }
    }

    #[test]
    fn test_mismatch_beyond_tolerance_fails() {
        let acct = account(Some(1000.00), vec![holding(600.00), holding(399.50)]);
        let err = acct.validate_value(DEFAULT_ACCOUNT_VALUE_TOLERANCE).unwrap_err();
        assert_eq!(err.account, "3C8B0M-N");
        assert!((err.holdings_total - 999.50).abs() < 1e-9);
    }

    #[test]
    fn test_difference_at_tolerance_passes() {
        let acct = account(Some(1000.00), vec![holding(999.99)]);
        assert!(acct.validate_value(0.01).is_ok());
    }

    #[test]
    fn test_cash_counts_toward_total() {
        let acct = account(Some(1000.00), vec![holding(800.00), Holding::cash(200.00, "CAD")]);
        assert!(acct.validate_value(0.01).is_ok());
    }

    #[test]
    fn test_missing_account_value_passes() {
        assert!(account(None, vec![holding(5.0)]).validate_value(0.01).is_ok());
    }

    #[test]
    fn test_statement_collects_all_mismatches() {
        let statement = FinancialStatement {
            client: Client::default(),
            accounts: vec![
                account(Some(10.0), vec![holding(1.0)]),
                account(Some(5.0), vec![holding(5.0)]),
                account(Some(3.0), vec![]),
            ],
        };
        let err = statement.validate(0.01).unwrap_err();
        assert_eq!(err.mismatches.len(), 2);
    }

    #[test]
    fn test_account_type_wire_names() {
        let json = serde_json::to_string(&AccountType::RrspSpousal).unwrap();
        assert_eq!(json, "\"RRSP-Spousal\"");
        let parsed: AccountType = serde_json::from_str("\"Cash\"").unwrap();
        assert_eq!(parsed, AccountType::Cash);
    }

    #[test]
    fn test_strict_schema_closes_objects() {
        let schema = FinancialStatement::strict_schema();
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
        let account = &schema["properties"]["accounts"]["items"];
        assert_eq!(account["additionalProperties"], serde_json::json!(false));
        assert!(account["required"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("account_value")));
    }
}
