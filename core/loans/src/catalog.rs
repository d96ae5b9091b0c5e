//! Catalog of loan products.

use serde::{Deserialize, Serialize};

use loantrack_common::{Error, Result};

/// A loan product applicants can choose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanType {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Documents an application of this type must carry.
    pub required_documents: Vec<String>,
    /// Largest amount that may be requested, in rupees.
    pub max_amount: u64,
    /// Annual interest rate in percent.
    pub interest_rate: f64,
}

impl LoanType {
    fn new(
        id: &str,
        name: &str,
        description: &str,
        icon: &str,
        required_documents: &[&str],
        max_amount: u64,
        interest_rate: f64,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            required_documents: required_documents.iter().map(|d| d.to_string()).collect(),
            max_amount,
            interest_rate,
        }
    }

    /// Check a requested amount against this product's limit.
    ///
    /// # Errors
    /// - Amount is zero or above the maximum
    pub fn check_amount(&self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidInput("Loan amount must be greater than zero".to_string()));
        }
        if amount > self.max_amount {
            return Err(Error::InvalidInput(format!(
                "{} amount {} exceeds the maximum of {}",
                self.name, amount, self.max_amount
            )));
        }
        Ok(())
    }
}

/// The set of loan products on offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanCatalog {
    types: Vec<LoanType>,
}

impl Default for LoanCatalog {
    fn default() -> Self {
        Self {
            types: vec![
                LoanType::new(
                    "home",
                    "Home Loan",
                    "Finance your dream home",
                    "home",
                    &["Property Documents", "Income Proof", "Identity Proof"],
                    5_000_000,
                    8.5,
                ),
                LoanType::new(
                    "education",
                    "Education Loan",
                    "Invest in your future",
                    "school",
                    &["Admission Letter", "Fee Structure", "Identity Proof"],
                    2_000_000,
                    9.0,
                ),
                LoanType::new(
                    "vehicle",
                    "Vehicle Loan",
                    "Get your wheels moving",
                    "directions-car",
                    &["Vehicle Documents", "Income Proof", "Identity Proof"],
                    1_500_000,
                    10.5,
                ),
                LoanType::new(
                    "personal",
                    "Personal Loan",
                    "Meet your personal needs",
                    "person",
                    &["Income Proof", "Identity Proof", "Address Proof"],
                    1_000_000,
                    12.0,
                ),
                LoanType::new(
                    "business",
                    "Business Loan",
                    "Grow your business",
                    "business",
                    &["Business Plan", "Financial Statements", "Identity Proof"],
                    10_000_000,
                    11.5,
                ),
                LoanType::new(
                    "gold",
                    "Gold Loan",
                    "Liquidate your gold assets",
                    "diamond",
                    &["Gold Valuation Certificate", "Identity Proof"],
                    500_000,
                    9.5,
                ),
                LoanType::new(
                    "lap",
                    "Loan Against Property",
                    "Unlock your property value",
                    "home-work",
                    &["Property Documents", "Income Proof", "Identity Proof"],
                    8_000_000,
                    9.0,
                ),
                LoanType::new(
                    "agriculture",
                    "Agriculture Loan",
                    "Support your farming needs",
                    "agriculture",
                    &["Land Documents", "Crop Details", "Identity Proof"],
                    3_000_000,
                    7.5,
                ),
            ],
        }
    }
}

impl LoanCatalog {
    /// Build a catalog from custom products.
    ///
    /// # Errors
    /// - Two products share an id
    pub fn new(types: Vec<LoanType>) -> Result<Self> {
        for (i, t) in types.iter().enumerate() {
            if types[..i].iter().any(|other| other.id == t.id) {
                return Err(Error::AlreadyExists(format!("Loan type {}", t.id)));
            }
        }
        Ok(Self { types })
    }

    /// Products in display order.
    pub fn types(&self) -> &[LoanType] {
        &self.types
    }

    pub fn get(&self, id: &str) -> Option<&LoanType> {
        self.types.iter().find(|t| t.id == id)
    }

    /// Look up a product, failing when it does not exist.
    pub fn require(&self, id: &str) -> Result<&LoanType> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("Unknown loan type: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = LoanCatalog::default();
        let ids: Vec<&str> = catalog.types().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["home", "education", "vehicle", "personal", "business", "gold", "lap", "agriculture"]
        );

        let gold = catalog.get("gold").unwrap();
        assert_eq!(gold.max_amount, 500_000);
        assert_eq!(gold.required_documents.len(), 2);
    }

    #[test]
    fn test_check_amount() {
        let catalog = LoanCatalog::default();
        let personal = catalog.require("personal").unwrap();
        assert!(personal.check_amount(0).is_err());
        assert!(personal.check_amount(1).is_ok());
        assert!(personal.check_amount(1_000_000).is_ok());
        assert!(personal.check_amount(1_000_001).is_err());
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            LoanCatalog::default().require("yacht"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let catalog = LoanCatalog::default();
        let mut types = catalog.types().to_vec();
        types.push(types[0].clone());
        assert!(LoanCatalog::new(types).is_err());
    }
}
