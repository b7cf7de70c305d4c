use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{PlanError, PlanResult, ensure_finite, ensure_fraction, ensure_non_negative};

const BOND_SECTORS: [&str; 3] = ["bond", "bonds", "fixed income"];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Taxable,
    Roth,
    Traditional,
}

impl AccountType {
    pub const ALL: [AccountType; 3] = [
        AccountType::Taxable,
        AccountType::Roth,
        AccountType::Traditional,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AccountType::Taxable => "taxable",
            AccountType::Roth => "roth",
            AccountType::Traditional => "traditional",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            AccountType::Taxable => 0,
            AccountType::Roth => 1,
            AccountType::Traditional => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub symbol: String,
    pub expected_return: f64,
    pub volatility: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    pub sector: String,
}

impl Asset {
    pub fn is_bond(&self) -> bool {
        let sector = self.sector.trim().to_ascii_lowercase();
        BOND_SECTORS.contains(&sector.as_str())
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(PlanError::invalid("asset symbol must not be empty"));
        }
        ensure_finite(
            self.expected_return,
            &format!("{} expected return", self.symbol),
        )?;
        ensure_non_negative(self.volatility, &format!("{} volatility", self.symbol))?;
        ensure_non_negative(
            self.dividend_yield,
            &format!("{} dividend yield", self.symbol),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub shares: f64,
    pub purchase_price: f64,
    pub current_price: f64,
    pub account: AccountType,
}

impl Holding {
    pub fn value(&self) -> f64 {
        self.shares * self.current_price
    }

    pub fn validate(&self) -> PlanResult<()> {
        ensure_finite(self.shares, &format!("{} shares", self.symbol))?;
        if self.shares <= 0.0 {
            return Err(PlanError::invalid(format!(
                "{} shares must be > 0",
                self.symbol
            )));
        }
        ensure_non_negative(
            self.purchase_price,
            &format!("{} purchase price", self.symbol),
        )?;
        ensure_non_negative(self.current_price, &format!("{} current price", self.symbol))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLot {
    pub lot_id: String,
    pub symbol: String,
    pub purchase_date: NaiveDate,
    pub shares: f64,
    pub purchase_price: f64,
    pub current_price: f64,
    pub account: AccountType,
}

impl TaxLot {
    /// Only taxable lots trading below cost can realize a deductible loss.
    pub fn is_loss_eligible(&self) -> bool {
        self.account == AccountType::Taxable && self.current_price < self.purchase_price
    }

    pub fn unrealized_loss(&self) -> f64 {
        ((self.purchase_price - self.current_price) * self.shares).max(0.0)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.lot_id.trim().is_empty() {
            return Err(PlanError::invalid("lot id must not be empty"));
        }
        ensure_finite(self.shares, &format!("lot {} shares", self.lot_id))?;
        if self.shares <= 0.0 {
            return Err(PlanError::invalid(format!(
                "lot {} shares must be > 0",
                self.lot_id
            )));
        }
        ensure_non_negative(
            self.purchase_price,
            &format!("lot {} purchase price", self.lot_id),
        )?;
        ensure_non_negative(
            self.current_price,
            &format!("lot {} current price", self.lot_id),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalances {
    #[serde(default)]
    pub taxable: f64,
    #[serde(default)]
    pub roth: f64,
    #[serde(default)]
    pub traditional: f64,
}

impl AccountBalances {
    pub fn get(&self, account: AccountType) -> f64 {
        match account {
            AccountType::Taxable => self.taxable,
            AccountType::Roth => self.roth,
            AccountType::Traditional => self.traditional,
        }
    }

    pub fn total(&self) -> f64 {
        self.taxable + self.roth + self.traditional
    }

    pub fn validate(&self) -> PlanResult<()> {
        for account in AccountType::ALL {
            ensure_non_negative(
                self.get(account),
                &format!("{} account balance", account.label()),
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskConstraints {
    pub max_volatility: f64,
    pub max_single_position: f64,
    pub max_sector_weight: f64,
    pub min_bond_allocation: f64,
}

impl Default for RiskConstraints {
    fn default() -> Self {
        Self {
            max_volatility: 0.15,
            max_single_position: 0.25,
            max_sector_weight: 0.40,
            min_bond_allocation: 0.10,
        }
    }
}

impl RiskConstraints {
    pub fn validate(&self) -> PlanResult<()> {
        ensure_finite(self.max_volatility, "max volatility")?;
        if self.max_volatility <= 0.0 {
            return Err(PlanError::invalid("max volatility must be > 0"));
        }
        ensure_fraction(self.max_single_position, "max single position")?;
        ensure_fraction(self.max_sector_weight, "max sector weight")?;
        ensure_fraction(self.min_bond_allocation, "min bond allocation")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorProfile {
    pub age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    #[serde(default)]
    pub monthly_contribution: f64,
    #[serde(default)]
    pub account_balances: AccountBalances,
    #[serde(default)]
    pub risk: RiskConstraints,
    pub retirement_goal: f64,
}

impl InvestorProfile {
    pub fn accumulation_years(&self) -> u32 {
        self.retirement_age.saturating_sub(self.age)
    }

    pub fn retirement_years(&self) -> u32 {
        self.life_expectancy.saturating_sub(self.retirement_age)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.retirement_age <= self.age {
            return Err(PlanError::invalid("retirement age must be > age"));
        }
        if self.life_expectancy < self.retirement_age {
            return Err(PlanError::invalid(
                "life expectancy must be >= retirement age",
            ));
        }
        ensure_non_negative(self.monthly_contribution, "monthly contribution")?;
        ensure_non_negative(self.retirement_goal, "retirement goal")?;
        self.account_balances.validate()?;
        self.risk.validate()
    }
}

/// Capital-market assumptions for a single blended portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub mean_return: f64,
    pub volatility: f64,
}

impl MarketAssumptions {
    pub fn validate(&self) -> PlanResult<()> {
        ensure_finite(self.mean_return, "mean return")?;
        ensure_non_negative(self.volatility, "return volatility")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(account: AccountType, purchase: f64, current: f64) -> TaxLot {
        TaxLot {
            lot_id: "L1".to_string(),
            symbol: "VTI".to_string(),
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
            shares: 10.0,
            purchase_price: purchase,
            current_price: current,
            account,
        }
    }

    #[test]
    fn bond_sector_detection_is_case_insensitive() {
        let mut asset = Asset {
            symbol: "BND".to_string(),
            expected_return: 0.04,
            volatility: 0.05,
            dividend_yield: 0.03,
            sector: "Fixed Income".to_string(),
        };
        assert!(asset.is_bond());
        asset.sector = " BONDS ".to_string();
        assert!(asset.is_bond());
        asset.sector = "Technology".to_string();
        assert!(!asset.is_bond());
    }

    #[test]
    fn loss_eligibility_requires_taxable_account_and_price_below_cost() {
        assert!(lot(AccountType::Taxable, 100.0, 80.0).is_loss_eligible());
        assert!(!lot(AccountType::Roth, 100.0, 80.0).is_loss_eligible());
        assert!(!lot(AccountType::Taxable, 100.0, 100.0).is_loss_eligible());
        assert!((lot(AccountType::Taxable, 100.0, 80.0).unrealized_loss() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn profile_rejects_retirement_before_current_age() {
        let profile = InvestorProfile {
            age: 50,
            retirement_age: 45,
            life_expectancy: 90,
            monthly_contribution: 0.0,
            account_balances: AccountBalances::default(),
            risk: RiskConstraints::default(),
            retirement_goal: 1_000_000.0,
        };
        let err = profile.validate().expect_err("must reject");
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn risk_constraints_reject_caps_above_one() {
        let risk = RiskConstraints {
            max_single_position: 1.5,
            ..RiskConstraints::default()
        };
        assert!(risk.validate().is_err());
    }
}
