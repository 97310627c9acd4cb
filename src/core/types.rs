use serde::{Deserialize, Serialize};

/// Macro-economic assumptions shared by every inflated quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Economy {
    /// Annual inflation in percent, applied once per full elapsed year.
    pub inflation_rate_percent: f64,
    /// Whether the rent excluding charges follows inflation.
    #[serde(default = "default_rent_indexed")]
    pub rent_indexed: bool,
}

fn default_rent_indexed() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Carrez living area in square metres.
    pub area_sqm: f64,
    pub price: f64,
    pub notary_fees: f64,
    /// Monthly rent excluding charges.
    pub rent_excl_charges: f64,
    /// Monthly charges paid back by the tenant.
    pub recoverable_charges: f64,
    /// Monthly condominium charges paid by the owner.
    pub condo_charges: f64,
    /// Property tax smoothed per month.
    pub property_tax: f64,
    /// Management fee in percent of the rent including charges.
    pub management_rate_percent: f64,
    /// Letting fee per square metre, paid at each new tenancy.
    pub letting_fee_per_sqm: f64,
    pub months_between_tenants: f64,
    /// Renovation works spread per month.
    pub amortized_renovation: f64,
    /// Monthly non-occupant owner insurance.
    pub home_insurance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub principal: f64,
    pub opening_fees: f64,
    pub guarantee_fees: f64,
    /// Nominal annual rate in percent.
    pub annual_rate_percent: f64,
    pub term_months: u32,
    /// Monthly borrower insurance.
    pub monthly_insurance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxProfile {
    /// Reference taxable income declared for the previous year.
    pub reference_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub economy: Economy,
    pub property: Property,
    pub loan: Loan,
    pub tax_profile: TaxProfile,
}

impl Scenario {
    /// A 50 m² flat bought 500 000 € with a 400 000 € loan over 20 years.
    pub fn example() -> Self {
        Self {
            economy: Economy {
                inflation_rate_percent: 1.0,
                // Declared non-indexed in the published fixture, but its figures use indexed rent.
                rent_indexed: true,
            },
            property: Property {
                area_sqm: 50.0,
                price: 500_000.0,
                notary_fees: 40_000.0,
                rent_excl_charges: 2_000.0,
                recoverable_charges: 400.0,
                condo_charges: 4_000.0 / 12.0,
                property_tax: 2_000.0 / 12.0,
                management_rate_percent: 7.0,
                letting_fee_per_sqm: 15.0,
                months_between_tenants: 3.0 * 12.0,
                amortized_renovation: 0.0,
                home_insurance: 40.0,
            },
            loan: Loan {
                principal: 400_000.0,
                opening_fees: 2_000.0,
                guarantee_fees: 5_000.0,
                annual_rate_percent: 3.0,
                term_months: 20 * 12,
                monthly_insurance: 6.0,
            },
            tax_profile: TaxProfile {
                reference_income: 100_000.0,
            },
        }
    }
}

/// One-shot break-even markers set on the first month each condition holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakEvenEvents {
    pub resale_break_even: bool,
    pub no_resale_break_even: bool,
}

impl BreakEvenEvents {
    pub fn any(self) -> bool {
        self.resale_break_even || self.no_resale_break_even
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRecord {
    /// 1-based month number.
    pub month: u32,
    pub remaining_principal: f64,
    pub revenue: f64,
    pub expenses: f64,
    pub net_income_after_fees: f64,
    pub deduction_ratio_percent: f64,
    pub income_tax: f64,
    pub total_taxes: f64,
    pub profit: f64,
    pub cumulative_profit: f64,
    pub resale_price: f64,
    pub resale_balance: f64,
    pub loan_ended: bool,
    pub events: BreakEvenEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ProjectionOutcome {
    /// Loan repaid and cumulative profit non-negative.
    Completed { months: u32 },
    /// Safety cutoff reached while the run would have continued.
    TooLong { months: u32 },
}

impl ProjectionOutcome {
    pub fn months(self) -> u32 {
        match self {
            ProjectionOutcome::Completed { months } | ProjectionOutcome::TooLong { months } => {
                months
            }
        }
    }

    pub fn is_too_long(self) -> bool {
        matches!(self, ProjectionOutcome::TooLong { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub inflation_rate_percent: f64,
    pub price_per_sqm: f64,
    pub monthly_payment: f64,
    pub monthly_insurance: f64,
    pub monthly_payment_with_insurance: f64,
    pub loan_cost: f64,
    pub total_project_cost: f64,
    pub personal_contribution: f64,
    pub term_months: u32,
    pub marginal_tax_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub summary: ProjectionSummary,
    pub months: Vec<MonthRecord>,
    pub outcome: ProjectionOutcome,
}

impl Projection {
    pub fn resale_break_even(&self) -> Option<&MonthRecord> {
        self.months.iter().find(|r| r.events.resale_break_even)
    }

    pub fn no_resale_break_even(&self) -> Option<&MonthRecord> {
        self.months.iter().find(|r| r.events.no_resale_break_even)
    }
}
