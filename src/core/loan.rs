use tracing::debug;

use super::error::{SimulationError, SimulationResult};
use super::types::Loan;

/// Longest loan the projection horizon can cover.
pub const MAX_TERM_MONTHS: u32 = 1200;

/// Fixed monthly installment from the annuity formula, insurance excluded.
pub fn monthly_payment(loan: &Loan) -> f64 {
    let coeff = loan.annual_rate_percent / 100.0 / 12.0;
    loan.principal * coeff / (1.0 - (1.0 + coeff).powi(-(loan.term_months as i32)))
}

/// Interest plus insurance plus one-time fees over the whole term.
pub fn total_cost(loan: &Loan) -> f64 {
    (monthly_payment(loan) + loan.monthly_insurance) * f64::from(loan.term_months)
        - loan.principal
        + loan.opening_fees
        + loan.guarantee_fees
}

fn validate_loan(loan: &Loan) -> SimulationResult<()> {
    if loan.term_months == 0 {
        return Err(SimulationError::invalid("termMonths", "must be > 0"));
    }
    if loan.term_months > MAX_TERM_MONTHS {
        return Err(SimulationError::invalid(
            "termMonths",
            format!("must be <= {MAX_TERM_MONTHS}"),
        ));
    }
    if !loan.annual_rate_percent.is_finite() || loan.annual_rate_percent <= 0.0 {
        return Err(SimulationError::invalid(
            "annualRatePercent",
            "must be a finite rate > 0",
        ));
    }
    for (name, value) in [
        ("principal", loan.principal),
        ("openingFees", loan.opening_fees),
        ("guaranteeFees", loan.guarantee_fees),
        ("monthlyInsurance", loan.monthly_insurance),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(SimulationError::invalid(name, "must be a finite amount >= 0"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AmortizationRow {
    interest: f64,
    remaining_principal: f64,
}

/// Interest due and principal outstanding for every month of the loan,
/// before that month's installment is paid.
#[derive(Debug, Clone)]
pub struct AmortizationSchedule {
    monthly_payment: f64,
    rows: Vec<AmortizationRow>,
}

impl AmortizationSchedule {
    pub fn new(loan: &Loan) -> SimulationResult<Self> {
        validate_loan(loan)?;
        Ok(Self::build(loan))
    }

    fn build(loan: &Loan) -> Self {
        let payment = monthly_payment(loan);
        let monthly_rate = loan.annual_rate_percent / 12.0 / 100.0;
        let term = loan.term_months as usize;

        let mut rows = Vec::with_capacity(term);
        let mut current = AmortizationRow {
            interest: monthly_rate * loan.principal,
            remaining_principal: loan.principal,
        };
        rows.push(current);
        for _ in 1..term {
            let remaining_principal =
                current.remaining_principal - (payment - current.interest);
            current = AmortizationRow {
                interest: monthly_rate * remaining_principal,
                remaining_principal,
            };
            rows.push(current);
        }

        debug!(
            term_months = loan.term_months,
            monthly_payment = payment,
            "amortization schedule built"
        );

        Self {
            monthly_payment: payment,
            rows,
        }
    }

    pub fn monthly_payment(&self) -> f64 {
        self.monthly_payment
    }

    pub fn term_months(&self) -> u32 {
        self.rows.len() as u32
    }

    /// Interest due for `month`; zero once the loan is repaid.
    pub fn interest(&self, month: u32) -> f64 {
        self.rows
            .get(month as usize)
            .map_or(0.0, |row| row.interest)
    }

    /// Principal outstanding at the start of `month`; zero once repaid.
    pub fn remaining_principal(&self, month: u32) -> f64 {
        self.rows
            .get(month as usize)
            .map_or(0.0, |row| row.remaining_principal)
    }
}
