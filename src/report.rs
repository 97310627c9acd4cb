//! Console rendering of a projection.
//!
//! Months that carry no information worth reading are collapsed into a
//! single elision marker per contiguous run.

use std::fmt::{self, Write};

use crate::core::{MonthRecord, Projection, ProjectionSummary};

/// Leading months always printed.
const LEADING_MONTHS: u32 = 15;
const ELISION_MARKER: &str = " ...";

const COLUMNS: &str = "month, principal,   revenue,  expenses, net income, % deduc, income tax,     taxes,     profit, cumulative, resale bal";

/// Whether `record` gets its own row in a report for a loan of `term_months`.
pub fn is_reported(record: &MonthRecord, term_months: u32) -> bool {
    let index = record.month - 1;
    index < LEADING_MONTHS
        || (index + 3 > term_months && index <= term_months)
        || record.month % 12 == 0
        || record.events.any()
}

pub fn render_report(projection: &Projection) -> String {
    let mut out = String::new();
    write_report(&mut out, projection).ok();
    out
}

pub fn write_report(out: &mut impl Write, projection: &Projection) -> fmt::Result {
    write_summary(out, &projection.summary)?;
    writeln!(out)?;
    writeln!(out, "{COLUMNS}")?;

    let term_months = projection.summary.term_months;
    let mut eliding = false;
    for record in &projection.months {
        if is_reported(record, term_months) {
            write_row(out, record)?;
            eliding = false;
        } else if !eliding {
            writeln!(out, "{ELISION_MARKER}")?;
            eliding = true;
        }
    }

    if projection.outcome.is_too_long() {
        writeln!(out, "Projection too long")?;
    }
    Ok(())
}

fn write_summary(out: &mut impl Write, summary: &ProjectionSummary) -> fmt::Result {
    writeln!(
        out,
        "Inflation:   {:.2}% per year",
        summary.inflation_rate_percent
    )?;
    writeln!(out, "Price per m2:           {:>11.2}", summary.price_per_sqm)?;
    writeln!(
        out,
        "Payment + insurance:    {:>11.2} = {:.2} + {:.2}",
        summary.monthly_payment_with_insurance, summary.monthly_payment, summary.monthly_insurance
    )?;
    writeln!(out, "Loan cost:              {:>11.2}", summary.loan_cost)?;
    writeln!(out, "Total project:          {:>11.2}", summary.total_project_cost)?;
    writeln!(
        out,
        "Personal contribution:  {:>11.2}",
        summary.personal_contribution
    )
}

fn write_row(out: &mut impl Write, record: &MonthRecord) -> fmt::Result {
    write!(
        out,
        "{:>4},{:>10.2},{:>10.2},{:>10.2},{:>10.2},{:>7.2}%,{:>10.2},{:>10.2},{:>11.2},{:>11.2},{:>11.2}",
        record.month,
        record.remaining_principal,
        record.revenue,
        record.expenses,
        record.net_income_after_fees,
        record.deduction_ratio_percent,
        record.income_tax,
        record.total_taxes,
        record.profit,
        record.cumulative_profit,
        record.resale_balance,
    )?;

    let full_year = record.month % 12 == 0;
    if full_year || record.events.any() {
        write!(out, "   {} years", record.month / 12)?;
        if !full_year {
            write!(out, " and {} months", record.month % 12)?;
        }
    }
    if record.loan_ended {
        write!(out, ", end of loan")?;
    }
    if record.events.resale_break_even {
        write!(
            out,
            ", break-even with resale at {:.2}",
            record.resale_price
        )?;
    }
    if record.events.no_resale_break_even {
        write!(out, ", break-even without resale")?;
    }
    writeln!(out)
}
