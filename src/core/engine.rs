use tracing::{info, warn};

use super::error::SimulationResult;
use super::loan::{AmortizationSchedule, total_cost};
use super::types::{
    BreakEvenEvents, MonthRecord, Projection, ProjectionOutcome, ProjectionSummary, Scenario,
};

/// CSG, CRDS and solidarity levy on net property income.
pub const SOCIAL_CONTRIBUTION_RATE: f64 = 0.172;
/// Share of the CSG deductible from the following year's taxable income.
pub const DEDUCTIBLE_CSG_RATE: f64 = 0.068;
/// Last month index processed before a run that keeps going is cut short.
pub const SAFETY_CUTOFF_MONTH: u32 = 12 * 100;

/// A validated scenario with its amortization schedule and fee balances
/// computed once. Every query is a pure function of the month index.
#[derive(Debug, Clone)]
pub struct Simulation {
    scenario: Scenario,
    schedule: AmortizationSchedule,
    /// Loan fees still to be absorbed at the start of each loan month.
    fee_balances: Vec<f64>,
}

impl Simulation {
    pub fn new(scenario: &Scenario) -> SimulationResult<Self> {
        scenario.economy.validate()?;
        scenario.property.validate()?;
        let schedule = AmortizationSchedule::new(&scenario.loan)?;
        scenario.tax_profile.validate()?;

        let mut simulation = Self {
            scenario: *scenario,
            schedule,
            fee_balances: Vec::new(),
        };
        simulation.fee_balances = simulation.build_fee_balances();
        Ok(simulation)
    }

    fn build_fee_balances(&self) -> Vec<f64> {
        let loan = &self.scenario.loan;
        let mut balance = loan.opening_fees + loan.guarantee_fees;
        let mut balances = Vec::with_capacity(loan.term_months as usize);
        for month in 0..loan.term_months {
            balances.push(balance);
            balance -= balance.min(self.net_monthly_income(month));
        }
        balances
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn schedule(&self) -> &AmortizationSchedule {
        &self.schedule
    }

    pub fn term_months(&self) -> u32 {
        self.scenario.loan.term_months
    }

    pub fn remaining_principal(&self, month: u32) -> f64 {
        self.schedule.remaining_principal(month)
    }

    pub fn gross_monthly_income(&self, month: u32) -> f64 {
        self.scenario
            .property
            .gross_rent(&self.scenario.economy, month)
    }

    /// Rent minus running costs and loan interest, floored at zero.
    pub fn net_monthly_income(&self, month: u32) -> f64 {
        let economy = &self.scenario.economy;
        let property = &self.scenario.property;

        let mut net = self.gross_monthly_income(month);
        net -= property.non_recoverable_charges(economy, month);
        net -= economy.inflate(month, property.property_tax);
        net -= property.management_fee(economy, month);
        net -= property.amortized_letting_fee(economy, month);
        net -= economy.inflate(month, property.amortized_renovation);
        net -= economy.inflate(month, property.home_insurance);
        if month < self.term_months() {
            net -= self.schedule.interest(month);
        }
        net.max(0.0)
    }

    /// Net income once the one-time loan fees have been absorbed by the
    /// earliest months of net income.
    pub fn net_income_after_amortized_fees(&self, month: u32) -> f64 {
        let net = self.net_monthly_income(month);
        match self.fee_balances.get(month as usize) {
            Some(fees) => net - fees.min(net),
            None => net,
        }
    }

    /// Part of last year's CSG deductible from this month's taxable base.
    pub fn deductible_social_contribution(&self, month: u32) -> f64 {
        if month < 12 {
            return 0.0;
        }
        self.net_income_after_amortized_fees(month - 12) * DEDUCTIBLE_CSG_RATE
    }

    // The deductible CSG is not subtracted here, only from the income tax base.
    pub fn social_contributions(&self, month: u32) -> f64 {
        self.net_income_after_amortized_fees(month) * SOCIAL_CONTRIBUTION_RATE
    }

    pub fn income_tax(&self, month: u32) -> f64 {
        let base = (self.net_income_after_amortized_fees(month)
            - self.deductible_social_contribution(month))
        .max(0.0);
        base * self.scenario.tax_profile.marginal_rate()
    }

    pub fn revenue(&self, month: u32) -> f64 {
        self.scenario
            .property
            .gross_rent_with_charges(&self.scenario.economy, month)
    }

    pub fn expenses(&self, month: u32) -> f64 {
        let economy = &self.scenario.economy;
        let property = &self.scenario.property;
        let loan = &self.scenario.loan;

        // Property tax is cashed out at its nominal amount.
        let mut amount = property.property_tax;
        amount += economy.inflate(month, property.condo_charges);
        amount += property.management_fee(economy, month);
        amount += property.amortized_letting_fee(economy, month);
        amount += economy.inflate(month, property.home_insurance);
        amount += economy.inflate(month, property.amortized_renovation);
        if month == 0 {
            amount += property.price + property.notary_fees - loan.principal;
        }
        if month < self.term_months() {
            if month == 0 {
                amount += loan.opening_fees + loan.guarantee_fees;
            }
            amount += loan.monthly_insurance;
            amount += self.schedule.monthly_payment();
        }
        amount
    }

    pub fn profit(&self, month: u32) -> f64 {
        self.revenue(month)
            - self.expenses(month)
            - self.social_contributions(month)
            - self.income_tax(month)
    }

    pub fn resale_price(&self, month: u32) -> f64 {
        self.scenario
            .economy
            .inflate(month, self.scenario.property.price)
    }

    /// Cash left after selling at the inflated price and repaying the loan.
    pub fn resale_balance(&self, month: u32, cumulative_profit: f64) -> f64 {
        self.resale_price(month) + cumulative_profit - self.remaining_principal(month)
    }

    /// Share of the gross rent eaten by costs, interest and fees, in percent.
    pub fn deduction_ratio_percent(&self, month: u32) -> f64 {
        let gross = self.gross_monthly_income(month);
        if gross <= 0.0 {
            return 100.0;
        }
        100.0 - 100.0 * (self.net_income_after_amortized_fees(month) / gross)
    }

    pub fn summary(&self) -> ProjectionSummary {
        let property = &self.scenario.property;
        let loan = &self.scenario.loan;
        let monthly_payment = self.schedule.monthly_payment();
        let total_project_cost = property.price + property.notary_fees;

        ProjectionSummary {
            inflation_rate_percent: self.scenario.economy.inflation_rate_percent,
            price_per_sqm: property.price_per_sqm(),
            monthly_payment,
            monthly_insurance: loan.monthly_insurance,
            monthly_payment_with_insurance: monthly_payment + loan.monthly_insurance,
            loan_cost: total_cost(loan),
            total_project_cost,
            personal_contribution: total_project_cost - loan.principal
                + loan.opening_fees
                + loan.guarantee_fees,
            term_months: loan.term_months,
            marginal_tax_rate: self.scenario.tax_profile.marginal_rate(),
        }
    }

    /// Month-by-month projection, restarted from month 0 on every call.
    pub fn months(&self) -> MonthlyProjection<'_> {
        MonthlyProjection {
            simulation: self,
            month: 0,
            cumulative_profit: 0.0,
            events_seen: BreakEvenEvents::default(),
            outcome: None,
        }
    }

    pub fn project(&self) -> Projection {
        let mut iter = self.months();
        let months = iter.by_ref().collect::<Vec<_>>();
        let outcome = iter.outcome().unwrap_or(ProjectionOutcome::Completed {
            months: months.len() as u32,
        });
        Projection {
            summary: self.summary(),
            months,
            outcome,
        }
    }
}

/// Runs while the loan is outstanding or the cumulative profit is negative,
/// bounded by [`SAFETY_CUTOFF_MONTH`].
#[derive(Debug, Clone)]
pub struct MonthlyProjection<'a> {
    simulation: &'a Simulation,
    month: u32,
    cumulative_profit: f64,
    events_seen: BreakEvenEvents,
    outcome: Option<ProjectionOutcome>,
}

impl MonthlyProjection<'_> {
    /// Set once the iterator is exhausted.
    pub fn outcome(&self) -> Option<ProjectionOutcome> {
        self.outcome
    }

    fn should_continue(&self, month: u32) -> bool {
        month < self.simulation.term_months() || self.cumulative_profit < 0.0
    }

    fn finish(&mut self, months: u32) {
        let outcome = if self.should_continue(months) {
            warn!(
                months,
                cumulative_profit = self.cumulative_profit,
                "projection too long, stopping at safety cutoff"
            );
            ProjectionOutcome::TooLong { months }
        } else {
            info!(
                months,
                cumulative_profit = self.cumulative_profit,
                "projection completed"
            );
            ProjectionOutcome::Completed { months }
        };
        self.outcome = Some(outcome);
    }
}

impl Iterator for MonthlyProjection<'_> {
    type Item = MonthRecord;

    fn next(&mut self) -> Option<MonthRecord> {
        if self.outcome.is_some() {
            return None;
        }
        let month = self.month;
        if !self.should_continue(month) {
            self.finish(month);
            return None;
        }

        let simulation = self.simulation;
        let profit = simulation.profit(month);
        self.cumulative_profit += profit;

        let resale_price = simulation.resale_price(month);
        let resale_balance = simulation.resale_balance(month, self.cumulative_profit);

        let mut events = BreakEvenEvents::default();
        if !self.events_seen.resale_break_even && resale_balance >= 0.0 {
            self.events_seen.resale_break_even = true;
            events.resale_break_even = true;
            info!(month = month + 1, resale_price, "break-even with resale");
        }
        if !self.events_seen.no_resale_break_even && self.cumulative_profit >= 0.0 {
            self.events_seen.no_resale_break_even = true;
            events.no_resale_break_even = true;
            info!(month = month + 1, "break-even without resale");
        }

        let social_contributions = simulation.social_contributions(month);
        let income_tax = simulation.income_tax(month);
        let record = MonthRecord {
            month: month + 1,
            remaining_principal: simulation.remaining_principal(month),
            revenue: simulation.revenue(month),
            expenses: simulation.expenses(month),
            net_income_after_fees: simulation.net_income_after_amortized_fees(month),
            deduction_ratio_percent: simulation.deduction_ratio_percent(month),
            income_tax,
            total_taxes: social_contributions + income_tax,
            profit,
            cumulative_profit: self.cumulative_profit,
            resale_price,
            resale_balance,
            loan_ended: month + 1 == simulation.term_months(),
            events,
        };

        self.month += 1;
        if month > SAFETY_CUTOFF_MONTH {
            self.finish(self.month);
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SimulationError;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn example_simulation() -> Simulation {
        Simulation::new(&Scenario::example()).expect("example scenario is valid")
    }

    /// A flat whose rent never covers its costs.
    fn loss_making_scenario() -> Scenario {
        let mut scenario = Scenario::example();
        scenario.property.rent_excl_charges = 0.0;
        scenario
    }

    #[test]
    fn rejects_invalid_loan_before_simulating() {
        let mut scenario = Scenario::example();
        scenario.loan.annual_rate_percent = 0.0;
        let err = Simulation::new(&scenario).expect_err("zero rate must be rejected");
        assert!(matches!(err, SimulationError::InvalidParameter { .. }));

        let mut scenario = Scenario::example();
        scenario.loan.term_months = 0;
        assert!(Simulation::new(&scenario).is_err());
    }

    #[test]
    fn rejects_invalid_economy() {
        let mut scenario = Scenario::example();
        scenario.economy.inflation_rate_percent = f64::NAN;
        assert!(Simulation::new(&scenario).is_err());
    }

    #[test]
    fn net_income_subtracts_costs_and_interest() {
        let simulation = example_simulation();
        let expected = 2_000.0 - (4_000.0 / 12.0 - 400.0) - 2_000.0 / 12.0 - 168.0
            - 750.0 / 36.0
            - 40.0
            - 1_000.0;
        assert_approx(simulation.net_monthly_income(0), expected);
    }

    #[test]
    fn net_income_is_floored_at_zero() {
        let simulation = Simulation::new(&loss_making_scenario()).expect("valid scenario");
        for month in [0, 1, 100, 239, 240, 600] {
            assert_eq!(simulation.net_monthly_income(month), 0.0);
            assert_eq!(simulation.net_income_after_amortized_fees(month), 0.0);
        }
    }

    #[test]
    fn loan_fees_are_absorbed_by_early_net_income() {
        let simulation = example_simulation();
        let fees = 2_000.0 + 5_000.0;

        assert_eq!(simulation.net_income_after_amortized_fees(0), 0.0);

        let absorbed: f64 = (0..simulation.term_months())
            .map(|m| {
                simulation.net_monthly_income(m) - simulation.net_income_after_amortized_fees(m)
            })
            .sum();
        assert_approx(absorbed, fees);

        let term = simulation.term_months();
        assert_eq!(
            simulation.net_income_after_amortized_fees(term),
            simulation.net_monthly_income(term)
        );
    }

    #[test]
    fn fee_balance_matches_running_depletion() {
        let simulation = example_simulation();
        let month = 15;
        let mut fees = 7_000.0_f64;
        for earlier in 0..month {
            fees -= fees.min(simulation.net_monthly_income(earlier));
        }
        let net = simulation.net_monthly_income(month);
        assert_approx(
            simulation.net_income_after_amortized_fees(month),
            net - fees.min(net),
        );
    }

    #[test]
    fn social_charges_and_income_tax_follow_lagged_deduction() {
        let simulation = example_simulation();
        for month in 0..12 {
            assert_eq!(simulation.deductible_social_contribution(month), 0.0);
        }
        for month in [12, 24, 150, 300] {
            let net = simulation.net_income_after_amortized_fees(month);
            let lagged = simulation.net_income_after_amortized_fees(month - 12);
            assert_approx(
                simulation.deductible_social_contribution(month),
                lagged * 0.068,
            );
            assert_approx(simulation.social_contributions(month), net * 0.172);
            assert_approx(
                simulation.income_tax(month),
                (net - lagged * 0.068).max(0.0) * 0.41,
            );
        }
    }

    #[test]
    fn first_month_expenses_include_down_payment_and_loan_fees() {
        let simulation = example_simulation();
        let payment = simulation.schedule().monthly_payment();
        let recurring = 2_000.0 / 12.0 + 4_000.0 / 12.0 + 168.0 + 750.0 / 36.0 + 40.0;

        assert_approx(
            simulation.expenses(0),
            recurring + 140_000.0 + 7_000.0 + 6.0 + payment,
        );
        assert_approx(simulation.expenses(1), recurring + 6.0 + payment);
    }

    #[test]
    fn expenses_drop_loan_payment_after_term() {
        let simulation = example_simulation();
        let month = simulation.term_months();
        let economy = &simulation.scenario().economy;
        let recurring = 2_000.0 / 12.0
            + economy.inflate(month, 4_000.0 / 12.0)
            + economy.inflate(month, 2_400.0) * 0.07
            + economy.inflate(month, 15.0) * 50.0 / 36.0
            + economy.inflate(month, 40.0);
        assert_approx(simulation.expenses(month), recurring);
    }

    #[test]
    fn profit_is_revenue_less_expenses_and_taxes() {
        let simulation = example_simulation();
        for month in [0, 13, 239, 240, 400] {
            let expected = simulation.revenue(month)
                - simulation.expenses(month)
                - simulation.social_contributions(month)
                - simulation.income_tax(month);
            assert_approx(simulation.profit(month), expected);
        }
    }

    #[test]
    fn deduction_ratio_is_full_without_rent() {
        let mut scenario = Scenario::example();
        scenario.property.rent_excl_charges = 0.0;
        let simulation = Simulation::new(&scenario).expect("valid scenario");
        assert_eq!(simulation.deduction_ratio_percent(5), 100.0);
    }

    #[test]
    fn summary_reports_payment_cost_and_contribution() {
        let summary = example_simulation().summary();
        assert!((summary.monthly_payment - 2_218.39).abs() < 0.01);
        assert_approx(
            summary.monthly_payment_with_insurance,
            summary.monthly_payment + 6.0,
        );
        assert_approx(summary.price_per_sqm, 10_000.0);
        assert_approx(summary.total_project_cost, 540_000.0);
        assert_approx(summary.personal_contribution, 147_000.0);
        assert_approx(summary.marginal_tax_rate, 0.41);
        assert_eq!(summary.term_months, 240);
    }

    #[test]
    fn example_projection_completes_with_both_break_evens() {
        let projection = example_simulation().project();

        assert_eq!(projection.outcome, ProjectionOutcome::Completed { months: 600 });
        assert_eq!(projection.months.len(), 600);
        assert_eq!(projection.months[0].month, 1);

        let resale = projection.resale_break_even().expect("resale break-even");
        assert_eq!(resale.month, 61);
        let no_resale = projection
            .no_resale_break_even()
            .expect("no-resale break-even");
        assert_eq!(no_resale.month, 600);

        let last = projection.months.last().expect("non-empty projection");
        assert!(last.cumulative_profit >= 0.0);
        assert_eq!(last.remaining_principal, 0.0);
    }

    #[test]
    fn example_projection_keeps_resale_balance_identity() {
        let simulation = example_simulation();
        for record in simulation.months() {
            let month = record.month - 1;
            let expected = simulation.resale_price(month) + record.cumulative_profit
                - simulation.remaining_principal(month);
            assert_approx(record.resale_balance, expected);
            assert_approx(
                record.total_taxes,
                simulation.social_contributions(month) + record.income_tax,
            );
        }
    }

    #[test]
    fn loan_end_is_flagged_on_last_loan_month_only() {
        let projection = example_simulation().project();
        let flagged = projection
            .months
            .iter()
            .filter(|r| r.loan_ended)
            .map(|r| r.month)
            .collect::<Vec<_>>();
        assert_eq!(flagged, vec![240]);
    }

    #[test]
    fn months_iterator_restarts_from_scratch() {
        let simulation = example_simulation();
        let first = simulation.months().collect::<Vec<_>>();
        let second = simulation.months().collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn loss_making_projection_stops_at_safety_cutoff() {
        let simulation = Simulation::new(&loss_making_scenario()).expect("valid scenario");
        let mut iter = simulation.months();
        let count = iter.by_ref().count();

        assert_eq!(count as u32, SAFETY_CUTOFF_MONTH + 2);
        assert_eq!(
            iter.outcome(),
            Some(ProjectionOutcome::TooLong {
                months: SAFETY_CUTOFF_MONTH + 2
            })
        );
        assert_eq!(iter.next(), None);

        let projection = simulation.project();
        let last = projection.months.last().expect("non-empty projection");
        assert!(last.cumulative_profit < 0.0);
        assert!(projection.outcome.is_too_long());
        assert!(projection.no_resale_break_even().is_none());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_projection_is_bounded_and_events_fire_at_most_once(
            rent in 0.0f64..6_000.0,
            price in 50_000.0f64..900_000.0,
            rate in 0.5f64..8.0,
            term in 12u32..=360,
            inflation in 0.0f64..4.0,
            income in 0.0f64..250_000.0,
        ) {
            let mut scenario = Scenario::example();
            scenario.property.rent_excl_charges = rent;
            scenario.property.price = price;
            scenario.loan.principal = price * 0.8;
            scenario.loan.annual_rate_percent = rate;
            scenario.loan.term_months = term;
            scenario.economy.inflation_rate_percent = inflation;
            scenario.tax_profile.reference_income = income;

            let simulation = Simulation::new(&scenario).expect("valid scenario");
            let projection = simulation.project();

            prop_assert!(projection.months.len() as u32 <= SAFETY_CUTOFF_MONTH + 2);
            prop_assert_eq!(projection.outcome.months(), projection.months.len() as u32);
            prop_assert!(projection.months.len() as u32 >= term);

            let resale_events = projection
                .months
                .iter()
                .filter(|r| r.events.resale_break_even)
                .count();
            let no_resale_events = projection
                .months
                .iter()
                .filter(|r| r.events.no_resale_break_even)
                .count();
            prop_assert!(resale_events <= 1);
            prop_assert!(no_resale_events <= 1);

            for record in &projection.months {
                prop_assert!(record.net_income_after_fees >= 0.0);
                let month = record.month - 1;
                let expected = simulation.resale_price(month) + record.cumulative_profit
                    - simulation.remaining_principal(month);
                prop_assert!((record.resale_balance - expected).abs() <= 1e-6);
            }

            if let Some(last) = projection.months.last() {
                if !projection.outcome.is_too_long() {
                    prop_assert!(last.cumulative_profit >= 0.0);
                }
            }
        }
    }
}
