use super::error::{SimulationError, SimulationResult};
use super::types::{Economy, Property, TaxProfile};

/// Progressive income tax brackets, highest threshold first.
const MARGINAL_RATE_BRACKETS: [(f64, f64); 4] = [
    (160_336.0, 0.45),
    (74_545.0, 0.41),
    (26_070.0, 0.30),
    (10_225.0, 0.11),
];

impl Economy {
    /// Compounds `amount` once per full year elapsed at `month`.
    pub fn inflate(&self, month: u32, amount: f64) -> f64 {
        let years = (month / 12) as i32;
        amount * (1.0 + self.inflation_rate_percent / 100.0).powi(years)
    }

    pub(crate) fn validate(&self) -> SimulationResult<()> {
        if !self.inflation_rate_percent.is_finite() || self.inflation_rate_percent <= -100.0 {
            return Err(SimulationError::invalid(
                "inflationRatePercent",
                "must be a finite rate > -100",
            ));
        }
        Ok(())
    }
}

impl Property {
    pub fn gross_rent_with_charges(&self, economy: &Economy, month: u32) -> f64 {
        if economy.rent_indexed {
            economy.inflate(month, self.rent_excl_charges + self.recoverable_charges)
        } else {
            self.rent_excl_charges + economy.inflate(month, self.recoverable_charges)
        }
    }

    /// Rent excluding charges, the base of taxable income.
    pub fn gross_rent(&self, economy: &Economy, month: u32) -> f64 {
        if economy.rent_indexed {
            economy.inflate(month, self.rent_excl_charges)
        } else {
            self.rent_excl_charges
        }
    }

    pub fn non_recoverable_charges(&self, economy: &Economy, month: u32) -> f64 {
        economy.inflate(month, self.condo_charges - self.recoverable_charges)
    }

    pub fn management_fee(&self, economy: &Economy, month: u32) -> f64 {
        self.gross_rent_with_charges(economy, month) * self.management_rate_percent / 100.0
    }

    /// Fee paid to the agency for each new tenancy.
    pub fn letting_fee(&self, economy: &Economy, month: u32) -> f64 {
        economy.inflate(month, self.letting_fee_per_sqm) * self.area_sqm
    }

    pub fn amortized_letting_fee(&self, economy: &Economy, month: u32) -> f64 {
        self.letting_fee(economy, month) / self.months_between_tenants
    }

    pub fn price_per_sqm(&self) -> f64 {
        self.price / self.area_sqm
    }

    pub(crate) fn validate(&self) -> SimulationResult<()> {
        if !self.area_sqm.is_finite() || self.area_sqm <= 0.0 {
            return Err(SimulationError::invalid("areaSqm", "must be > 0"));
        }
        if !self.months_between_tenants.is_finite() || self.months_between_tenants <= 0.0 {
            return Err(SimulationError::invalid("monthsBetweenTenants", "must be > 0"));
        }
        if !self.management_rate_percent.is_finite()
            || !(0.0..=100.0).contains(&self.management_rate_percent)
        {
            return Err(SimulationError::invalid(
                "managementRatePercent",
                "must be between 0 and 100",
            ));
        }
        for (name, value) in [
            ("price", self.price),
            ("notaryFees", self.notary_fees),
            ("rentExclCharges", self.rent_excl_charges),
            ("recoverableCharges", self.recoverable_charges),
            ("condoCharges", self.condo_charges),
            ("propertyTax", self.property_tax),
            ("lettingFeePerSqm", self.letting_fee_per_sqm),
            ("amortizedRenovation", self.amortized_renovation),
            ("homeInsurance", self.home_insurance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimulationError::invalid(name, "must be a finite amount >= 0"));
            }
        }
        Ok(())
    }
}

impl TaxProfile {
    /// Marginal income tax rate as a fraction, first matching bracket wins.
    pub fn marginal_rate(&self) -> f64 {
        MARGINAL_RATE_BRACKETS
            .iter()
            .find(|(threshold, _)| self.reference_income >= *threshold)
            .map_or(0.0, |(_, rate)| *rate)
    }

    pub(crate) fn validate(&self) -> SimulationResult<()> {
        if !self.reference_income.is_finite() {
            return Err(SimulationError::invalid("referenceIncome", "must be finite"));
        }
        Ok(())
    }
}
