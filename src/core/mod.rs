mod engine;
mod error;
mod loan;
mod model;
mod types;

pub use engine::{
    DEDUCTIBLE_CSG_RATE, MonthlyProjection, SAFETY_CUTOFF_MONTH, SOCIAL_CONTRIBUTION_RATE,
    Simulation,
};
pub use error::{SimulationError, SimulationResult};
pub use loan::{AmortizationSchedule, MAX_TERM_MONTHS, monthly_payment, total_cost};
pub use types::{
    BreakEvenEvents, Economy, Loan, MonthRecord, Projection, ProjectionOutcome, ProjectionSummary,
    Property, Scenario, TaxProfile,
};
