use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, error::ErrorKind};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    MonthRecord, Projection, ProjectionOutcome, ProjectionSummary, Scenario, Simulation,
};
use crate::report::render_report;

/// Overrides of the example scenario, sent as a query string or JSON body.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    inflation_rate: Option<f64>,
    rent_indexed: Option<bool>,

    area_sqm: Option<f64>,
    price: Option<f64>,
    notary_fees: Option<f64>,
    rent: Option<f64>,
    recoverable_charges: Option<f64>,
    condo_charges: Option<f64>,
    property_tax: Option<f64>,
    management_rate: Option<f64>,
    letting_fee_per_sqm: Option<f64>,
    months_between_tenants: Option<f64>,
    amortized_renovation: Option<f64>,
    home_insurance: Option<f64>,

    principal: Option<f64>,
    opening_fees: Option<f64>,
    guarantee_fees: Option<f64>,
    loan_rate: Option<f64>,
    loan_term_months: Option<u32>,
    loan_insurance: Option<f64>,

    reference_income: Option<f64>,
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "immo",
    about = "Rental property cash-flow, amortization and break-even projection (French taxation)",
    after_help = "Every parameter defaults to the built-in example scenario. \
                  Run `immo serve [port]` to start the HTTP API instead."
)]
struct Cli {
    #[arg(long, help = "Annual inflation in percent, applied once per full year")]
    inflation_rate: Option<f64>,
    #[arg(long, help = "Keep the rent excluding charges at its nominal amount")]
    no_rent_indexation: bool,

    #[arg(long, help = "Carrez living area in square metres")]
    area_sqm: Option<f64>,
    #[arg(long, help = "Purchase price in euros")]
    price: Option<f64>,
    #[arg(long)]
    notary_fees: Option<f64>,
    #[arg(long, help = "Monthly rent excluding charges")]
    rent: Option<f64>,
    #[arg(long, help = "Monthly charges paid back by the tenant")]
    recoverable_charges: Option<f64>,
    #[arg(long, help = "Monthly condominium charges")]
    condo_charges: Option<f64>,
    #[arg(long, help = "Property tax smoothed per month")]
    property_tax: Option<f64>,
    #[arg(long, help = "Management fee in percent of the rent including charges")]
    management_rate: Option<f64>,
    #[arg(long, help = "Letting fee in euros per square metre")]
    letting_fee_per_sqm: Option<f64>,
    #[arg(long)]
    months_between_tenants: Option<f64>,
    #[arg(long, help = "Renovation works spread per month")]
    amortized_renovation: Option<f64>,
    #[arg(long, help = "Monthly non-occupant owner insurance")]
    home_insurance: Option<f64>,

    #[arg(long, help = "Borrowed amount in euros")]
    principal: Option<f64>,
    #[arg(long)]
    opening_fees: Option<f64>,
    #[arg(long)]
    guarantee_fees: Option<f64>,
    #[arg(long, help = "Nominal annual loan rate in percent, e.g. 3")]
    loan_rate: Option<f64>,
    #[arg(long)]
    loan_term_months: Option<u32>,
    #[arg(long, help = "Monthly borrower insurance")]
    loan_insurance: Option<f64>,

    #[arg(long, help = "Reference taxable income declared for the previous year")]
    reference_income: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse<'a> {
    scenario: &'a Scenario,
    summary: &'a ProjectionSummary,
    months: &'a [MonthRecord],
    outcome: ProjectionOutcome,
    break_even: BreakEvenMonths,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BreakEvenMonths {
    resale: Option<u32>,
    no_resale: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_scenario(cli: Cli) -> Scenario {
    let mut scenario = Scenario::example();
    let economy = &mut scenario.economy;
    if let Some(v) = cli.inflation_rate {
        economy.inflation_rate_percent = v;
    }
    if cli.no_rent_indexation {
        economy.rent_indexed = false;
    }

    let property = &mut scenario.property;
    if let Some(v) = cli.area_sqm {
        property.area_sqm = v;
    }
    if let Some(v) = cli.price {
        property.price = v;
    }
    if let Some(v) = cli.notary_fees {
        property.notary_fees = v;
    }
    if let Some(v) = cli.rent {
        property.rent_excl_charges = v;
    }
    if let Some(v) = cli.recoverable_charges {
        property.recoverable_charges = v;
    }
    if let Some(v) = cli.condo_charges {
        property.condo_charges = v;
    }
    if let Some(v) = cli.property_tax {
        property.property_tax = v;
    }
    if let Some(v) = cli.management_rate {
        property.management_rate_percent = v;
    }
    if let Some(v) = cli.letting_fee_per_sqm {
        property.letting_fee_per_sqm = v;
    }
    if let Some(v) = cli.months_between_tenants {
        property.months_between_tenants = v;
    }
    if let Some(v) = cli.amortized_renovation {
        property.amortized_renovation = v;
    }
    if let Some(v) = cli.home_insurance {
        property.home_insurance = v;
    }

    let loan = &mut scenario.loan;
    if let Some(v) = cli.principal {
        loan.principal = v;
    }
    if let Some(v) = cli.opening_fees {
        loan.opening_fees = v;
    }
    if let Some(v) = cli.guarantee_fees {
        loan.guarantee_fees = v;
    }
    if let Some(v) = cli.loan_rate {
        loan.annual_rate_percent = v;
    }
    if let Some(v) = cli.loan_term_months {
        loan.term_months = v;
    }
    if let Some(v) = cli.loan_insurance {
        loan.monthly_insurance = v;
    }

    if let Some(v) = cli.reference_income {
        scenario.tax_profile.reference_income = v;
    }

    scenario
}

fn simulate(scenario: &Scenario) -> Result<Projection, String> {
    let simulation = Simulation::new(scenario).map_err(|e| e.to_string())?;
    Ok(simulation.project())
}

/// Parses command-line flags and renders the text report.
///
/// `--help` renders the usage text as the report.
pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Ok(e.to_string());
        }
        Err(e) => return Err(e.to_string()),
    };
    let scenario = build_scenario(cli);
    let projection = simulate(&scenario)?;
    Ok(render_report(&projection))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/report",
            get(report_get_handler).post(report_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "immo HTTP API listening");
    info!("Local access: http://127.0.0.1:{port}/api/report");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn report_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    report_handler_impl(payload)
}

async fn report_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    report_handler_impl(payload)
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let scenario = scenario_from_payload(payload);
    match simulate(&scenario) {
        Ok(projection) => {
            json_response(StatusCode::OK, build_simulate_response(&scenario, &projection))
        }
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn report_handler_impl(payload: SimulatePayload) -> Response {
    match simulate(&scenario_from_payload(payload)) {
        Ok(projection) => with_cache_control((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_report(&projection),
        )),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn build_simulate_response<'a>(
    scenario: &'a Scenario,
    projection: &'a Projection,
) -> SimulateResponse<'a> {
    SimulateResponse {
        scenario,
        summary: &projection.summary,
        months: &projection.months,
        outcome: projection.outcome,
        break_even: BreakEvenMonths {
            resale: projection.resale_break_even().map(|r| r.month),
            no_resale: projection.no_resale_break_even().map(|r| r.month),
        },
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn scenario_from_json(json: &str) -> Result<Scenario, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(scenario_from_payload(payload))
}

fn scenario_from_payload(payload: SimulatePayload) -> Scenario {
    let cli = Cli {
        inflation_rate: payload.inflation_rate,
        no_rent_indexation: payload.rent_indexed == Some(false),
        area_sqm: payload.area_sqm,
        price: payload.price,
        notary_fees: payload.notary_fees,
        rent: payload.rent,
        recoverable_charges: payload.recoverable_charges,
        condo_charges: payload.condo_charges,
        property_tax: payload.property_tax,
        management_rate: payload.management_rate,
        letting_fee_per_sqm: payload.letting_fee_per_sqm,
        months_between_tenants: payload.months_between_tenants,
        amortized_renovation: payload.amortized_renovation,
        home_insurance: payload.home_insurance,
        principal: payload.principal,
        opening_fees: payload.opening_fees,
        guarantee_fees: payload.guarantee_fees,
        loan_rate: payload.loan_rate,
        loan_term_months: payload.loan_term_months,
        loan_insurance: payload.loan_insurance,
        reference_income: payload.reference_income,
    };
    build_scenario(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn build_scenario_without_flags_is_the_example() {
        let scenario = build_scenario(Cli::default());
        assert_eq!(scenario, Scenario::example());
    }

    #[test]
    fn cli_flags_override_example_values() {
        let cli = Cli::try_parse_from([
            "immo",
            "--price",
            "300000",
            "--loan-rate",
            "4.2",
            "--loan-term-months",
            "300",
            "--no-rent-indexation",
        ])
        .expect("flags parse");
        let scenario = build_scenario(cli);

        assert_approx(scenario.property.price, 300_000.0);
        assert_approx(scenario.loan.annual_rate_percent, 4.2);
        assert_eq!(scenario.loan.term_months, 300);
        assert!(!scenario.economy.rent_indexed);
        assert_approx(scenario.property.rent_excl_charges, 2_000.0);
    }

    #[test]
    fn run_cli_reports_zero_term_by_field_name() {
        let err = run_cli(["immo", "--loan-term-months", "0"]).expect_err("zero term must fail");
        assert!(err.contains("termMonths"));
    }

    #[test]
    fn run_cli_returns_unknown_flags_as_errors() {
        let err = run_cli(["immo", "--no-such-flag"]).expect_err("unknown flag must fail");
        assert!(err.contains("--no-such-flag"));
    }

    #[test]
    fn run_cli_returns_bad_values_as_errors() {
        let err = run_cli(["immo", "--price", "cheap"]).expect_err("bad value must fail");
        assert!(err.contains("--price"));
    }

    #[test]
    fn run_cli_renders_help_as_output() {
        let help = run_cli(["immo", "--help"]).expect("help is not an error");
        assert!(help.contains("--loan-term-months"));
        assert!(help.contains("immo serve [port]"));
    }

    #[test]
    fn run_cli_renders_the_example_report() {
        let report = run_cli(["immo"]).expect("example scenario runs");
        assert!(report.starts_with("Inflation:   1.00% per year"));
        assert!(report.contains("break-even without resale"));
    }

    #[test]
    fn run_cli_reports_invalid_rate() {
        let err = run_cli(["immo", "--loan-rate", "0"]).expect_err("zero rate must fail");
        assert!(err.contains("annualRatePercent"));
    }

    #[test]
    fn scenario_from_json_parses_web_keys() {
        let scenario = scenario_from_json(
            r#"{
                "inflationRate": 2.0,
                "rentIndexed": false,
                "rent": 1500,
                "loanTermMonths": 180,
                "referenceIncome": 30000
            }"#,
        )
        .expect("valid payload");

        assert_approx(scenario.economy.inflation_rate_percent, 2.0);
        assert!(!scenario.economy.rent_indexed);
        assert_approx(scenario.property.rent_excl_charges, 1_500.0);
        assert_eq!(scenario.loan.term_months, 180);
        assert_approx(scenario.tax_profile.reference_income, 30_000.0);
        assert_approx(scenario.property.price, 500_000.0);
    }

    #[test]
    fn scenario_from_json_rejects_unknown_types() {
        let err = scenario_from_json(r#"{"loanTermMonths": "long"}"#).expect_err("bad payload");
        assert!(err.starts_with("Invalid API JSON payload"));
    }

    #[test]
    fn zero_area_from_json_is_reported_by_field_name() {
        let scenario = scenario_from_json(r#"{"areaSqm": 0}"#).expect("well-formed payload");
        let err = simulate(&scenario).expect_err("zero area");
        assert!(err.contains("areaSqm"));
        assert!(!err.contains("--"));
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let scenario = Scenario::example();
        let projection = simulate(&scenario).expect("example runs");
        let response = build_simulate_response(&scenario, &projection);
        let json = serde_json::to_string(&response).expect("response should serialize");

        assert!(json.contains("\"scenario\""));
        assert!(json.contains("\"rentIndexed\":true"));
        assert!(json.contains("\"monthlyPayment\""));
        assert!(json.contains("\"personalContribution\""));
        assert!(json.contains("\"cumulativeProfit\""));
        assert!(json.contains("\"resaleBalance\""));
        assert!(json.contains("\"resaleBreakEven\""));
        assert!(json.contains("\"noResaleBreakEven\""));
        assert!(json.contains("\"outcome\":{\"status\":\"completed\",\"months\":600}"));
        assert!(json.contains("\"breakEven\":{\"resale\":61,\"noResale\":600}"));
    }

    #[test]
    fn scenario_round_trips_through_json() {
        let scenario = Scenario::example();
        let json = serde_json::to_string(&scenario).expect("serialize");
        let parsed = serde_json::from_str::<Scenario>(&json).expect("deserialize");
        assert_eq!(parsed, scenario);
    }
}
