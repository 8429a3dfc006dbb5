use thiserror::Error;

/// Everything that can stop a route from being planned.
///
/// Note that an unreachable pair of nodes is *not* an error: the search reports
/// it as `Ok(None)` and the distance matrix stores `UNREACHABLE` for it. Only
/// once an order solver needs that pair does it become `Infeasible`.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no feasible tour visits every stop")]
    Infeasible,
    #[error("planning was cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{stops} stops is more than the exact solver supports ({max})")]
    TooManyStops { stops: usize, max: usize },
    #[error("bad scenario: {0}")]
    Scenario(String),
    #[error("failed reading the scenario")]
    ReadError(#[from] std::io::Error),
    #[error("failed parsing json")]
    ParseError(#[from] serde_json::Error),
}
