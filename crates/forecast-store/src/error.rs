use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Already in watchlist: {0}")]
    DuplicateSymbol(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForecastError {
    /// HTTP-equivalent status for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ForecastError::NotFound(_) | ForecastError::SymbolNotFound(_) => 404,
            ForecastError::Validation(_) => 400,
            ForecastError::DuplicateSymbol(_) => 409,
            ForecastError::Store(_) | ForecastError::Serialization(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ForecastError::NotFound(_) | ForecastError::SymbolNotFound(_))
    }

    pub(crate) fn missing(field: &str) -> Self {
        ForecastError::Validation(format!("{} is required", field))
    }
}

pub type ForecastResult<T> = Result<T, ForecastError>;
