use std::{error::Error as StdError, fmt};

use backtrace::Backtrace;
use http::StatusCode;
use thiserror::Error;

pub trait ErrorCode: StdError + 'static {
    fn code(&self) -> (StatusCode, &'static str);
}

#[derive(Error, Debug)]
pub enum Code {
    #[error(transparent)]
    Any(#[from] anyhow::Error),
    #[error("Invalid provider configuration. {0}")]
    Configuration(String),
    #[error("The provider {0} was not found in the configured providers")]
    UnknownProvider(String),
    #[error("Incomplete identity data. {0}")]
    Data(String),
    #[error("Errors found in SAML exchange: {errors:?}, reason: {reason}")]
    Validation {
        errors: Vec<String>,
        reason: String,
    },
    #[error("Authentication is required to access this resource")]
    Unauthenticated,
    #[error("Not found. {0}")]
    NotFound(String),
    #[error("Please recheck the request.see: {0}")]
    Validates(#[source] validator::ValidationErrors),
    #[error("Please recheck the request.see: {0}")]
    BadRequest(String),
}

impl ErrorCode for Code {
    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Any(_) => (StatusCode::INTERNAL_SERVER_ERROR, "2010001"),
            Self::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "2010002")
            }
            Self::UnknownProvider(_) => (StatusCode::NOT_FOUND, "2010003"),
            Self::Data(_) => (StatusCode::INTERNAL_SERVER_ERROR, "2010004"),
            Self::Validation { .. } => (StatusCode::BAD_REQUEST, "2010005"),
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "2010006"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "2010007"),
            Self::Validates(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "2010008")
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "2010009"),
        }
    }
}

pub struct WithBacktrace {
    source: Code,
    backtrace: Backtrace,
}

impl WithBacktrace {
    /// The underlying taxonomy variant, for callers that dispatch on it.
    pub fn source(&self) -> &Code {
        &self.source
    }
}

impl fmt::Debug for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithBacktrace")
            .field("source", &self.source)
            .field("backtrace", &self.backtrace)
            .finish()
    }
}

impl fmt::Display for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl StdError for WithBacktrace {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

impl From<Code> for WithBacktrace {
    fn from(code: Code) -> Self {
        WithBacktrace {
            source: code,
            backtrace: Backtrace::new(),
        }
    }
}

impl From<WithBacktrace> for Code {
    fn from(value: WithBacktrace) -> Self {
        value.source
    }
}

impl PartialEq for WithBacktrace {
    fn eq(&self, other: &Self) -> bool {
        let (_, src_code) = self.source.code();
        let (_, dst_code) = other.source.code();
        src_code == dst_code
    }
}

#[inline]
pub fn any<E: StdError>(err: E) -> WithBacktrace {
    WithBacktrace {
        source: Code::Any(anyhow::anyhow!("{}", err.to_string())),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn anyhow(err: anyhow::Error) -> WithBacktrace {
    WithBacktrace {
        source: Code::Any(err),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn configuration<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    WithBacktrace {
        source: Code::Configuration(err.to_string()),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn unknown_provider<S: ToString + ?Sized>(name: &S) -> WithBacktrace {
    WithBacktrace {
        source: Code::UnknownProvider(name.to_string()),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn data<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    WithBacktrace {
        source: Code::Data(err.to_string()),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn validation(errors: Vec<String>, reason: String) -> WithBacktrace {
    WithBacktrace {
        source: Code::Validation { errors, reason },
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn unauthenticated() -> WithBacktrace {
    WithBacktrace {
        source: Code::Unauthenticated,
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn not_found<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    WithBacktrace {
        source: Code::NotFound(err.to_string()),
        backtrace: Backtrace::new(),
    }
}

#[inline]
pub fn bad_request<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    WithBacktrace {
        source: Code::BadRequest(err.to_string()),
        backtrace: Backtrace::new(),
    }
}

#[cfg(feature = "axum-resp")]
mod axum {
    use axum::response::IntoResponse;
    use serde_json::json;

    use super::ErrorCode;

    impl IntoResponse for super::WithBacktrace {
        fn into_response(self) -> axum::response::Response {
            tracing::error!("{:?}", self);

            let (status_code, code) = self.source.code();

            let payload = json!({
                "code": code,
                "message": self.to_string(),
            });

            (status_code, axum::Json(payload)).into_response()
        }
    }
}
