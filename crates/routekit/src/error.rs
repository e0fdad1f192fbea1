// File: src/error.rs
// Purpose: Crate error type and its conversion into HTTP responses

use crate::files::WatcherError;
use crate::page_template::DEV_CLIENT;
use crate::script::{Diagnostic, ScriptError};
use crate::worker::ResolveError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use maud::{html, PreEscaped, DOCTYPE};
use routekit_parser::CompileError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("script build failed: {0}")]
    ScriptBuild(Diagnostic),

    #[error("script error: {0}")]
    Runtime(Diagnostic),

    #[error("route {pattern} is not ready yet")]
    RouteNotReady { pattern: String },

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ScriptError> for Error {
    fn from(error: ScriptError) -> Self {
        match error {
            ScriptError::Build(diagnostic) => Error::ScriptBuild(diagnostic),
            ScriptError::Runtime(diagnostic) => Error::Runtime(diagnostic),
        }
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::RouteNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Source excerpt shown under the message in development
    pub fn stack(&self) -> String {
        match self {
            Error::ScriptBuild(diagnostic) | Error::Runtime(diagnostic) => diagnostic.render(),
            Error::Compile(error) => error.to_string(),
            other => other.to_string(),
        }
    }

    /// Wraps the error for the request boundary
    pub fn into_page(self, production: bool, wants_json: bool) -> ErrorPage {
        ErrorPage {
            error: self,
            production,
            wants_json,
        }
    }
}

/// An error rendered at the request boundary
///
/// Development shows the diagnostic (HTML overlay or JSON); production shows
/// a generic page.
#[derive(Debug)]
pub struct ErrorPage {
    pub error: Error,
    pub production: bool,
    pub wants_json: bool,
}

impl IntoResponse for ErrorPage {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let retry_after = matches!(self.error, Error::RouteNotReady { .. });

        let mut response = if self.production {
            error_response(status, generic_message(status))
        } else if self.wants_json {
            let body = serde_json::json!({
                "status": status.as_u16(),
                "message": self.error.to_string(),
                "stack": self.error.stack(),
            });
            (status, Json(body)).into_response()
        } else {
            overlay_response(status, &self.error)
        };

        if retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

fn generic_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => "The page is starting up, try again in a moment.",
        StatusCode::NOT_FOUND => "The page you asked for does not exist.",
        _ => "Something went wrong on our side.",
    }
}

/// Plain error page used for 404s and production failures
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let title = status.canonical_reason().unwrap_or("Error");
    let markup = html! {
        (DOCTYPE)
        html {
            head { title { (title) } }
            body {
                h1 { (status.as_u16()) " " (title) }
                p { (message) }
                a href="/" { "Go Home" }
            }
        }
    };
    (status, Html(markup.into_string())).into_response()
}

fn overlay_response(status: StatusCode, error: &Error) -> Response {
    let markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Error: " (status.as_u16()) }
                style {
                    "body{margin:0;font-family:system-ui,sans-serif;background:#1e1e1e;color:#eee}"
                    "main{padding:2rem}h1{color:#ff6b6b;font-size:1.25rem}"
                    "pre{background:#111;padding:1rem;overflow:auto;line-height:1.4}"
                }
                // Reloads once the error is fixed
                script { (PreEscaped(DEV_CLIENT)) }
            }
            body {
                main {
                    h1 { (error.to_string()) }
                    pre { (error.stack()) }
                }
            }
        }
    };
    (status, Html(markup.into_string())).into_response()
}
