//! Inbound request matching.
//!
//! # Responsibilities
//! - Accept only `GET /data`
//! - Extract `year`, `month` and `day` from the query string
//! - Classify everything else as a [`Rejection`] before any bridging work
//!
//! # Design Decisions
//! - Values are taken verbatim after form decoding; a malformed date reaches
//!   the target as-is and the target decides
//! - The first occurrence of a repeated parameter wins

use axum::http::{Method, StatusCode};

use crate::bridge::DataQuery;

/// Why an inbound request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Any method or path other than `GET /data`.
    NotImplemented,
    /// `GET /data` without one of the date parameters.
    MissingParameter(&'static str),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Rejection::MissingParameter(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotImplemented => "not_implemented",
            Rejection::MissingParameter(_) => "missing_parameter",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::NotImplemented => "Not Implemented\n".to_string(),
            Rejection::MissingParameter(name) => format!("Missing query parameter: {name}\n"),
        }
    }
}

/// Match an inbound request against the single bridged endpoint.
pub fn match_data_request(
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Result<DataQuery, Rejection> {
    if method != Method::GET || path != "/data" {
        return Err(Rejection::NotImplemented);
    }

    let mut year = None;
    let mut month = None;
    let mut day = None;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        let slot = match key.as_ref() {
            "year" => &mut year,
            "month" => &mut month,
            "day" => &mut day,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    Ok(DataQuery {
        year: year.ok_or(Rejection::MissingParameter("year"))?,
        month: month.ok_or(Rejection::MissingParameter("month"))?,
        day: day.ok_or(Rejection::MissingParameter("day"))?,
    })
}
