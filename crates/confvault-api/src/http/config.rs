//! `/config` handlers.
//!
//! # Design
//! - Decoding produces a [`ConfigRequest`]; every semantic check beyond wire
//!   syntax is left to the version manager so both transports agree.
//! - `POST` accepts `data` as one object or an array of objects merged left to
//!   right.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use confvault_core::{ConfigRequest, Document, VersionSelector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// Query string accepted by `GET`, `PUT`, and `DELETE`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfigQuery {
    service: Option<String>,
    version: Option<String>,
    used: Option<String>,
    extended: Option<String>,
}

impl ConfigQuery {
    fn into_request(self) -> Result<ConfigRequest, ApiError> {
        let version = match self.version.as_deref().filter(|raw| !raw.is_empty()) {
            None => VersionSelector::Active,
            Some(raw) => {
                let parsed: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::bad_request("version parameter must be a number"))?;
                VersionSelector::from_wire(parsed)?
            }
        };
        let used = match self.used.as_deref() {
            None | Some("" | "false") => false,
            Some("true") => true,
            Some(_) => {
                return Err(ApiError::bad_request(
                    "used parameter must be true or false",
                ));
            }
        };
        Ok(
            ConfigRequest::builder(self.service.unwrap_or_default())
                .version(version)
                .used(used)
                .extended(self.extended.as_deref() == Some("true"))
                .build(),
        )
    }
}

#[derive(Serialize)]
struct MutationBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i32>,
}

impl MutationBody {
    const fn created(version: i32) -> Self {
        Self {
            success: true,
            version: Some(version),
        }
    }

    const fn done() -> Self {
        Self {
            success: true,
            version: None,
        }
    }
}

fn decode_query(
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Result<ConfigRequest, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    query.into_request()
}

fn decode_create(body: &[u8]) -> Result<ConfigRequest, ApiError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request("invalid input json"))?;
    let Value::Object(mut fields) = value else {
        return Err(ApiError::bad_request("invalid input json"));
    };
    let service = match fields.remove("service") {
        Some(Value::String(service)) => service,
        _ => String::new(),
    };
    let data = match fields.remove("data") {
        None | Some(Value::Null) => None,
        Some(data) => Some(merge_documents(data)?),
    };
    Ok(ConfigRequest::builder(service).maybe_data(data).build())
}

/// Fold `data` into a single document; later array entries win on key clashes.
pub(crate) fn merge_documents(data: Value) -> Result<Document, ApiError> {
    match data {
        Value::Object(document) => Ok(document),
        Value::Array(entries) => {
            let mut merged = Document::new();
            for entry in entries {
                let Value::Object(document) = entry else {
                    return Err(ApiError::bad_request(
                        "data parameter must be an object or an array of objects",
                    ));
                };
                merged.extend(document);
            }
            Ok(merged)
        }
        _ => Err(ApiError::bad_request(
            "data parameter must be an object or an array of objects",
        )),
    }
}

pub(crate) async fn create_config(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = decode_create(&body)?;
    let result = state.versions.create(&request).await;
    state.observe("create", &result);
    let response = result?;
    Ok(Json(MutationBody::created(response.version.get())).into_response())
}

pub(crate) async fn get_config(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = decode_query(query)?;
    let result = state.versions.get(&request).await;
    state.observe("get", &result);
    let response = result?;
    if request.extended() {
        Ok(Json(response).into_response())
    } else {
        Ok(Json(response.data.unwrap_or_default()).into_response())
    }
}

pub(crate) async fn update_config(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = decode_query(query)?;
    let result = state.versions.update(&request).await;
    state.observe("update", &result);
    result?;
    Ok(Json(MutationBody::done()).into_response())
}

pub(crate) async fn delete_config(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = decode_query(query)?;
    let result = state.versions.delete(&request).await;
    state.observe("delete", &result);
    result?;
    Ok(Json(MutationBody::done()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use confvault_core::Version;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> ConfigQuery {
        let mut query = ConfigQuery::default();
        for (key, value) in pairs {
            let value = Some((*value).to_string());
            match *key {
                "service" => query.service = value,
                "version" => query.version = value,
                "used" => query.used = value,
                "extended" => query.extended = value,
                _ => {}
            }
        }
        query
    }

    #[test]
    fn query_decodes_defaults() -> Result<(), ApiError> {
        let request = query(&[("service", "svc")]).into_request()?;
        assert_eq!(request.service(), "svc");
        assert_eq!(request.version(), VersionSelector::Active);
        assert!(!request.used());
        assert!(!request.extended());
        Ok(())
    }

    #[test]
    fn query_decodes_explicit_values() -> Result<(), ApiError> {
        let request = query(&[
            ("service", "svc"),
            ("version", "3"),
            ("used", "true"),
            ("extended", "true"),
        ])
        .into_request()?;
        assert_eq!(
            request.version(),
            VersionSelector::Exact(Version::try_from(3).map_err(ApiError::from)?)
        );
        assert!(request.used());
        assert!(request.extended());

        let zero = query(&[("service", "svc"), ("version", "0")]).into_request()?;
        assert_eq!(zero.version(), VersionSelector::Active);
        Ok(())
    }

    #[test]
    fn query_rejects_malformed_values() {
        let version = query(&[("service", "svc"), ("version", "abc")]).into_request();
        assert_eq!(
            version.err().map(|err| err.status),
            Some(StatusCode::BAD_REQUEST)
        );

        let negative = query(&[("service", "svc"), ("version", "-2")]).into_request();
        assert!(negative.is_err());

        let used = query(&[("service", "svc"), ("used", "yes")]).into_request();
        assert_eq!(
            used.err().map(|err| err.message),
            Some("used parameter must be true or false".to_string())
        );

        let extended = query(&[("service", "svc"), ("extended", "TRUE")]).into_request();
        assert!(extended.is_ok_and(|request| !request.extended()));
    }

    #[test]
    fn data_arrays_merge_left_to_right() -> Result<(), ApiError> {
        let merged = merge_documents(json!([{"a": 1, "b": 1}, {"b": 2}, {"c": 3}]))?;
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2, "c": 3}));

        let single = merge_documents(json!({"k": "v"}))?;
        assert_eq!(Value::Object(single), json!({"k": "v"}));

        assert!(merge_documents(json!([{"a": 1}, 5])).is_err());
        assert!(merge_documents(json!("text")).is_err());
        Ok(())
    }

    #[test]
    fn create_body_decoding() -> Result<(), ApiError> {
        let request = decode_create(br#"{"service":"svc","data":{"k":"v"}}"#)?;
        assert_eq!(request.service(), "svc");
        assert!(request.data().is_some());

        let no_data = decode_create(br#"{"service":"svc"}"#)?;
        assert!(no_data.data().is_none());

        let invalid = decode_create(b"{not json");
        assert_eq!(
            invalid.err().map(|err| err.message),
            Some("invalid input json".to_string())
        );
        Ok(())
    }
}
