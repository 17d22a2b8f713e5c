//! RPC dispatch over HTTP.
//!
//! `POST /{service}/{method}` with a JSON body. Request headers are the call's
//! metadata bag; reply metadata goes back as response headers. Every call that
//! names a known method goes through the authorization gate before its handler.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::{AuthError, AuthResult};
use crate::identity::{
    CallContext, Metadata, LOGIN_METHOD, REFLECTION_V1ALPHA_LIST_METHOD, REFLECTION_V1ALPHA_METHOD,
    REFLECTION_V1_LIST_METHOD, REFLECTION_V1_METHOD, REGISTER_METHOD, SESSION_METADATA_KEY,
};

use super::AppState;

pub const AUTH_SERVICE: &str = "auth.v1.AuthService";
pub const GET_USER_INFO_METHOD: &str = "/auth.v1.AuthService/GetUserInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Register,
    Login,
    GetUserInfo,
    ServerReflectionInfo,
    ListServices,
}

impl Method {
    pub fn from_path(full: &str) -> Option<Method> {
        match full {
            REGISTER_METHOD => Some(Method::Register),
            LOGIN_METHOD => Some(Method::Login),
            GET_USER_INFO_METHOD => Some(Method::GetUserInfo),
            REFLECTION_V1ALPHA_METHOD | REFLECTION_V1_METHOD => Some(Method::ServerReflectionInfo),
            REFLECTION_V1ALPHA_LIST_METHOD | REFLECTION_V1_LIST_METHOD => Some(Method::ListServices),
            _ => None,
        }
    }
}

/// Every method the dispatcher serves, as (service, method) pairs.
pub const METHODS: &[(&str, &str)] = &[
    (AUTH_SERVICE, "Register"),
    (AUTH_SERVICE, "Login"),
    (AUTH_SERVICE, "GetUserInfo"),
    ("grpc.reflection.v1alpha.ServerReflection", "ServerReflectionInfo"),
    ("grpc.reflection.v1alpha.ServerReflection", "ListServices"),
    ("grpc.reflection.v1.ServerReflection", "ServerReflectionInfo"),
    ("grpc.reflection.v1.ServerReflection", "ListServices"),
];

/// Successful reply: JSON body plus outbound metadata.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub body: Value,
    pub metadata: Vec<(&'static str, String)>,
}

impl RpcReply {
    fn json<T: Serialize>(v: &T) -> AuthResult<Self> {
        let body = serde_json::to_value(v).map_err(|e| {
            error!(target: "rpc", "response encoding failed: {}", e);
            AuthError::internal("response encoding failed")
        })?;
        Ok(Self { body, metadata: Vec::new() })
    }
}

fn decode<T: DeserializeOwned + Default>(payload: &[u8]) -> AuthResult<T> {
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(payload).map_err(|e| AuthError::invalid_argument(format!("malformed request payload: {}", e)))
}

fn reflection_listing() -> Value {
    let mut services: Vec<Value> = Vec::new();
    for (svc, _) in METHODS {
        if services.iter().any(|s| s["name"] == *svc) { continue; }
        let methods: Vec<&str> = METHODS.iter().filter(|(s, _)| s == svc).map(|(_, m)| *m).collect();
        services.push(json!({ "name": svc, "methods": methods }));
    }
    json!({ "services": services })
}

pub fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let mut md = Metadata::new();
    for (k, v) in headers.iter() {
        if let Ok(s) = v.to_str() { md.insert(k.as_str(), s); }
    }
    md
}

/// Route one call: resolve the method, run the gate, then the handler.
pub async fn dispatch(state: &AppState, full_method: &str, metadata: &Metadata, payload: &[u8]) -> AuthResult<RpcReply> {
    let Some(method) = Method::from_path(full_method) else {
        return Err(AuthError::unimplemented(format!("unknown method {}", full_method)));
    };
    let svc = state.service.clone();
    state
        .gate
        .intercept(CallContext::new(full_method), Some(metadata), |ctx| async move {
            match method {
                Method::Register => RpcReply::json(&svc.register(&ctx, decode(payload)?).await?),
                Method::Login => {
                    let (resp, token) = svc.login(&ctx, decode(payload)?).await?;
                    let mut reply = RpcReply::json(&resp)?;
                    reply.metadata.push((SESSION_METADATA_KEY, token));
                    Ok(reply)
                }
                Method::GetUserInfo => RpcReply::json(&svc.get_user_info(&ctx).await?),
                Method::ServerReflectionInfo | Method::ListServices => {
                    Ok(RpcReply { body: reflection_listing(), metadata: Vec::new() })
                }
            }
        })
        .await
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", HeaderValue::from(u16::from(self.grpc_code())));
        (status, headers, Json(self)).into_response()
    }
}

impl IntoResponse for RpcReply {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", HeaderValue::from_static("0"));
        for (k, v) in self.metadata {
            match HeaderValue::from_str(&v) {
                Ok(hv) => { headers.insert(HeaderName::from_static(k), hv); }
                Err(e) => warn!(target: "rpc", key = k, "dropping reply metadata that is not a valid header: {}", e),
            }
        }
        (StatusCode::OK, headers, Json(self.body)).into_response()
    }
}

pub async fn rpc_handler(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let full = format!("/{}/{}", service, method);
    let md = metadata_from_headers(&headers);
    match dispatch(&state, &full, &md, &body).await {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            debug!(target: "rpc", method = %full, code = e.code_str(), "call failed");
            e.into_response()
        }
    }
}
