//! The demo `user-service` served and called by the CLI

use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use wirecall::{CallContext, ServiceDescription, ServiceTable};

pub const SERVICE_NAME: &str = "user-service";
pub const GET_BY_ID: &str = "GetById";
pub const NOTIFY: &str = "Notify";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub msg: String,
}

fn lookup(id: i64) -> Option<&'static str> {
    match id {
        123 => Some("Tom"),
        124 => Some("Jerry"),
        _ => None,
    }
}

/// Server side
pub fn service_table() -> ServiceTable {
    ServiceTable::new(SERVICE_NAME)
        .method(GET_BY_ID, |ctx: CallContext, req: UserRequest| async move {
            if let Some(remaining) = ctx.remaining() {
                tracing::debug!("GetById({}) with {:?} left", req.id, remaining);
            }
            match lookup(req.id) {
                Some(name) => Ok(UserResponse {
                    msg: name.to_string(),
                }),
                None => Err(format!("user {} not found", req.id)),
            }
        })
        .method(NOTIFY, |_ctx: CallContext, req: UserRequest| async move {
            tracing::info!("Notified about user {}", req.id);
            Ok::<_, Infallible>(())
        })
}

/// Client side
pub fn description() -> ServiceDescription {
    ServiceDescription::new(SERVICE_NAME)
        .method::<UserRequest, UserResponse>(GET_BY_ID)
        .method::<UserRequest, ()>(NOTIFY)
}
