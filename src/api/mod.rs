//! API route definitions
//!
//! REST endpoints over the recording index. Commands aimed at the media
//! server itself are not handled here.

pub mod health;
pub mod recordings;

use serde::Serialize;

/// Response envelope: `code` 0 on success, 1 when the target was not found,
/// -1 for any other failure
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            msg: None,
            data: Some(data),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            code: -1,
            msg: Some(msg.into()),
            data: None,
        }
    }

    pub fn not_found(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: 1,
            msg: Some(msg.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: Some(msg.into()),
            data: None,
        }
    }
}
