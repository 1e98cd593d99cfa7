use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Wrap `data` in the standard response envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now(),
    }))
}

/// Envelope with pagination metadata derived from limit/offset/total.
pub fn ok_paginated<T: Serialize>(data: T, limit: u32, offset: u32, total: u64) -> Json<Value> {
    let page_size = limit.max(1);
    let page = offset / page_size + 1;
    let total_pages = ((total as u32) + page_size - 1) / page_size;
    Json(json!({
        "success": true,
        "data": data,
        "meta": {
            "pagination": {
                "page": page,
                "page_size": page_size,
                "total_pages": total_pages,
                "has_next": (offset as u64 + page_size as u64) < total,
                "has_previous": offset > 0,
            },
        },
        "timestamp": Utc::now(),
    }))
}

/// Error body in the same envelope; used by the error type and the auth
/// layer.
pub fn error_body(code: &str, message: &str) -> Value {
    json!({
        "success": false,
        "error": {"code": code, "message": message},
        "timestamp": Utc::now(),
    })
}
