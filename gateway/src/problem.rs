//! Problem Details 响应

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use civic_errors::AppError;

/// 将错误渲染为 `application/problem+json` 响应
pub fn problem_response(err: AppError, instance: &str) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = err.to_problem_details().with_instance(instance);

    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        Json(body),
    )
        .into_response()
}
