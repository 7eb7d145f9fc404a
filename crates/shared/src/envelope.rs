//! The `{ok, data, pagination?}` / `{ok:false, error}` HTTP envelope.

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    pub has_more: bool,
    pub total_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            ok: true,
            data,
            pagination: None,
        }
    }

    pub fn paginated(data: T, has_more: bool, total_count: Option<i64>, next_cursor: Option<String>) -> Self {
        Self {
            ok: true,
            data,
            pagination: Some(PaginationMeta {
                has_more,
                total_count,
                next_cursor,
            }),
        }
    }
}
