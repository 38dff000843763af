//! 统计报表 API 处理器
//!
//! 暴露投递统计、成功率与管道健康状态，全部为只读查询。

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Serialize;
use tracing::instrument;

use crate::{
    analytics::{DeliveryStatistics, PipelineHealth},
    dto::{ApiResponse, TimeRangeParams},
    error::NotifyError,
    state::AppState,
};

/// 成功率响应 DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRateDto {
    pub delivery_rate: f64,
}

/// 统计总览
///
/// GET /api/notify/stats/overview
#[instrument(skip(state))]
pub async fn get_overview(
    State(state): State<AppState>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<ApiResponse<DeliveryStatistics>>, NotifyError> {
    let stats = state
        .analytics
        .statistics(params.start_time(), params.end_time())
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// 投递成功率
///
/// GET /api/notify/stats/rate
#[instrument(skip(state))]
pub async fn get_rate(
    State(state): State<AppState>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<ApiResponse<DeliveryRateDto>>, NotifyError> {
    let rate = state
        .analytics
        .delivery_rate(params.start_time(), params.end_time())
        .await?;
    Ok(Json(ApiResponse::success(DeliveryRateDto {
        delivery_rate: rate,
    })))
}

/// 管道健康状态
///
/// GET /api/notify/stats/health
#[instrument(skip(state))]
pub async fn get_health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PipelineHealth>>, NotifyError> {
    let health = state.analytics.health().await?;
    Ok(Json(ApiResponse::success(health)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_dto_serialization() {
        let dto = DeliveryRateDto {
            delivery_rate: 2.0 / 3.0,
        };
        let json = serde_json::to_string(&dto).unwrap();
        assert!(json.contains("\"deliveryRate\""));
    }
}
