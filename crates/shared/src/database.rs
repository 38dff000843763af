//! 数据库连接管理模块
//!
//! 投递记录存储是引擎唯一的共享可变资源，所有跨实例协调都依赖
//! 其行级状态。本模块提供连接池的构建、健康检查与关闭。

use crate::config::DatabaseConfig;
use crate::error::{EduError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池并立即建立最小连接数
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let started = Instant::now();

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "数据库连接池已就绪"
        );

        Ok(Self { pool })
    }

    /// 包装一个已有的连接池（测试中与 connect_lazy 配合使用）
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    ///
    /// 就绪探针调用；超过 1 秒的往返会记告警日志，提示连接池或
    /// 数据库出现压力。
    pub async fn health_check(&self) -> Result<()> {
        let started = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(EduError::from)?;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(1) {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "数据库健康检查响应缓慢");
        }

        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

impl std::ops::Deref for Database {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
