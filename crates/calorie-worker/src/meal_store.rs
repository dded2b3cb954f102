//! `MealStore`. The REST CRUD surface over this store
//! is explicitly out of scope — the worker only ever writes.

use async_trait::async_trait;
use calorie_core::types::{EstimateJob, EstimateResult};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MealStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MealStoreError>;

/// Named interface the estimate worker (C8) depends on.
#[async_trait]
pub trait MealStore: Send + Sync {
    async fn persist(&self, job: &EstimateJob, result: &EstimateResult) -> Result<()>;
}

/// Production store backed by the same Postgres database the REST CRUD
/// shell reads from. `ON CONFLICT (job_id) DO
/// NOTHING` makes `persist` idempotent — a worker that re-processes a job
/// after a crash before visibility-timeout-less delivery never double-writes a meal.
pub struct PostgresMealStore {
    pool: sqlx::PgPool,
}

impl PostgresMealStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl MealStore for PostgresMealStore {
    async fn persist(&self, job: &EstimateJob, result: &EstimateResult) -> Result<()> {
        let items_json = serde_json::to_value(&result.items).unwrap_or_default();
        let macros_json = serde_json::to_value(&result.macronutrients).unwrap_or_default();

        sqlx::query(
            "INSERT INTO meals
                (job_id, chat_id, source_user_id, trigger_type, caption,
                 calories_mean, calories_min, calories_max, macronutrients,
                 items, confidence, low_confidence, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,now())
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(job.job_id)
        .bind(job.raw_chat_id)
        .bind(job.source_user_id)
        .bind(job.trigger_type.as_str())
        .bind(&job.caption)
        .bind(result.calories_mean)
        .bind(result.calories_min)
        .bind(result.calories_max)
        .bind(macros_json)
        .bind(items_json)
        .bind(result.confidence)
        .bind(result.low_confidence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-process store for tests: records every persisted `job_id` exactly
/// once, matching the idempotency contract without a live Postgres.
#[cfg(any(test, feature = "testing"))]
pub struct InMemoryMealStore {
    persisted: std::sync::Mutex<std::collections::HashMap<Uuid, EstimateResult>>,
}

#[cfg(any(test, feature = "testing"))]
impl Default for InMemoryMealStore {
    fn default() -> Self {
        Self {
            persisted: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl InMemoryMealStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.persisted.lock().unwrap().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.persisted.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl MealStore for InMemoryMealStore {
    async fn persist(&self, job: &EstimateJob, result: &EstimateResult) -> Result<()> {
        self.persisted
            .lock()
            .unwrap()
            .entry(job.job_id)
            .or_insert_with(|| result.clone());
        Ok(())
    }
}
