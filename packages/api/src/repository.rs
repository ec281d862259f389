//! Prediction history.
//!
//! [`PredictionRepository`] is what the pipeline and the analytics routes
//! talk to. [`SeaOrmPredictionRepository`] stores rows in SQLite or Postgres;
//! [`InMemoryPredictionRepository`] keeps a bounded window when no database
//! is configured.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neuroscan_vision::ReliabilityTier;
use parking_lot::Mutex;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::entity::prediction;

/// How many records the analytics summary lists.
pub const RECENT_IN_SUMMARY: usize = 5;
pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const LOW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Corrupt prediction record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A classification that passed the confidence policy, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub owner_id: Option<i32>,
    pub filename: String,
    pub stored_filename: Option<String>,
    pub predicted_class: String,
    pub class_index: usize,
    pub confidence: f32,
    pub probabilities: Vec<(String, f32)>,
    pub tumor_detected: bool,
    pub is_uncertain: bool,
    pub reliability: ReliabilityTier,
    pub processing_time_ms: u64,
    pub client_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StoredPrediction {
    pub id: i64,
    pub owner_id: Option<i32>,
    pub filename: String,
    pub stored_filename: Option<String>,
    pub predicted_class: String,
    pub class_index: usize,
    /// In `[0, 1]`
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    pub tumor_detected: bool,
    pub is_uncertain: bool,
    pub reliability_level: String,
    pub processing_time_ms: i64,
    #[serde(skip_serializing)]
    pub client_addr: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredPrediction {
    fn from_new(id: i64, record: NewPrediction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id: record.owner_id,
            filename: record.filename,
            stored_filename: record.stored_filename,
            predicted_class: record.predicted_class,
            class_index: record.class_index,
            confidence: record.confidence as f64,
            probabilities: record
                .probabilities
                .into_iter()
                .map(|(label, p)| (label, p as f64))
                .collect(),
            tumor_detected: record.tumor_detected,
            is_uncertain: record.is_uncertain,
            reliability_level: record.reliability.to_string(),
            processing_time_ms: i64::try_from(record.processing_time_ms).unwrap_or(i64::MAX),
            client_addr: record.client_addr,
            created_at,
        }
    }
}

/// The columns confidence statistics are computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceSample {
    pub predicted_class: String,
    pub confidence: f64,
    pub tumor_detected: bool,
}

impl From<&StoredPrediction> for ConfidenceSample {
    fn from(record: &StoredPrediction) -> Self {
        Self {
            predicted_class: record.predicted_class.clone(),
            confidence: record.confidence,
            tumor_detected: record.tumor_detected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PredictionSummary {
    pub total_predictions: u64,
    pub tumor_detections: u64,
    pub no_tumor: u64,
    pub tumor_detection_rate: f64,
    pub average_confidence: f64,
    pub predictions_by_type: BTreeMap<String, u64>,
    /// Newest first
    pub recent: Vec<StoredPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ClassConfidence {
    pub mean: f64,
    pub std: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConfidenceStatistics {
    pub total_predictions: u64,
    pub average_confidence: f64,
    pub confidence_std: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub median_confidence: f64,
    pub class_statistics: BTreeMap<String, u64>,
    pub confidence_by_class: BTreeMap<String, ClassConfidence>,
    /// Confidence above [`HIGH_CONFIDENCE`]
    pub high_confidence_predictions: u64,
    /// Confidence below [`LOW_CONFIDENCE`]
    pub low_confidence_predictions: u64,
    pub tumor_detection_rate: f64,
}

/// Storage for accepted predictions.
///
/// `owner` scopes reads to one user's records; `None` reads everything.
#[async_trait]
pub trait PredictionRepository: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Stores a record and returns its id.
    async fn append(&self, record: NewPrediction) -> Result<i64, RepositoryError>;

    /// At most `limit` records, newest first.
    async fn recent(
        &self,
        limit: usize,
        owner: Option<i32>,
    ) -> Result<Vec<StoredPrediction>, RepositoryError>;

    async fn count(&self, owner: Option<i32>) -> Result<u64, RepositoryError>;

    async fn summary(&self, owner: Option<i32>) -> Result<PredictionSummary, RepositoryError>;

    /// `None` when there is nothing to compute statistics over.
    async fn statistics(
        &self,
        owner: Option<i32>,
    ) -> Result<Option<ConfidenceStatistics>, RepositoryError>;

    /// Round trip to the backing store.
    async fn ping(&self) -> Result<Duration, RepositoryError>;
}

impl PredictionSummary {
    fn from_counts(
        total: u64,
        tumor_detections: u64,
        confidence_sum: f64,
        predictions_by_type: BTreeMap<String, u64>,
        recent: Vec<StoredPrediction>,
    ) -> Self {
        Self {
            total_predictions: total,
            tumor_detections,
            no_tumor: total.saturating_sub(tumor_detections),
            tumor_detection_rate: ratio(tumor_detections, total),
            average_confidence: if total == 0 {
                0.0
            } else {
                confidence_sum / total as f64
            },
            predictions_by_type,
            recent,
        }
    }
}

/// Builds the analytics summary from records ordered newest first.
pub fn summarize(records: &[StoredPrediction]) -> PredictionSummary {
    let mut predictions_by_type = BTreeMap::new();
    for record in records {
        *predictions_by_type
            .entry(record.predicted_class.clone())
            .or_insert(0) += 1;
    }

    PredictionSummary::from_counts(
        records.len() as u64,
        records.iter().filter(|r| r.tumor_detected).count() as u64,
        records.iter().map(|r| r.confidence).sum(),
        predictions_by_type,
        records.iter().take(RECENT_IN_SUMMARY).cloned().collect(),
    )
}

pub fn compute_statistics(records: &[ConfidenceSample]) -> Option<ConfidenceStatistics> {
    if records.is_empty() {
        return None;
    }

    let mut confidences: Vec<f64> = records.iter().map(|r| r.confidence).collect();
    confidences.sort_by(|a, b| a.total_cmp(b));

    let mut by_class: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in records {
        by_class
            .entry(record.predicted_class.clone())
            .or_default()
            .push(record.confidence);
    }

    let total = records.len() as u64;
    let tumors = records.iter().filter(|r| r.tumor_detected).count() as u64;

    Some(ConfidenceStatistics {
        total_predictions: total,
        average_confidence: mean(confidences.iter().copied()),
        confidence_std: std_dev(&confidences),
        min_confidence: confidences[0],
        max_confidence: confidences[confidences.len() - 1],
        median_confidence: median(&confidences),
        class_statistics: by_class
            .iter()
            .map(|(label, values)| (label.clone(), values.len() as u64))
            .collect(),
        confidence_by_class: by_class
            .iter()
            .map(|(label, values)| {
                (
                    label.clone(),
                    ClassConfidence {
                        mean: mean(values.iter().copied()),
                        std: std_dev(values),
                        count: values.len() as u64,
                    },
                )
            })
            .collect(),
        high_confidence_predictions: confidences.iter().filter(|c| **c > HIGH_CONFIDENCE).count()
            as u64,
        low_confidence_predictions: confidences.iter().filter(|c| **c < LOW_CONFIDENCE).count()
            as u64,
        tumor_detection_rate: ratio(tumors, total),
    })
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Median of a sorted, non-empty slice.
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub struct SeaOrmPredictionRepository {
    db: DatabaseConnection,
}

impl SeaOrmPredictionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Deletes records created before `cutoff`. Returns the number removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = prediction::Entity::delete_many()
            .filter(prediction::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        tracing::info!("Pruned {} predictions older than {}", result.rows_affected, cutoff);
        Ok(result.rows_affected)
    }

    /// Every `every`, deletes records older than `retention`. The first pass runs immediately.
    pub fn spawn_pruning(
        self: Arc<Self>,
        retention: chrono::Duration,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune_before(Utc::now() - retention).await {
                    tracing::warn!("Pruning stored predictions failed: {}", e);
                }
            }
        })
    }

    fn filtered(owner: Option<i32>) -> Select<prediction::Entity> {
        let query = prediction::Entity::find();
        match owner {
            Some(owner) => query.filter(prediction::Column::OwnerId.eq(owner)),
            None => query,
        }
    }

    /// Newest first.
    fn scoped(owner: Option<i32>) -> Select<prediction::Entity> {
        Self::filtered(owner)
            .order_by_desc(prediction::Column::CreatedAt)
            .order_by_desc(prediction::Column::Id)
    }

    fn to_stored(model: prediction::Model) -> Result<StoredPrediction, RepositoryError> {
        Ok(StoredPrediction {
            id: model.id as i64,
            owner_id: model.owner_id,
            filename: model.filename,
            stored_filename: model.stored_filename,
            predicted_class: model.predicted_class,
            class_index: usize::try_from(model.class_index).unwrap_or_default(),
            confidence: model.confidence,
            probabilities: serde_json::from_value(model.probabilities)?,
            tumor_detected: model.tumor_detected,
            is_uncertain: model.is_uncertain,
            reliability_level: model.reliability_level,
            processing_time_ms: model.processing_time_ms,
            client_addr: model.client_addr,
            created_at: model.created_at,
        })
    }
}

#[async_trait]
impl PredictionRepository for SeaOrmPredictionRepository {
    fn backend_name(&self) -> &'static str {
        match self.db.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => "postgres",
            sea_orm::DatabaseBackend::MySql => "mysql",
            _ => "sqlite",
        }
    }

    async fn append(&self, record: NewPrediction) -> Result<i64, RepositoryError> {
        let probabilities: BTreeMap<&str, f64> = record
            .probabilities
            .iter()
            .map(|(label, p)| (label.as_str(), *p as f64))
            .collect();

        let model = prediction::ActiveModel {
            id: NotSet,
            owner_id: Set(record.owner_id),
            filename: Set(record.filename),
            stored_filename: Set(record.stored_filename),
            predicted_class: Set(record.predicted_class),
            class_index: Set(i32::try_from(record.class_index).unwrap_or(i32::MAX)),
            confidence: Set(record.confidence as f64),
            probabilities: Set(serde_json::to_value(probabilities)?),
            tumor_detected: Set(record.tumor_detected),
            is_uncertain: Set(record.is_uncertain),
            reliability_level: Set(record.reliability.to_string()),
            processing_time_ms: Set(i64::try_from(record.processing_time_ms).unwrap_or(i64::MAX)),
            client_addr: Set(record.client_addr),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await?;

        Ok(model.id as i64)
    }

    async fn recent(
        &self,
        limit: usize,
        owner: Option<i32>,
    ) -> Result<Vec<StoredPrediction>, RepositoryError> {
        Self::scoped(owner)
            .limit(limit as u64)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Self::to_stored)
            .collect()
    }

    async fn count(&self, owner: Option<i32>) -> Result<u64, RepositoryError> {
        Ok(Self::filtered(owner).count(&self.db).await?)
    }

    async fn summary(&self, owner: Option<i32>) -> Result<PredictionSummary, RepositoryError> {
        let total = Self::filtered(owner).count(&self.db).await?;
        let tumor_detections = Self::filtered(owner)
            .filter(prediction::Column::TumorDetected.eq(true))
            .count(&self.db)
            .await?;

        let predictions_by_type = Self::filtered(owner)
            .select_only()
            .column(prediction::Column::PredictedClass)
            .column_as(prediction::Column::Id.count(), "total")
            .group_by(prediction::Column::PredictedClass)
            .into_tuple::<(String, i64)>()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|(label, n)| (label, u64::try_from(n).unwrap_or_default()))
            .collect();

        let confidence_sum = Self::filtered(owner)
            .select_only()
            .column_as(prediction::Column::Confidence.sum(), "total")
            .into_tuple::<Option<f64>>()
            .one(&self.db)
            .await?
            .flatten()
            .unwrap_or_default();

        let recent = self.recent(RECENT_IN_SUMMARY, owner).await?;
        Ok(PredictionSummary::from_counts(
            total,
            tumor_detections,
            confidence_sum,
            predictions_by_type,
            recent,
        ))
    }

    async fn statistics(
        &self,
        owner: Option<i32>,
    ) -> Result<Option<ConfidenceStatistics>, RepositoryError> {
        let samples: Vec<ConfidenceSample> = Self::filtered(owner)
            .select_only()
            .columns([
                prediction::Column::PredictedClass,
                prediction::Column::Confidence,
                prediction::Column::TumorDetected,
            ])
            .into_tuple::<(String, f64, bool)>()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|(predicted_class, confidence, tumor_detected)| ConfidenceSample {
                predicted_class,
                confidence,
                tumor_detected,
            })
            .collect();
        Ok(compute_statistics(&samples))
    }

    async fn ping(&self) -> Result<Duration, RepositoryError> {
        let now = Instant::now();
        self.db.ping().await?;
        Ok(now.elapsed())
    }
}

struct History {
    next_id: i64,
    records: VecDeque<StoredPrediction>,
}

/// Keeps the newest `capacity` records; the oldest is evicted first.
pub struct InMemoryPredictionRepository {
    capacity: usize,
    history: Mutex<History>,
}

impl InMemoryPredictionRepository {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: Mutex::new(History {
                next_id: 1,
                records: VecDeque::with_capacity(capacity.min(1024)),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect(&self, limit: usize, owner: Option<i32>) -> Vec<StoredPrediction> {
        self.history
            .lock()
            .records
            .iter()
            .rev()
            .filter(|r| owner.is_none() || r.owner_id == owner)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PredictionRepository for InMemoryPredictionRepository {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, record: NewPrediction) -> Result<i64, RepositoryError> {
        let mut history = self.history.lock();
        let id = history.next_id;
        history.next_id += 1;
        history
            .records
            .push_back(StoredPrediction::from_new(id, record, Utc::now()));
        while history.records.len() > self.capacity {
            history.records.pop_front();
        }
        Ok(id)
    }

    async fn recent(
        &self,
        limit: usize,
        owner: Option<i32>,
    ) -> Result<Vec<StoredPrediction>, RepositoryError> {
        Ok(self.collect(limit, owner))
    }

    async fn count(&self, owner: Option<i32>) -> Result<u64, RepositoryError> {
        let history = self.history.lock();
        let n = history
            .records
            .iter()
            .filter(|r| owner.is_none() || r.owner_id == owner)
            .count();
        Ok(n as u64)
    }

    async fn summary(&self, owner: Option<i32>) -> Result<PredictionSummary, RepositoryError> {
        Ok(summarize(&self.collect(usize::MAX, owner)))
    }

    async fn statistics(
        &self,
        owner: Option<i32>,
    ) -> Result<Option<ConfidenceStatistics>, RepositoryError> {
        let samples: Vec<ConfidenceSample> = self
            .collect(usize::MAX, owner)
            .iter()
            .map(ConfidenceSample::from)
            .collect();
        Ok(compute_statistics(&samples))
    }

    async fn ping(&self) -> Result<Duration, RepositoryError> {
        Ok(Duration::ZERO)
    }
}
