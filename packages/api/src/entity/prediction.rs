//! `SeaORM` Entity for stored predictions.
//!
//! Rows are written once by the prediction pipeline and never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "predictions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Authenticated user that uploaded the image, if any
    #[sea_orm(nullable, indexed)]
    pub owner_id: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub filename: String,
    /// Name of the copy under the upload directory
    #[sea_orm(column_type = "Text", nullable)]
    pub stored_filename: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub predicted_class: String,
    pub class_index: i32,
    /// Probability of the predicted class, in `[0, 1]`
    pub confidence: f64,
    /// `{label: probability}` in `[0, 1]`
    pub probabilities: Json,
    pub tumor_detected: bool,
    pub is_uncertain: bool,
    #[sea_orm(column_type = "Text")]
    pub reliability_level: String,
    pub processing_time_ms: i64,
    #[sea_orm(column_type = "Text", nullable)]
    pub client_addr: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
