use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};

/// Security scheme modifier to add bearer authentication
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        // Account token from POST /api/auth/login
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                Http::builder()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("Token issued by POST /api/auth/login"))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "NeuroScan API",
        version = "2.0.0",
        description = "Brain MRI classification service.\n\n## Authentication\n\nPrediction and analytics endpoints work anonymously. With `Authorization: Bearer <token>` predictions are recorded under the caller's account and analytics are scoped to them.",
        license(name = "MIT")
    ),
    servers(
        (url = "/api", description = "API")
    ),
    tags(
        (name = "predict", description = "Image classification"),
        (name = "debug", description = "Raw model output and class order"),
        (name = "health", description = "Health check endpoints"),
        (name = "model", description = "Model and class information"),
        (name = "analytics", description = "Prediction history and statistics"),
        (name = "auth", description = "Accounts and bearer tokens")
    ),
    paths(
        crate::routes::predict::predict,
        crate::routes::predict::predict_batch,
        crate::routes::debug::debug_prediction,
        crate::routes::debug::class_order,
        crate::routes::health::health,
        crate::routes::health::db_health,
        crate::routes::info::classes,
        crate::routes::info::model_info,
        crate::routes::analytics::summary,
        crate::routes::analytics::history,
        crate::routes::analytics::statistics,
        crate::routes::auth::register,
        crate::routes::auth::login,
        crate::routes::auth::verify,
        crate::routes::auth::logout,
    ),
    components(schemas(
        crate::routes::predict::ImageUpload,
        crate::routes::predict::BatchUpload,
        crate::routes::predict::PredictionResponse,
        crate::routes::predict::BatchEntry,
        crate::routes::predict::BatchFailure,
        crate::routes::predict::BatchSummary,
        crate::routes::predict::BatchResponse,
        crate::routes::debug::DebugPredictionResponse,
        crate::routes::debug::ClassOrderResponse,
        crate::routes::health::HealthResponse,
        crate::routes::health::DbHealthResponse,
        crate::routes::info::ClassesResponse,
        crate::routes::info::ModelInfoResponse,
        crate::routes::info::Thresholds,
        crate::routes::analytics::HistoryResponse,
        crate::routes::auth::RegisterRequest,
        crate::routes::auth::LoginRequest,
        crate::routes::auth::RegisterResponse,
        crate::routes::auth::LoginResponse,
        crate::routes::auth::VerifyResponse,
        crate::routes::auth::UserInfo,
        crate::routes::auth::MessageResponse,
        crate::pipeline::RawInspection,
        crate::pipeline::ClassProbability,
        crate::repository::StoredPrediction,
        crate::repository::PredictionSummary,
        crate::repository::ConfidenceStatistics,
        crate::repository::ClassConfidence,
    ))
)]
pub struct ApiDoc;
