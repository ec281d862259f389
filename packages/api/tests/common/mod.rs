//! Shared fixtures for the router-level tests.

#![allow(dead_code)]

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header::CONTENT_TYPE},
};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use neuroscan_api::{
    config::ServiceConfig, construct_router, repository::PredictionRepository, state::State,
};
use neuroscan_vision::{
    ClassLabelTable, Classifier, InferenceAdapter, ModelDescriptor, StageError,
};
use serde_json::Value;

pub const BOUNDARY: &str = "neuroscan-test-boundary";

/// Returns the same output for every input and counts how often it ran.
pub struct FixedClassifier {
    output: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl Classifier for FixedClassifier {
    fn input_size(&self) -> (u32, u32) {
        (224, 224)
    }

    fn output_width(&self) -> Option<usize> {
        Some(self.output.len())
    }

    fn describe(&self) -> ModelDescriptor {
        ModelDescriptor {
            source: "fixed".to_string(),
            format: "test".to_string(),
            input_shape: [1, 224, 224, 3],
            output_width: Some(self.output.len()),
        }
    }

    fn predict(&self, _input: &Array4<f32>) -> Result<Vec<f32>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Adapter over a [`FixedClassifier`] plus its call counter.
pub fn fixed_adapter(output: Vec<f32>) -> (InferenceAdapter, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let classifier = FixedClassifier {
        output,
        calls: Arc::clone(&calls),
    };
    let adapter =
        InferenceAdapter::new(Arc::new(classifier), ClassLabelTable::brain_mri_4class()).unwrap();
    (adapter, calls)
}

pub fn temp_upload_dir() -> PathBuf {
    std::env::temp_dir().join(format!("neuroscan-test-{}", uuid::Uuid::new_v4()))
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        upload_dir: temp_upload_dir(),
        jwt_secret: Some("integration-test-secret".to_string()),
        bcrypt_cost: 4,
        ..ServiceConfig::default()
    }
}

pub fn router(
    config: ServiceConfig,
    adapter: InferenceAdapter,
    repository: Arc<dyn PredictionRepository>,
    db: Option<neuroscan_api::sea_orm::DatabaseConnection>,
) -> Router {
    construct_router(Arc::new(State::from_parts(config, adapter, repository, db)))
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

/// `multipart/form-data` body with one file part per `(field, filename, bytes)`.
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, filename, bytes) in parts {
        let content_type = content_type_for(filename);
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
