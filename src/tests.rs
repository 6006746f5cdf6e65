use std::{
    io::{self, Cursor},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use tempfile::TempDir;

use crate::{
    app,
    config::Config,
    models::UploadResponse,
    processing::ImageTransformer,
    state::AppState,
    storage::{LocalStorage, Storage, StorageError},
};

fn test_config(dir: &TempDir) -> Config {
    Config {
        upload_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

fn server_with(storage: Arc<dyn Storage>, config: Config) -> TestServer {
    let state = AppState {
        storage,
        transformer: ImageTransformer::from_config(&config),
        config,
    };
    TestServer::new(app(state)).expect("Failed to run test server.")
}

async fn test_server(dir: &TempDir) -> TestServer {
    let config = test_config(dir);
    let storage = LocalStorage::new(&config.upload_dir).await.unwrap();
    server_with(Arc::new(storage), config)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn png16_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb16(ImageBuffer::<Rgb<u16>, _>::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn image_form(file_name: &str, data: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        "image",
        Part::bytes(data).file_name(file_name).mime_type("image/png"),
    )
}

fn processed_path(dir: &TempDir, image_url: &str) -> PathBuf {
    let name = image_url
        .strip_prefix("/uploads/")
        .expect("imageUrl should live under /uploads/");
    dir.path().join(name)
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server.get("/health").await;

    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn upload_downscales_large_image() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("landscape.png", png_bytes(1600, 1200)))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "imageUrl": "/uploads/processed_landscape.png" }));

    let body: UploadResponse = response.json();
    let output = processed_path(&dir, &body.image_url);
    assert_eq!(image::image_dimensions(&output).unwrap(), (800, 600));
    assert_eq!(
        image::image_dimensions(dir.path().join("landscape.png")).unwrap(),
        (1600, 1200)
    );
}

#[tokio::test]
async fn upload_keeps_small_image_size() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("small.png", png_bytes(400, 300)))
        .await;

    response.assert_status_ok();
    let body: UploadResponse = response.json();
    assert_eq!(
        image::image_dimensions(processed_path(&dir, &body.image_url)).unwrap(),
        (400, 300)
    );
}

#[tokio::test]
async fn missing_image_part_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let form = MultipartForm::new().add_part(
        "picture",
        Part::bytes(png_bytes(10, 10)).file_name("a.png"),
    );
    let response = server.post("/api/upload").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({ "error": "No image part" }));
}

#[tokio::test]
async fn plain_text_image_field_is_not_a_file() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let form = MultipartForm::new().add_text("image", "not a file");
    let response = server.post("/api/upload").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({ "error": "No image part" }));
}

#[tokio::test]
async fn empty_filename_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("", png_bytes(10, 10)))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({ "error": "No selected file" }));
}

#[tokio::test]
async fn unusable_filename_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("../..", png_bytes(10, 10)))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({ "error": "Invalid filename" }));
}

#[tokio::test]
async fn path_traversal_stays_inside_upload_dir() {
    let root = TempDir::new().unwrap();
    let uploads = root.path().join("uploads");
    let config = Config {
        upload_dir: uploads.clone(),
        ..Config::default()
    };
    let storage = LocalStorage::new(&uploads).await.unwrap();
    let server = server_with(Arc::new(storage), config);

    let response = server
        .post("/api/upload")
        .multipart(image_form("../../etc/passwd.png", png_bytes(20, 20)))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "imageUrl": "/uploads/processed_passwd.png" }));
    assert!(uploads.join("passwd.png").is_file());
    assert!(uploads.join("processed_passwd.png").is_file());
    assert!(!root.path().join("etc").exists());
}

#[tokio::test]
async fn repeated_names_do_not_overwrite() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let first = server
        .post("/api/upload")
        .multipart(image_form("cat.png", png_bytes(1000, 500)))
        .await;
    let second = server
        .post("/api/upload")
        .multipart(image_form("cat.png", png_bytes(300, 900)))
        .await;

    first.assert_json(&json!({ "imageUrl": "/uploads/processed_cat.png" }));
    second.assert_json(&json!({ "imageUrl": "/uploads/processed_cat_1.png" }));
    assert_eq!(
        image::image_dimensions(dir.path().join("processed_cat.png")).unwrap(),
        (800, 400)
    );
    assert_eq!(
        image::image_dimensions(dir.path().join("processed_cat_1.png")).unwrap(),
        (267, 800)
    );
}

#[tokio::test]
async fn corrupt_image_is_unprocessable() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("fake.png", b"definitely not an image".to_vec()))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    response.assert_json(&json!({ "error": "invalid image", "kind": "invalid_image" }));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        max_file_size: 1024,
        ..test_config(&dir)
    };
    let storage = LocalStorage::new(dir.path()).await.unwrap();
    let server = server_with(Arc::new(storage), config);

    let response = server
        .post("/api/upload")
        .multipart(image_form("big.bin", vec![0u8; 4096]))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!dir.path().join("big.bin").exists());
}

struct BrokenDisk;

#[async_trait]
impl Storage for BrokenDisk {
    async fn store(&self, _filename: &str, _content: Bytes) -> Result<PathBuf, StorageError> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only filesystem").into())
    }
}

#[tokio::test]
async fn storage_failure_is_a_server_error() {
    let dir = TempDir::new().unwrap();
    let server = server_with(Arc::new(BrokenDisk), test_config(&dir));

    let response = server
        .post("/api/upload")
        .multipart(image_form("cat.png", png_bytes(10, 10)))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_json(&json!({ "error": "storage error", "kind": "storage_error" }));
}

#[tokio::test]
async fn processed_image_is_served() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let upload = server
        .post("/api/upload")
        .multipart(image_form("served.png", png_bytes(900, 300)))
        .await;
    let body: UploadResponse = upload.json();

    let response = server.get(&body.image_url).await;

    response.assert_status_ok();
    let served = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!((served.width(), served.height()), (800, 267));
}

#[tokio::test]
async fn long_filename_uploaded_twice_succeeds() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;
    let name = format!("{}.png", "a".repeat(300));

    let first = server
        .post("/api/upload")
        .multipart(image_form(&name, png_bytes(20, 20)))
        .await;
    let second = server
        .post("/api/upload")
        .multipart(image_form(&name, png_bytes(20, 20)))
        .await;

    first.assert_status_ok();
    second.assert_status_ok();
    let first: UploadResponse = first.json();
    let second: UploadResponse = second.json();
    assert_ne!(first.image_url, second.image_url);
    assert!(second.image_url.ends_with("_1.png"));
    assert!(processed_path(&dir, &second.image_url).is_file());
}

#[tokio::test]
async fn sixteen_bit_png_saved_as_gif_is_accepted() {
    let dir = TempDir::new().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .post("/api/upload")
        .multipart(image_form("deep.gif", png16_bytes(1600, 40)))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "imageUrl": "/uploads/processed_deep.gif" }));
    let decoded = image::open(dir.path().join("processed_deep.gif")).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (800, 20));
}

#[tokio::test]
async fn processing_timeout_is_service_unavailable() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let storage = LocalStorage::new(dir.path()).await.unwrap();
    let state = AppState {
        storage: Arc::new(storage),
        transformer: ImageTransformer::new(800, 16_384, Duration::ZERO),
        config,
    };
    let server = TestServer::new(app(state)).expect("Failed to run test server.");

    let response = server
        .post("/api/upload")
        .multipart(image_form("late.png", png_bytes(1200, 900)))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    response.assert_json(&json!({
        "error": "image processing timed out",
        "kind": "processing_timeout",
    }));
    assert!(!dir.path().join("processed_late.png").exists());
}
