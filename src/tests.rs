//! Integration tests for the grain analyzer backend.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use once_cell::sync::Lazy;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::grain::tests::grid_png;
use crate::search::SearchIndex;
use crate::{create_router, AppState};

static GRID_PNG: Lazy<Vec<u8>> = Lazy::new(|| grid_png(200, 20));

static BLANK_PNG: Lazy<Vec<u8>> = Lazy::new(|| flat_png(120, 120));

/// Flat field past the fixture's 1 MP cap; compresses to a few KB.
static HUGE_PNG: Lazy<Vec<u8>> = Lazy::new(|| flat_png(1500, 1500));

fn flat_png(width: u32, height: u32) -> Vec<u8> {
    let flat = GrayImage::from_pixel(width, height, Luma([128]));
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(flat)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

const STEEL: &str = "Steel (Low Carbon)";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
            default_circles: 5,
            max_image_pixels: 1_000_000,
        };

        let state = AppState {
            repo,
            search,
            config: Arc::new(config),
        };

        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Post a multipart analysis upload and return the status and body.
    async fn upload(&self, form: Form) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url("/api/analyses"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn image_part(bytes: &[u8], file_name: &str) -> Part {
    Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_str("image/png")
        .unwrap()
}

fn grid_form(material_name: &str) -> Form {
    Form::new()
        .part("image", image_part(&GRID_PNG, "ferrite_grid.png"))
        .text("pixelsPerMicron", "1.0")
        .text("materialName", material_name.to_string())
        .text("seed", "42")
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    // Plain client without the default key header
    let resp = Client::new()
        .get(fixture.url("/api/datastore"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/materials"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_auth_bearer_and_valid_psk() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/datastore"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let resp = Client::new()
        .get(fixture.url("/api/datastore/revision"))
        .bearer_auth("test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::with_psk(None).await;

    let resp = Client::new()
        .get(fixture.url("/api/materials"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_datastore_includes_seeded_materials() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/datastore"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["data"]["schemaVersion"].is_number());
    assert_eq!(body["data"]["materials"].as_array().unwrap().len(), 5);
    assert!(body["data"]["analyses"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["revisionId"], body["revisionId"]);
}

#[tokio::test]
async fn test_material_crud() {
    let fixture = TestFixture::new().await;

    let create_resp = fixture
        .client
        .post(fixture.url("/api/materials"))
        .json(&json!({
            "name": "Copper (C11000)",
            "frictionStressMpa": 25.0,
            "lockingParameter": 11.0,
            "description": "Annealed ETP copper"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(create_resp.status(), 200);
    let create_body: Value = create_resp.json().await.unwrap();
    let material_id = create_body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(create_body["data"]["version"], 1);
    let revision_after_create = create_body["revisionId"].as_i64().unwrap();

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/api/materials/{}", material_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 200);
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["name"], "Copper (C11000)");

    let update_resp = fixture
        .client
        .put(fixture.url(&format!("/api/materials/{}", material_id)))
        .json(&json!({
            "lockingParameter": 12.0,
            "expectedVersion": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 200);
    let update_body: Value = update_resp.json().await.unwrap();
    assert_eq!(update_body["data"]["lockingParameter"], 12.0);
    assert_eq!(update_body["data"]["frictionStressMpa"], 25.0);
    assert_eq!(update_body["data"]["version"], 2);
    let revision_after_update = update_body["revisionId"].as_i64().unwrap();
    assert!(revision_after_update > revision_after_create);

    let list_resp = fixture
        .client
        .get(fixture.url("/api/materials"))
        .send()
        .await
        .unwrap();
    let list_body: Value = list_resp.json().await.unwrap();
    assert_eq!(list_body["data"].as_array().unwrap().len(), 6);

    let delete_resp = fixture
        .client
        .delete(fixture.url(&format!("/api/materials/{}", material_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(delete_resp.status(), 200);
    let delete_body: Value = delete_resp.json().await.unwrap();
    assert!(delete_body["revisionId"].as_i64().unwrap() > revision_after_update);

    let get_deleted_resp = fixture
        .client
        .get(fixture.url(&format!("/api/materials/{}", material_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(get_deleted_resp.status(), 404);
}

#[tokio::test]
async fn test_optimistic_concurrency_conflict() {
    let fixture = TestFixture::new().await;

    let list_resp = fixture
        .client
        .get(fixture.url("/api/materials"))
        .send()
        .await
        .unwrap();
    let list_body: Value = list_resp.json().await.unwrap();
    let material_id = list_body["data"][0]["id"].as_str().unwrap().to_string();

    let conflict_resp = fixture
        .client
        .put(fixture.url(&format!("/api/materials/{}", material_id)))
        .json(&json!({
            "frictionStressMpa": 80.0,
            "expectedVersion": 999
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(conflict_resp.status(), 409);
    let conflict_body: Value = conflict_resp.json().await.unwrap();
    assert_eq!(conflict_body["success"], false);
    assert_eq!(conflict_body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(conflict_body["error"]["details"]["currentVersion"], 1);
}

#[tokio::test]
async fn test_material_validation_errors() {
    let fixture = TestFixture::new().await;

    let cases = [
        json!({ "name": "  ", "frictionStressMpa": 10.0, "lockingParameter": 1.0 }),
        json!({ "name": "Negative", "frictionStressMpa": -1.0, "lockingParameter": 1.0 }),
        json!({ "name": "Zero k", "frictionStressMpa": 10.0, "lockingParameter": 0.0 }),
        json!({ "name": STEEL, "frictionStressMpa": 10.0, "lockingParameter": 1.0 }),
    ];

    for body in cases {
        let resp = fixture
            .client
            .post(fixture.url("/api/materials"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{}", body);
        let resp_body: Value = resp.json().await.unwrap();
        assert_eq!(resp_body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_calibrate_scale_bar() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/calibrate"))
        .json(&json!({
            "start": { "x": 10.0, "y": 20.0 },
            "end": { "x": 110.0, "y": 20.0 },
            "knownLengthUm": 20.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["pixelDistance"], 100.0);
    assert_eq!(body["data"]["pixelsPerMicron"], 5.0);

    // Points picked on a half-size preview
    let resp = fixture
        .client
        .post(fixture.url("/api/calibrate"))
        .json(&json!({
            "start": { "x": 0.0, "y": 0.0 },
            "end": { "x": 50.0, "y": 0.0 },
            "knownLengthUm": 10.0,
            "displayScale": 0.5
        }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["pixelsPerMicron"], 10.0);

    let resp = fixture
        .client
        .post(fixture.url("/api/calibrate"))
        .json(&json!({
            "start": { "x": 0.0, "y": 0.0 },
            "end": { "x": 50.0, "y": 0.0 },
            "knownLengthUm": 0.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_analysis_upload_and_fetch() {
    let fixture = TestFixture::new().await;

    let form = grid_form(STEEL).text("notes", "weld heat affected zone");
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["success"], true);

    let analysis = &body["data"];
    let id = analysis["id"].as_str().unwrap().to_string();
    assert_eq!(analysis["fileName"], "ferrite_grid.png");
    assert_eq!(analysis["materialName"], STEEL);
    assert_eq!(analysis["imageWidth"], 200);
    assert_eq!(analysis["circleCount"], 5);
    assert_eq!(analysis["circleRadiusPx"], 70);
    assert_eq!(analysis["seed"], 42);
    assert_eq!(analysis["frictionStressMpa"], 70.0);
    assert!(analysis["totalIntercepts"].as_u64().unwrap() > 0);
    assert!(analysis["yieldStrengthMpa"].as_f64().unwrap() > 70.0);
    assert!(analysis["astmGrainNumber"].is_number());

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/api/analyses/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 200);
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["notes"], "weld heat affected zone");
    assert_eq!(get_body["data"]["totalIntercepts"], analysis["totalIntercepts"]);

    let report_resp = fixture
        .client
        .get(fixture.url(&format!("/api/analyses/{}/report", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(report_resp.status(), 200);
    assert!(report_resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let report = report_resp.text().await.unwrap();
    assert!(report.contains(STEEL));

    let overlay_resp = fixture
        .client
        .get(fixture.url(&format!("/api/analyses/{}/overlay", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(overlay_resp.status(), 200);
    assert_eq!(overlay_resp.headers()["content-type"], "image/png");
    let overlay = overlay_resp.bytes().await.unwrap();
    assert_eq!(&overlay[..4], b"\x89PNG");
}

#[tokio::test]
async fn test_analysis_repeatable_with_seed() {
    let fixture = TestFixture::new().await;

    let (_, first) = fixture.upload(grid_form(STEEL)).await;
    let (_, second) = fixture.upload(grid_form(STEEL)).await;

    assert_ne!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(
        first["data"]["totalIntercepts"],
        second["data"]["totalIntercepts"]
    );
    assert_eq!(
        first["data"]["yieldStrengthMpa"],
        second["data"]["yieldStrengthMpa"]
    );
}

#[tokio::test]
async fn test_analysis_keeps_constants_after_material_edit() {
    let fixture = TestFixture::new().await;

    let (_, body) = fixture.upload(grid_form(STEEL)).await;
    let analysis_id = body["data"]["id"].as_str().unwrap().to_string();
    let material_id = body["data"]["materialId"].as_str().unwrap().to_string();
    let strength = body["data"]["yieldStrengthMpa"].clone();

    let update_resp = fixture
        .client
        .put(fixture.url(&format!("/api/materials/{}", material_id)))
        .json(&json!({ "frictionStressMpa": 500.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 200);

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/api/analyses/{}", analysis_id)))
        .send()
        .await
        .unwrap();
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["frictionStressMpa"], 70.0);
    assert_eq!(get_body["data"]["yieldStrengthMpa"], strength);
}

#[tokio::test]
async fn test_analysis_upload_errors() {
    let fixture = TestFixture::new().await;

    // Unknown material
    let (status, body) = fixture.upload(grid_form("Unobtainium")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    // No material at all
    let form = Form::new()
        .part("image", image_part(&GRID_PNG, "grid.png"))
        .text("pixelsPerMicron", "1.0");
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // Missing image
    let form = Form::new()
        .text("pixelsPerMicron", "1.0")
        .text("materialName", STEEL);
    let (status, _) = fixture.upload(form).await;
    assert_eq!(status, 400);

    // Bad scale
    let form = Form::new()
        .part("image", image_part(&GRID_PNG, "grid.png"))
        .text("pixelsPerMicron", "0")
        .text("materialName", STEEL);
    let (status, _) = fixture.upload(form).await;
    assert_eq!(status, 400);

    // Non-numeric field
    let form = Form::new()
        .part("image", image_part(&GRID_PNG, "grid.png"))
        .text("pixelsPerMicron", "lots")
        .text("materialName", STEEL);
    let (status, _) = fixture.upload(form).await;
    assert_eq!(status, 400);

    // Not an image
    let form = Form::new()
        .part("image", image_part(b"definitely not a png", "notes.png"))
        .text("pixelsPerMicron", "1.0")
        .text("materialName", STEEL);
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 415);
    assert_eq!(body["error"]["code"], "INVALID_IMAGE");

    // Small file, oversized frame
    let form = Form::new()
        .part("image", image_part(&HUGE_PNG, "huge.png"))
        .text("pixelsPerMicron", "1.0")
        .text("materialName", STEEL);
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("1500x1500"));

    // Featureless image
    let form = Form::new()
        .part("image", image_part(&BLANK_PNG, "blank.png"))
        .text("pixelsPerMicron", "1.0")
        .text("materialName", STEEL);
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["code"], "ANALYSIS_FAILED");

    // Nothing was stored
    let list_resp = fixture
        .client
        .get(fixture.url("/api/analyses"))
        .send()
        .await
        .unwrap();
    let list_body: Value = list_resp.json().await.unwrap();
    assert!(list_body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_endpoint() {
    let fixture = TestFixture::new().await;

    let form = grid_form("Titanium (CP Grade 2)").text("notes", "forged billet");
    let (status, body) = fixture.upload(form).await;
    assert_eq!(status, 200);
    let titanium_id = body["data"]["id"].clone();

    let (status, _) = fixture.upload(grid_form(STEEL)).await;
    assert_eq!(status, 200);

    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=titanium"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["analysis"]["id"], titanium_id);
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);

    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=billet"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 1);

    // File name words are searchable
    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=ferrite&limit=500"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["limit"], 100);

    // Total counts every match, not just the returned page
    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=ferrite&limit=1&offset=1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["total"], 2);

    for query in [
        "q=ferrite&limit=0",
        "q=ferrite&offset=18446744073709551615",
    ] {
        let resp = fixture
            .client
            .get(fixture.url(&format!("/api/search?{}", query)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{}", query);
        let body: Value = resp.json().await.unwrap();
        assert!(body["data"]["results"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["total"], 2);
    }
}

#[tokio::test]
async fn test_delete_analysis() {
    let fixture = TestFixture::new().await;

    let (_, body) = fixture.upload(grid_form(STEEL)).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let delete_resp = fixture
        .client
        .delete(fixture.url(&format!("/api/analyses/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(delete_resp.status(), 200);

    for path in ["", "/report", "/overlay"] {
        let resp = fixture
            .client
            .get(fixture.url(&format!("/api/analyses/{}{}", id, path)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "{}", path);
    }

    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=ferrite"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 0);

    let again = fixture
        .client
        .delete(fixture.url(&format!("/api/analyses/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn test_revision_increments_on_writes() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/datastore/revision"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let initial_revision = body["data"]["revisionId"].as_i64().unwrap();

    let (_, body) = fixture.upload(grid_form(STEEL)).await;
    let after_upload = body["revisionId"].as_i64().unwrap();
    assert_eq!(after_upload, initial_revision + 1);

    // Reads and failed writes leave the revision alone
    fixture
        .client
        .post(fixture.url("/api/calibrate"))
        .json(&json!({
            "start": { "x": 0.0, "y": 0.0 },
            "end": { "x": 10.0, "y": 0.0 },
            "knownLengthUm": 1.0
        }))
        .send()
        .await
        .unwrap();
    let (status, _) = fixture.upload(grid_form("Unobtainium")).await;
    assert_eq!(status, 404);

    let resp = fixture
        .client
        .get(fixture.url("/api/datastore/revision"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["revisionId"].as_i64().unwrap(), after_upload);
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;

    for path in [
        "/api/materials/non-existent-id",
        "/api/analyses/non-existent-id",
        "/api/analyses/non-existent-id/report",
        "/api/analyses/non-existent-id/overlay",
    ] {
        let resp = fixture.client.get(fixture.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), 404, "{}", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    let resp = fixture
        .client
        .delete(fixture.url("/api/materials/non-existent-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
