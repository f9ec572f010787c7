use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use furnifind::{
    BackendClient, CanvasPoint, Config, ElementRect, ImageUpload, Outcome, Phase, Session, SessionOptions,
};
use image::{ImageFormat, Rgb, RgbImage};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

const MASKS: &str = r#"[{"id":"m0","x":10,"y":10,"width":50,"height":50,"score":0.9,"mask":[[0,1],[1,0]]}]"#;

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn session(server: &ServerGuard) -> Session {
    let config = Config::default().with_backend_url(&server.url()).unwrap();
    Session::new(BackendClient::new(&config).unwrap(), SessionOptions::from(&config))
}

fn room() -> ImageUpload {
    ImageUpload::new("room.png", png(100, 100)).unwrap()
}

async fn mock_segment(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/segment")
        .match_header("content-type", Matcher::Regex("^multipart/form-data".to_string()))
        .match_body(Matcher::Regex(r#"name="image"; filename="room.png""#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(MASKS)
        .create_async()
        .await
}

async fn mock_crop(server: &mut ServerGuard) -> Mock {
    let body = json!({
        "cropped_image": STANDARD.encode(png(50, 50)),
        "bbox": {"x": 10, "y": 10, "width": 50, "height": 50}
    });
    server
        .mock("POST", "/crop_bbox")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="x"\s+10\s"#.to_string()),
            Matcher::Regex(r#"name="y"\s+10\s"#.to_string()),
            Matcher::Regex(r#"name="width"\s+50\s"#.to_string()),
            Matcher::Regex(r#"name="height"\s+50\s"#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_embed(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/embed_siglip")
        .match_body(Matcher::Regex(r#"name="image"; filename="cropped.png""#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[0.5, 0.25, 0.125]")
        .create_async()
        .await
}

async fn mock_search(server: &mut ServerGuard) -> Mock {
    let body = json!([
        {"id": "p1", "name": "Oak chair", "original_url": "gs://catalog/chairs/oak.jpg", "similarity": 0.94},
        {"id": "p2", "name": "Pine chair", "imageUrl": "https://cdn.example.com/pine.jpg", "similarity": 0.81},
        {"id": "p3", "name": "Stool", "price": "$40", "inStock": false, "similarity": 0.66}
    ]);
    server
        .mock("POST", "/search")
        .match_body(Matcher::Json(json!({"embedding": [0.5, 0.25, 0.125], "top_k": 12})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn upload_click_and_search() {
    let mut server = Server::new_async().await;
    let segment = mock_segment(&mut server).await;
    let crop = mock_crop(&mut server).await;
    let embed = mock_embed(&mut server).await;
    let search = mock_search(&mut server).await;
    let session = session(&server);

    assert_eq!(session.upload(room()).await.unwrap(), Outcome::Applied(1));

    // two tinted quadrants, two untouched
    let rendered = session.render().unwrap();
    assert_eq!(rendered.dimensions(), (600, 600));
    let base = image::Rgba([200, 200, 200, 255]);
    assert_ne!(*rendered.get_pixel(450, 150), base);
    assert_ne!(*rendered.get_pixel(150, 450), base);
    assert_eq!(*rendered.get_pixel(150, 150), base);
    assert_eq!(*rendered.get_pixel(450, 450), base);

    let canvas = session.snapshot().canvas.unwrap();
    let outcome = session
        .select_at(ElementRect::unscaled(canvas), 450.0, 150.0)
        .await
        .unwrap();
    assert_eq!(outcome, Some(Outcome::Applied(3)));

    segment.assert_async().await;
    crop.assert_async().await;
    embed.assert_async().await;
    search.assert_async().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.selected.as_ref().map(|m| m.id.as_str()), Some("m0"));
    let cropped = snapshot.cropped.unwrap();
    assert_eq!((cropped.width, cropped.height), (50, 50));
    assert!(snapshot.cropped_path.unwrap().exists());

    let items = session.grid_items();
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0].image_url,
        Some(format!("{}/images/chairs/oak.jpg", server.url()))
    );
    assert_eq!(items[1].image_url.as_deref(), Some("https://cdn.example.com/pine.jpg"));
    assert_eq!(items[2].image_url, None);
}

#[tokio::test]
async fn clear_releases_display_files_and_state() {
    let mut server = Server::new_async().await;
    let _segment = mock_segment(&mut server).await;
    let _crop = mock_crop(&mut server).await;
    let _embed = mock_embed(&mut server).await;
    let _search = mock_search(&mut server).await;
    let session = session(&server);

    session.upload(room()).await.unwrap();
    session.select("m0").await.unwrap();

    let before = session.snapshot();
    let image_path = before.image_path.unwrap();
    let cropped_path = before.cropped_path.unwrap();
    assert!(image_path.exists());
    assert!(cropped_path.exists());

    session.clear();

    assert!(!image_path.exists());
    assert!(!cropped_path.exists());
    let after = session.snapshot();
    assert!(after.image_path.is_none());
    assert!(after.canvas.is_none());
    assert!(after.masks.is_empty());
    assert!(after.selected.is_none());
    assert!(after.results.is_empty());
    assert!(after.cropped.is_none());
    assert!(session.render().is_none());
}

#[tokio::test]
async fn click_on_empty_cell_sends_nothing() {
    let mut server = Server::new_async().await;
    let _segment = mock_segment(&mut server).await;
    let crop = server
        .mock("POST", "/crop_bbox")
        .expect(0)
        .create_async()
        .await;
    let session = session(&server);

    session.upload(room()).await.unwrap();
    let outcome = session
        .select_at_canvas(CanvasPoint::pixel_center(100, 100))
        .await
        .unwrap();
    assert_eq!(outcome, None);
    assert!(session.snapshot().selected.is_none());
    crop.assert_async().await;
}

#[tokio::test]
async fn click_before_upload_is_ignored() {
    let server = Server::new_async().await;
    let session = session(&server);
    let outcome = session.select_at_canvas(CanvasPoint::new(10.0, 10.0)).await.unwrap();
    assert_eq!(outcome, None);
}

#[tokio::test]
async fn segmentation_failure_keeps_image() {
    let mut server = Server::new_async().await;
    let _segment = server
        .mock("POST", "/segment")
        .with_status(500)
        .with_body("model exploded")
        .create_async()
        .await;
    let session = session(&server);

    let err = session.upload(room()).await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Segmentation));
    let message = err.to_string();
    assert!(message.starts_with("Segmentation failed"), "{}", message);
    assert!(message.contains("model exploded"), "{}", message);

    let snapshot = session.snapshot();
    assert!(snapshot.image_path.is_some());
    assert!(snapshot.masks.is_empty());
}

#[tokio::test]
async fn crop_failure_abandons_search_but_keeps_masks() {
    let mut server = Server::new_async().await;
    let _segment = mock_segment(&mut server).await;
    let _crop = server
        .mock("POST", "/crop_bbox")
        .with_status(422)
        .with_body("bad box")
        .create_async()
        .await;
    let embed = server
        .mock("POST", "/embed_siglip")
        .expect(0)
        .create_async()
        .await;
    let session = session(&server);

    session.upload(room()).await.unwrap();
    let err = session.select("m0").await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Search));
    assert!(err.to_string().contains("bad box"));
    embed.assert_async().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.masks.len(), 1);
    assert_eq!(snapshot.selected.map(|m| m.id), Some("m0".to_string()));
    assert!(snapshot.results.is_empty());
    assert!(snapshot.cropped.is_none());
}

#[tokio::test]
async fn malformed_segmentation_body_is_reported() {
    let mut server = Server::new_async().await;
    let _segment = server
        .mock("POST", "/segment")
        .with_status(200)
        .with_body("<html>proxy error</html>")
        .create_async()
        .await;
    let session = session(&server);

    let err = session.upload(room()).await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Segmentation));
    assert!(err.to_string().contains("JSON error"));
}
