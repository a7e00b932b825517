//! End-to-end composition workflows against in-process test doubles

use backdrop_studio::backends::test_utils::{
    decode_data_uri_image, disc_alpha, png_bytes, MockResponse, MockSegmenter, MockTransport,
};
use backdrop_studio::{
    compose_from_bytes, prepare_from_bytes, BackdropKeySegmenter, BackendCandidate, BackendFamily,
    CompositionRequest, FailureCategory, FailureKind, FluxFillAdapter, ImageIOService, SdxlAdapter,
    SegmenterConfig, SourceImage, StudioConfig, StudioError, StudioPipeline,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;
use tempfile::TempDir;

/// Dark product square on a light backdrop
fn product_on_backdrop(width: u32, height: u32) -> SourceImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let inside = x > width / 4 && x < width * 3 / 4 && y > height / 4 && y < height * 3 / 4;
        if inside {
            Rgb([60, 30, 20])
        } else {
            Rgb([250, 250, 250])
        }
    });
    SourceImage::new(&DynamicImage::ImageRgb8(img)).unwrap()
}

fn config(target_size: u32) -> StudioConfig {
    StudioConfig::builder().target_size(target_size).build().unwrap()
}

#[tokio::test]
async fn test_compose_with_fallback_and_download() {
    let result_png = png_bytes(64, 64, [10, 120, 10]);
    let transport = Arc::new(
        MockTransport::new()
            .respond(
                &SdxlAdapter::default_model(),
                MockResponse::Fail(FailureKind::HttpStatus(429), "rate limited".into()),
            )
            .respond(
                &FluxFillAdapter::default_model(),
                MockResponse::url("https://cdn.example/scene.png"),
            )
            .with_download("https://cdn.example/scene.png", result_png.clone()),
    );
    let segmenter = Arc::new(MockSegmenter::with_alpha(disc_alpha(64, (32, 32), 12)));
    let pipeline = StudioPipeline::new(config(64), segmenter.clone(), transport.clone()).unwrap();

    let result = pipeline
        .compose(
            &product_on_backdrop(120, 80),
            &CompositionRequest::new("ceramic vase", "concrete-botanical"),
        )
        .await
        .unwrap();

    assert_eq!(result.outcome.backend, "flux-fill");
    assert_eq!(result.outcome.failures.len(), 1);
    assert_eq!(result.outcome.failures[0].kind, FailureKind::HttpStatus(429));
    assert_eq!(segmenter.get_call_history(), vec!["segment 64x64".to_string()]);

    // Both attempts got the same canvas and mask
    let inputs = transport.get_inputs();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0]["image"], inputs[1]["image"]);
    assert_eq!(inputs[0]["mask"], inputs[1]["mask"]);
    let mask = decode_data_uri_image(&inputs[1]["mask"]).to_luma8();
    assert_eq!(mask.get_pixel(32, 32).0[0], 0);
    assert_eq!(mask.get_pixel(0, 0).0[0], 255);

    let downloaded = pipeline.fetch_result(&result.outcome).await.unwrap();
    assert_eq!(downloaded, result_png);
    assert!(result.timings.total_ms >= result.timings.generation_ms);
}

#[tokio::test]
async fn test_segmentation_failure_stops_before_generation() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = StudioPipeline::new(
        config(32),
        Arc::new(MockSegmenter::failing("background removal service unavailable")),
        transport.clone(),
    )
    .unwrap();

    let err = pipeline
        .compose(&product_on_backdrop(40, 40), &CompositionRequest::new("lamp", "marble"))
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::Segmentation(_)));
    assert_eq!(err.category(), FailureCategory::IsolationFailed);
    assert!(transport.get_call_history().is_empty());
}

#[tokio::test]
async fn test_backdrop_key_segmenter_end_to_end() {
    let transport = Arc::new(
        MockTransport::new().respond(
            &SdxlAdapter::default_model(),
            MockResponse::url("https://cdn.example/out.png"),
        ),
    );
    let pipeline = StudioPipeline::new(
        config(64),
        Arc::new(BackdropKeySegmenter::default()),
        transport.clone(),
    )
    .unwrap();

    let prepared = pipeline.prepare(&product_on_backdrop(64, 64)).await.unwrap();
    assert_eq!(prepared.mask.get(32, 32), 0);
    assert_eq!(prepared.mask.get(2, 2), 255);
    assert!(prepared.mask.preserved_pixels() > 0);
    assert!(transport.get_call_history().is_empty());
}

#[tokio::test]
async fn test_prepare_from_bytes_and_save() {
    let dir = TempDir::new().unwrap();
    let upload = ImageIOService::encode_png(&DynamicImage::ImageRgb8(
        product_on_backdrop(90, 45).pixels().clone(),
    ))
    .unwrap();

    let prepared = prepare_from_bytes(&upload, &config(96)).await.unwrap();
    assert_eq!(prepared.canvas.content_region(), (0, 24, 96, 48));

    let canvas_path = dir.path().join("out").join("canvas.png");
    let mask_path = dir.path().join("out").join("mask.png");
    ImageIOService::save_image(&prepared.canvas.clone().into_image(), &canvas_path).unwrap();
    ImageIOService::save_image(
        &DynamicImage::ImageLuma8(prepared.mask.data().clone()),
        &mask_path,
    )
    .unwrap();

    let reloaded = image::open(&mask_path).unwrap().to_luma8();
    assert_eq!(reloaded.dimensions(), (96, 96));
    assert_eq!(reloaded, *prepared.mask.data());
}

#[tokio::test]
async fn test_default_preparation_keys_out_a_coloured_backdrop() {
    // Grey studio backdrop, red product, portrait upload
    let photo = RgbImage::from_fn(400, 800, |x, y| {
        if (100..300).contains(&x) && (300..500).contains(&y) {
            Rgb([220, 30, 30])
        } else {
            Rgb([120, 120, 120])
        }
    });
    let upload = ImageIOService::encode_png(&DynamicImage::ImageRgb8(photo)).unwrap();

    let prepared = prepare_from_bytes(&upload, &StudioConfig::default()).await.unwrap();
    let mask = &prepared.mask;
    assert_eq!(prepared.canvas.content_region(), (256, 0, 512, 1024));

    // Product kept, photo backdrop and padding regenerated
    assert_eq!(mask.get(512, 512), 0);
    assert_eq!(mask.get(300, 100), 255);
    assert_eq!(mask.get(700, 900), 255);
    assert_eq!(mask.get(10, 512), 255);

    // About the 256x256 scaled product, far from the 512x1024 photo band
    let preserved = mask.preserved_pixels();
    assert!((60_000..75_000).contains(&preserved), "preserved {}", preserved);
}

#[tokio::test]
async fn test_compose_from_bytes_fails_fast_without_token() {
    let upload = png_bytes(16, 16, [0, 0, 0]);
    let request = CompositionRequest::new("vase", "marble");

    let err = compose_from_bytes(&upload, &request, &StudioConfig::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::MissingCredential(_)));
    assert_eq!(err.category(), FailureCategory::Configuration);
    assert!(err.user_message().contains("not configured"));
}

#[tokio::test]
async fn test_custom_candidate_order_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("studio.json");
    StudioConfig::builder()
        .target_size(32)
        .candidates(vec![BackendCandidate::new(BackendFamily::FluxFill)])
        .segmenter(SegmenterConfig::BackdropKey { tolerance: 10.0 })
        .build()
        .unwrap()
        .to_json_file(&path)
        .unwrap();
    let loaded = StudioConfig::from_json_file(&path).unwrap();

    let transport = Arc::new(
        MockTransport::new().respond(
            &FluxFillAdapter::default_model(),
            MockResponse::url("https://cdn.example/flux.png"),
        ),
    );
    let pipeline = StudioPipeline::new(
        loaded,
        Arc::new(MockSegmenter::with_alpha(disc_alpha(32, (16, 16), 6))),
        transport.clone(),
    )
    .unwrap();
    let result = pipeline
        .compose(
            &product_on_backdrop(32, 32),
            &CompositionRequest::with_prompt("a bottle on a beach at sunset"),
        )
        .await
        .unwrap();

    assert_eq!(result.outcome.backend, "flux-fill");
    assert_eq!(result.prompt, "a bottle on a beach at sunset");
    assert_eq!(transport.get_inputs()[0]["prompt"], "a bottle on a beach at sunset");
}
