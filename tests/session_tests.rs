//! Integration tests for the document session over the mock rasterizer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::TempDir;

use folio::render::testdoc::{TestDocBuilder, TestRasterizer};
use folio::{DocumentSession, MaterializePolicy, SessionConfig, SessionError};

fn session_with(rasterizer: TestRasterizer, tmp: &TempDir) -> DocumentSession {
    let config = SessionConfig {
        artifact_root: tmp.path().join("artifacts"),
        ..SessionConfig::default()
    };
    DocumentSession::new(Arc::new(rasterizer), config)
}

fn write_doc(tmp: &TempDir, name: &str, builder: &TestDocBuilder) -> PathBuf {
    let path = tmp.path().join(name);
    builder.write_to(&path).unwrap();
    path
}

#[test]
fn open_then_render_every_page() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);
    let doc = write_doc(&tmp, "five.mock", &TestDocBuilder::new(5));

    let info = session.open_document(&doc).unwrap();
    assert_eq!(info.page_count, 5);
    assert_eq!(info.file_name, "five.mock");

    for page in 1..=5 {
        let small = session.get_page(page, 1.0).unwrap();
        assert!(!small.png.is_empty());
        assert!(small.width > 0 && small.height > 0);

        let large = session.get_page(page, 2.0).unwrap();
        assert!(large.width > small.width);
        assert!(large.height > small.height);
    }
}

#[test]
fn repeated_requests_return_byte_identical_artifacts() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(3));
    session.open_document(&doc).unwrap();

    let first = session.get_page(2, 1.5).unwrap();
    let second = session.get_page(2, 1.5).unwrap();
    assert_eq!(first.png, second.png);
}

#[test]
fn page_numbers_outside_range_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(5));
    session.open_document(&doc).unwrap();

    assert!(matches!(
        session.get_page(0, 1.0),
        Err(SessionError::InvalidPage { page: 0, page_count: 5 })
    ));
    assert!(matches!(
        session.get_page(6, 1.0),
        Err(SessionError::InvalidPage { page: 6, page_count: 5 })
    ));
}

#[test]
fn get_page_without_document_fails() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);

    assert!(matches!(
        session.get_page(1, 1.0),
        Err(SessionError::NoDocument)
    ));
}

#[test]
fn open_missing_path_leaves_session_empty() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);

    let missing = tmp.path().join("nope.mock");
    assert!(matches!(
        session.open_document(&missing),
        Err(SessionError::NotFound { .. })
    ));
    assert!(matches!(
        session.get_page(1, 1.0),
        Err(SessionError::NoDocument)
    ));
}

#[test]
fn open_garbage_is_a_parse_error() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);

    let path = tmp.path().join("garbage.bin");
    std::fs::write(&path, b"definitely not a document").unwrap();

    assert!(matches!(
        session.open_document(&path),
        Err(SessionError::Parse { .. })
    ));
    assert!(matches!(
        session.get_page(1, 1.0),
        Err(SessionError::NoDocument)
    ));
}

#[test]
fn replacing_a_document_never_serves_stale_artifacts() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);

    let doc_a = write_doc(&tmp, "a.mock", &TestDocBuilder::new(3).size(50, 50));
    let doc_b = write_doc(&tmp, "b.mock", &TestDocBuilder::new(3).size(80, 90));

    session.open_document(&doc_a).unwrap();
    let from_a = session.get_page(1, 1.0).unwrap();
    assert_eq!((from_a.width, from_a.height), (50, 50));
    let handle_a = session.handle().unwrap();

    session.open_document(&doc_b).unwrap();
    let from_b = session.get_page(1, 1.0).unwrap();
    assert_eq!((from_b.width, from_b.height), (80, 90));
    assert_ne!(from_a.png, from_b.png);

    // Operations through the superseded handle fail loudly.
    assert!(matches!(
        session.get_page_for(&handle_a, 1, 1.0),
        Err(SessionError::StaleSession { .. })
    ));
    let handle_b = session.handle().unwrap();
    assert!(session.get_page_for(&handle_b, 1, 1.0).is_ok());
}

#[test]
fn distinct_scales_produce_distinct_cached_artifacts() {
    let tmp = TempDir::new().unwrap();
    let rasterizer = TestRasterizer::new();
    let session = session_with(rasterizer.clone(), &tmp);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(5));
    session.open_document(&doc).unwrap();

    let at_two = session.get_page(3, 2.0).unwrap();
    assert!(at_two.width > 0 && at_two.height > 0);

    let at_one = session.get_page(3, 1.0).unwrap();
    assert_ne!(at_one.png, at_two.png);
    assert_ne!((at_one.width, at_one.height), (at_two.width, at_two.height));

    // Asking for scale 2.0 again hits the cache rather than re-rendering.
    let again = session.get_page(3, 2.0).unwrap();
    assert_eq!(again.png, at_two.png);
    assert_eq!(rasterizer.render_count(3), 2);
}

#[test]
#[serial]
fn concurrent_requests_for_one_page_render_once() {
    let tmp = TempDir::new().unwrap();
    let rasterizer = TestRasterizer::with_delay(Duration::from_millis(150));
    let session = Arc::new(session_with(rasterizer.clone(), &tmp));
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(3));
    session.open_document(&doc).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        (0..2)
            .map(|_| {
                let session = Arc::clone(&session);
                scope.spawn(move || session.get_page(2, 1.0))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect()
    });

    let artifacts: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(artifacts[0].png, artifacts[1].png);
    assert_eq!(rasterizer.render_count(2), 1);
}

#[test]
#[serial]
fn close_cancels_outstanding_jobs_promptly() {
    let tmp = TempDir::new().unwrap();
    let rasterizer = TestRasterizer::with_delay(Duration::from_millis(500));
    let session = Arc::new(session_with(rasterizer, &tmp));
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(6));
    session.open_document(&doc).unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=3)
            .map(|page| {
                let session = Arc::clone(&session);
                scope.spawn(move || session.get_page(page, 1.0))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        session.close();
        assert!(started.elapsed() < Duration::from_secs(2));

        for handle in handles {
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(SessionError::Cancelled)));
        }
    });

    // Close is idempotent and leaves the session empty.
    session.close();
    assert!(matches!(
        session.get_page(1, 1.0),
        Err(SessionError::NoDocument)
    ));
}

#[test]
fn worker_open_panic_fails_jobs_instead_of_hanging() {
    let tmp = TempDir::new().unwrap();
    // First open (session validation) succeeds; the single worker's own
    // open panics, so nothing will ever render.
    let rasterizer = TestRasterizer::with_open_panic_after(1);
    let config = SessionConfig {
        workers: 1,
        artifact_root: tmp.path().join("artifacts"),
        ..SessionConfig::default()
    };
    let session = DocumentSession::new(Arc::new(rasterizer), config);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(2));
    session.open_document(&doc).unwrap();

    let started = Instant::now();
    let result = session.get_page(1, 1.0);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "job on a document-less worker must resolve promptly"
    );
    match result {
        Err(SessionError::Render { page: 1, detail }) => {
            assert!(detail.contains("panicked"), "unexpected detail: {detail}");
        }
        other => panic!("expected render error, got {other:?}"),
    }
}

#[test]
fn sub_minimum_scales_are_clamped() {
    let tmp = TempDir::new().unwrap();
    let rasterizer = TestRasterizer::new();
    let session = session_with(rasterizer.clone(), &tmp);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(2));
    session.open_document(&doc).unwrap();

    let tiny = session.get_page(1, 0.05).unwrap();
    assert!((tiny.scale - folio::session::MIN_SCALE).abs() < 1e-6);

    // Both requests land on the same cache entry.
    let at_min = session.get_page(1, folio::session::MIN_SCALE).unwrap();
    assert_eq!(tiny.png, at_min.png);
    assert_eq!(rasterizer.render_count(1), 1);
}

#[test]
fn rasterizer_panic_is_contained_to_one_job() {
    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);
    let doc = write_doc(&tmp, "doc.mock", &TestDocBuilder::new(3).panic_page(2));
    session.open_document(&doc).unwrap();

    let failure = session.get_page(2, 1.0);
    match failure {
        Err(SessionError::Render { page: 2, detail }) => {
            assert!(detail.contains("panicked"), "unexpected detail: {detail}");
        }
        other => panic!("expected render error, got {other:?}"),
    }

    // The session keeps serving other pages afterwards.
    assert!(session.get_page(1, 1.0).is_ok());
    assert!(session.get_page(3, 1.0).is_ok());
}

#[test]
#[serial]
fn open_while_another_open_is_loading_is_busy() {
    let tmp = TempDir::new().unwrap();
    let rasterizer = TestRasterizer::with_delay(Duration::from_millis(100));
    let config = SessionConfig {
        artifact_root: tmp.path().join("artifacts"),
        materialize: MaterializePolicy::EagerBlocking { scale: 1.0 },
        ..SessionConfig::default()
    };
    let session = Arc::new(DocumentSession::new(Arc::new(rasterizer), config));

    let slow = write_doc(&tmp, "slow.mock", &TestDocBuilder::new(10));
    let other = write_doc(&tmp, "other.mock", &TestDocBuilder::new(2));

    std::thread::scope(|scope| {
        let first = {
            let session = Arc::clone(&session);
            let slow = slow.clone();
            scope.spawn(move || session.open_document(&slow))
        };

        std::thread::sleep(Duration::from_millis(150));
        assert!(matches!(
            session.open_document(&other),
            Err(SessionError::Busy)
        ));

        assert!(first.join().unwrap().is_ok());
    });

    // Once the first open settles, the session accepts a new document.
    let info = session.open_document(&other).unwrap();
    assert_eq!(info.page_count, 2);
}

#[test]
fn external_api_round_trip() {
    use base64::Engine as _;

    let tmp = TempDir::new().unwrap();
    let session = session_with(TestRasterizer::new(), &tmp);
    let doc = write_doc(&tmp, "report.mock", &TestDocBuilder::new(2));

    let opened = folio::api::open_document(&session, &doc);
    assert!(opened.success);
    assert_eq!(opened.num_pages, 2);
    assert_eq!(opened.file_name, "report.mock");

    let page = folio::api::get_page(&session, 1, None);
    assert!(page.success);
    assert!(page.width > 0 && page.height > 0);
    let png = base64::engine::general_purpose::STANDARD
        .decode(page.image_data.unwrap())
        .unwrap();
    assert!(!png.is_empty());

    let bad = folio::api::get_page(&session, 99, Some(1.0));
    assert!(!bad.success);
    let error = bad.error.unwrap();
    assert!(error.starts_with("InvalidPage"), "unexpected error: {error}");
}
