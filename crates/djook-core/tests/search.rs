use async_trait::async_trait;
use bytes::Bytes;
use djook_core::{
    CancelToken, ComparisonRequest, FaceComparer, FaceMatch, PersonSearch, RecognitionServiceError,
    ReferenceDataset, ReferencePerson, SearchError, SearchOptions, TargetImage,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn png(shade: u8) -> Bytes {
    let img = RgbImage::from_pixel(4, 4, Rgb([shade, shade, shade]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

fn dataset(names: &[(&str, u8)]) -> Arc<ReferenceDataset> {
    let persons = names
        .iter()
        .map(|&(name, shade)| ReferencePerson {
            name: name.into(),
            image: png(shade),
        })
        .collect();
    Arc::new(ReferenceDataset::from_persons(persons).unwrap())
}

fn target() -> TargetImage {
    TargetImage::from_bytes(png(255)).unwrap()
}

fn face(similarity: f32) -> FaceMatch {
    FaceMatch {
        similarity,
        confidence: Some(99.9),
        bounding_box: None,
    }
}

#[derive(Clone)]
enum Reply {
    Match(f32),
    NoMatch,
    Fail,
}

/// Answers by source image, with a per-source delay to shuffle completion
/// order.
struct StubComparer {
    replies: HashMap<Bytes, (Reply, Duration)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Calls that returned a reply (not aborted mid-flight).
    completed: AtomicUsize,
    thresholds: Mutex<Vec<f32>>,
}

impl StubComparer {
    fn new(replies: Vec<(Bytes, Reply, u64)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .into_iter()
                .map(|(image, reply, delay_ms)| (image, (reply, Duration::from_millis(delay_ms))))
                .collect(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            thresholds: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FaceComparer for StubComparer {
    async fn compare(
        &self,
        request: ComparisonRequest,
    ) -> Result<Vec<FaceMatch>, RecognitionServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.thresholds.lock().unwrap().push(request.similarity_threshold);

        let (reply, delay) = self
            .replies
            .get(&request.source_image)
            .cloned()
            .unwrap_or((Reply::NoMatch, Duration::ZERO));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        match reply {
            Reply::Match(similarity) if similarity >= request.similarity_threshold => {
                Ok(vec![face(similarity)])
            }
            Reply::Match(_) | Reply::NoMatch => Ok(vec![]),
            Reply::Fail => Err(RecognitionServiceError::Rejected {
                status: 400,
                code: "InvalidParameterException".into(),
                message: "Request has invalid parameters".into(),
            }),
        }
    }
}

fn search(dataset: Arc<ReferenceDataset>, comparer: Arc<StubComparer>) -> PersonSearch {
    PersonSearch::new(dataset, comparer, SearchOptions::default())
}

#[tokio::test]
async fn test_empty_dataset_returns_empty() {
    let comparer = StubComparer::new(vec![]);
    let search = search(Arc::new(ReferenceDataset::default()), comparer.clone());
    let result = search.search(&target(), None).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_matches_returns_empty() {
    let comparer = StubComparer::new(vec![]);
    let search = search(dataset(&[("A", 1), ("B", 2), ("C", 3)]), comparer.clone());
    let result = search.search(&target(), None).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_result_follows_dataset_order_not_completion_order() {
    // C finishes first, A last.
    let comparer = StubComparer::new(vec![
        (png(1), Reply::Match(95.0), 60),
        (png(2), Reply::NoMatch, 30),
        (png(3), Reply::Match(99.0), 1),
    ]);
    let search = search(dataset(&[("A", 1), ("B", 2), ("C", 3)]), comparer);
    let result = search.search(&target(), None).await.unwrap();
    assert_eq!(result.names(), &["A", "C"]);
}

#[tokio::test]
async fn test_any_failure_fails_whole_search() {
    let comparer = StubComparer::new(vec![
        (png(1), Reply::Match(95.0), 1),
        (png(2), Reply::Fail, 20),
        (png(3), Reply::Match(95.0), 1),
    ]);
    let search = search(dataset(&[("A", 1), ("B", 2), ("C", 3)]), comparer);
    let err = search.search(&target(), None).await.unwrap_err();
    match err {
        SearchError::Recognition { person, source } => {
            assert_eq!(person, "B");
            assert!(matches!(source, RecognitionServiceError::Rejected { status: 400, .. }));
        }
        other => panic!("expected recognition error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_search_is_idempotent() {
    let comparer = StubComparer::new(vec![(png(2), Reply::Match(92.0), 5)]);
    let search = search(dataset(&[("A", 1), ("B", 2)]), comparer);
    let first = search.search(&target(), None).await.unwrap();
    let second = search.search(&target(), None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.names(), &["B"]);
}

#[tokio::test]
async fn test_angel_found_putra_absent() {
    let comparer = StubComparer::new(vec![
        (png(10), Reply::Match(95.0), 5),
        (png(20), Reply::NoMatch, 5),
    ]);
    let search = search(dataset(&[("Angel", 10), ("Putra", 20)]), comparer);
    let result = search.search(&target(), None).await.unwrap();
    assert_eq!(result.names(), &["Angel"]);
}

#[tokio::test]
async fn test_neither_angel_nor_putra() {
    let comparer = StubComparer::new(vec![
        (png(10), Reply::Match(42.0), 1),
        (png(20), Reply::NoMatch, 1),
    ]);
    let search = search(dataset(&[("Angel", 10), ("Putra", 20)]), comparer);
    let result = search.search(&target(), None).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_putra_failure_discards_angel_match() {
    let comparer = StubComparer::new(vec![
        (png(10), Reply::Match(95.0), 1),
        (png(20), Reply::Fail, 10),
    ]);
    let search = search(dataset(&[("Angel", 10), ("Putra", 20)]), comparer);
    let err = search.search(&target(), None).await.unwrap_err();
    assert!(matches!(err, SearchError::Recognition { ref person, .. } if person == "Putra"));
}

#[tokio::test]
async fn test_threshold_passed_to_every_comparison() {
    let comparer = StubComparer::new(vec![(png(1), Reply::Match(85.0), 0)]);
    let options = SearchOptions {
        similarity_threshold: 80.0,
        ..SearchOptions::default()
    };
    let search = PersonSearch::new(dataset(&[("A", 1), ("B", 2)]), comparer.clone(), options);
    let result = search.search(&target(), None).await.unwrap();
    assert_eq!(result.names(), &["A"]);
    assert_eq!(*comparer.thresholds.lock().unwrap(), vec![80.0, 80.0]);
}

#[tokio::test]
async fn test_per_request_concurrency_bound() {
    let replies = (1..=6).map(|i| (png(i), Reply::NoMatch, 20)).collect();
    let comparer = StubComparer::new(replies);
    let options = SearchOptions {
        max_concurrent_per_request: 2,
        ..SearchOptions::default()
    };
    let names: Vec<(String, u8)> = (1..=6).map(|i| (format!("P{i}"), i)).collect();
    let names: Vec<(&str, u8)> = names.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    let search = PersonSearch::new(dataset(&names), comparer.clone(), options);

    search.search(&target(), None).await.unwrap();
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 6);
    assert!(comparer.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let comparer = StubComparer::new(vec![]);
    let search = search(dataset(&[("A", 1)]), comparer.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = search.search(&target(), Some(&cancel)).await.unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_stops_pending_comparisons() {
    let comparer = StubComparer::new(vec![
        (png(1), Reply::NoMatch, 50),
        (png(2), Reply::NoMatch, 50),
        (png(3), Reply::NoMatch, 50),
    ]);
    let options = SearchOptions {
        max_concurrent_per_request: 1,
        ..SearchOptions::default()
    };
    let search = PersonSearch::new(dataset(&[("A", 1), ("B", 2), ("C", 3)]), comparer.clone(), options);
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = search.search(&target(), Some(&cancel)).await.unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    // The first call was already in flight; nothing new started after cancel.
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_compare_all_reports_every_person() {
    let comparer = StubComparer::new(vec![(png(2), Reply::Match(97.0), 0)]);
    let search = search(dataset(&[("A", 1), ("B", 2)]), comparer);
    let results = search.compare_all(&target(), None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].person_name, "A");
    assert!(!results[0].is_match());
    assert_eq!(results[1].best_similarity(), Some(97.0));
}

#[tokio::test]
async fn test_global_concurrency_bound_across_searches() {
    let replies = (1..=3).map(|i| (png(i), Reply::NoMatch, 20)).collect();
    let comparer = StubComparer::new(replies);
    let options = SearchOptions {
        max_concurrent_global: 2,
        ..SearchOptions::default()
    };
    let search = Arc::new(PersonSearch::new(
        dataset(&[("A", 1), ("B", 2), ("C", 3)]),
        comparer.clone(),
        options,
    ));

    let runs: Vec<_> = (0..3)
        .map(|_| {
            let search = Arc::clone(&search);
            tokio::spawn(async move { search.search(&target(), None).await })
        })
        .collect();
    for run in runs {
        assert!(run.await.unwrap().unwrap().is_empty());
    }

    assert_eq!(comparer.calls.load(Ordering::SeqCst), 9);
    assert!(comparer.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_failure_aborts_slower_comparisons() {
    let comparer = StubComparer::new(vec![
        (png(1), Reply::NoMatch, 300),
        (png(2), Reply::Fail, 10),
        (png(3), Reply::Match(99.0), 300),
    ]);
    let search = search(dataset(&[("A", 1), ("B", 2), ("C", 3)]), comparer.clone());

    let started = Instant::now();
    let err = search.search(&target(), None).await.unwrap_err();
    assert!(matches!(err, SearchError::Recognition { ref person, .. } if person == "B"));
    assert!(started.elapsed() < Duration::from_millis(200), "{:?}", started.elapsed());

    // Past the point the slow siblings would have replied.
    tokio::time::sleep(Duration::from_millis(400)).await;
    // Only the failing call ran to completion.
    assert_eq!(comparer.completed.load(Ordering::SeqCst), 1);
    assert_eq!(comparer.calls.load(Ordering::SeqCst), 3);
}
