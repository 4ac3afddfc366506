//! Paginated ingestion pipeline.
//!
//! Pages through the provider strictly sequentially, transforms each record,
//! and either accumulates a bounded result (bulk mode) or hands out each
//! page's points as a chunk (streaming mode).
//!
//! Termination, in both modes:
//! - the point budget (`max_points`) is exhausted
//! - a page comes back empty, or shorter than the page size
//! - a page fetch fails (whatever was gathered so far is kept)

use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{FetchParameters, GwpHorizon, NormalizedPoint};
use crate::services::trace::{FetchError, PageFetcher};
use crate::services::transform::RecordTransformer;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Records requested per provider page.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Politeness delay between page fetches in bulk mode (milliseconds).
const BULK_PAGE_DELAY_MS: u64 = 200;

/// Politeness delay between page fetches in streaming mode (milliseconds).
const STREAM_PAGE_DELAY_MS: u64 = 150;

/// Tuning for the pipeline's pagination.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub page_size: usize,
    pub bulk_delay: Duration,
    pub stream_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            bulk_delay: Duration::from_millis(BULK_PAGE_DELAY_MS),
            stream_delay: Duration::from_millis(STREAM_PAGE_DELAY_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// Single page step
// ---------------------------------------------------------------------------

/// Outcome of fetching and transforming one page.
enum PageOutcome {
    /// The provider returned records; `raw_count` counts them before discards.
    Page {
        points: Vec<NormalizedPoint>,
        raw_count: usize,
    },
    /// The provider returned zero records.
    Exhausted,
    Failed(FetchError),
}

async fn fetch_page_points<F: PageFetcher>(
    fetcher: &F,
    transformer: RecordTransformer,
    offset: usize,
    limit: usize,
    year: Option<i32>,
) -> PageOutcome {
    let page = match fetcher.fetch_page(offset, limit, year).await {
        Ok(page) => page,
        Err(e) => return PageOutcome::Failed(e),
    };
    if page.is_empty() {
        return PageOutcome::Exhausted;
    }

    let mut points = Vec::with_capacity(page.len());
    let mut discarded = 0usize;
    for raw in page.records() {
        match transformer.transform(raw) {
            Ok(point) => points.push(point),
            Err(e) => {
                discarded += 1;
                tracing::trace!("Discarding record at offset {}: {}", offset, e);
            }
        }
    }

    tracing::debug!(
        "Page at offset {}: {} records, {} points, {} discarded",
        offset,
        page.len(),
        points.len(),
        discarded
    );

    PageOutcome::Page {
        points,
        raw_count: page.len(),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives a [`PageFetcher`] across successive offsets.
pub struct IngestionPipeline<F> {
    fetcher: Arc<F>,
    config: PipelineConfig,
}

impl<F: PageFetcher + 'static> IngestionPipeline<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_config(fetcher, PipelineConfig::default())
    }

    pub fn with_config(fetcher: F, config: PipelineConfig) -> Self {
        let page_size = config.page_size.max(1);
        Self {
            fetcher: Arc::new(fetcher),
            config: PipelineConfig {
                page_size,
                ..config
            },
        }
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Bulk mode: accumulate up to `params.max_points` points.
    ///
    /// Never fails; a fetch error ends pagination and returns the points
    /// gathered so far.
    pub async fn collect(&self, params: &FetchParameters) -> Vec<NormalizedPoint> {
        let transformer = RecordTransformer::new(params.horizon);
        let page_size = self.config.page_size;
        let mut points: Vec<NormalizedPoint> = Vec::new();
        let mut offset = 0usize;
        let mut pages = 0usize;

        while points.len() < params.max_points {
            if pages > 0 {
                tokio::time::sleep(self.config.bulk_delay).await;
            }
            pages += 1;

            match fetch_page_points(
                self.fetcher.as_ref(),
                transformer,
                offset,
                page_size,
                params.year,
            )
            .await
            {
                PageOutcome::Failed(e) => {
                    tracing::warn!(
                        "Stopping pagination at offset {} after fetch error: {}",
                        offset,
                        e
                    );
                    break;
                }
                PageOutcome::Exhausted => break,
                PageOutcome::Page {
                    points: page_points,
                    raw_count,
                } => {
                    let remaining = params.max_points - points.len();
                    points.extend(page_points.into_iter().take(remaining));
                    if raw_count < page_size {
                        break;
                    }
                    offset += page_size;
                }
            }
        }

        tracing::info!(
            "Collected {} points from {} page(s) (max_points={}, year={:?}, gwp={}yr)",
            points.len(),
            pages,
            params.max_points,
            params.year,
            params.horizon.years()
        );

        points
    }

    /// Streaming mode: a lazy sequence of per-page chunks.
    ///
    /// Pages of `chunk_size` records are requested while the offset is below
    /// `max_points`; at most `max_points` points are emitted in total.
    pub fn stream(&self, params: &FetchParameters, chunk_size: usize) -> PointStream<F> {
        PointStream {
            fetcher: Arc::clone(&self.fetcher),
            transformer: RecordTransformer::new(params.horizon),
            max_points: params.max_points,
            year: params.year,
            horizon: params.horizon,
            chunk_size: chunk_size.max(1),
            delay: self.config.stream_delay,
            offset: 0,
            pages: 0,
            emitted: 0,
            exhausted: false,
            finished: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Pull-based producer of point chunks, one provider page at a time.
///
/// Finite and not restartable: once [`PointStream::next_chunk`] returns
/// `None` it keeps returning `None`.
pub struct PointStream<F> {
    fetcher: Arc<F>,
    transformer: RecordTransformer,
    max_points: usize,
    year: Option<i32>,
    horizon: GwpHorizon,
    chunk_size: usize,
    delay: Duration,
    offset: usize,
    pages: usize,
    emitted: usize,
    /// No further pages will be requested.
    exhausted: bool,
    /// The sequence has ended and will only yield `None`.
    finished: bool,
}

impl<F: PageFetcher + 'static> PointStream<F> {
    /// Produce the next non-empty chunk, or `None` at end of data.
    ///
    /// Fetch errors end the sequence silently.
    pub async fn next_chunk(&mut self) -> Option<Vec<NormalizedPoint>> {
        loop {
            if self.finished {
                return None;
            }
            if self.exhausted || self.offset >= self.max_points || self.emitted >= self.max_points {
                self.finish();
                return None;
            }

            if self.pages > 0 {
                tokio::time::sleep(self.delay).await;
            }
            self.pages += 1;

            let outcome = fetch_page_points(
                self.fetcher.as_ref(),
                self.transformer,
                self.offset,
                self.chunk_size,
                self.year,
            )
            .await;

            match outcome {
                PageOutcome::Failed(e) => {
                    tracing::warn!(
                        "Ending stream at offset {} after fetch error: {}",
                        self.offset,
                        e
                    );
                    self.finish();
                    return None;
                }
                PageOutcome::Exhausted => {
                    self.finish();
                    return None;
                }
                PageOutcome::Page {
                    mut points,
                    raw_count,
                } => {
                    if raw_count < self.chunk_size {
                        self.exhausted = true;
                    } else {
                        self.offset += self.chunk_size;
                    }

                    points.truncate(self.max_points - self.emitted);
                    if points.is_empty() {
                        continue;
                    }
                    self.emitted += points.len();
                    return Some(points);
                }
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        tracing::info!(
            "Stream complete: {} points from {} page(s) (max_points={}, year={:?}, gwp={}yr)",
            self.emitted,
            self.pages,
            self.max_points,
            self.year,
            self.horizon.years()
        );
    }

    /// Adapt into a [`Stream`] of chunks for response bodies.
    pub fn into_stream(self) -> impl Stream<Item = Vec<NormalizedPoint>> + Send + 'static {
        futures::stream::unfold(self, |mut s| async move {
            s.next_chunk().await.map(|chunk| (chunk, s))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::trace::RawPage;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// What the scripted provider returns for a given page index.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum ScriptedPage {
        /// `n` valid records.
        Valid(usize),
        /// `n` records with no geometry.
        Invalid(usize),
        Fail,
    }

    /// In-memory provider answering by page index (`offset / limit`).
    /// Pages past the end of the script are empty.
    pub(crate) struct ScriptedFetcher {
        pages: Vec<ScriptedPage>,
        calls: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<(usize, usize, Option<i32>)>>>,
        fetched_at: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(pages: Vec<ScriptedPage>) -> Self {
            Self {
                pages,
                calls: Arc::new(AtomicUsize::new(0)),
                requests: Arc::new(Mutex::new(Vec::new())),
                fetched_at: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Shared call counter, readable after the fetcher is moved.
        pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        pub(crate) fn requests(&self) -> Arc<Mutex<Vec<(usize, usize, Option<i32>)>>> {
            Arc::clone(&self.requests)
        }

        /// When each fetch started, in call order.
        pub(crate) fn fetched_at(&self) -> Arc<Mutex<Vec<Instant>>> {
            Arc::clone(&self.fetched_at)
        }
    }

    pub(crate) fn valid_record(i: usize) -> serde_json::Value {
        serde_json::json!({
            "Name": format!("Source {}", i),
            "Sector": "power",
            "Centroid": { "Geometry": [((i % 360) as f64) - 180.0, 45.0] },
            "EmissionsSummary": [{ "Gas": "co2e_100yr", "EmissionsQuantity": 2.0e6 }]
        })
    }

    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(
            &self,
            offset: usize,
            limit: usize,
            year: Option<i32>,
        ) -> Result<RawPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fetched_at.lock().unwrap().push(Instant::now());
            self.requests.lock().unwrap().push((offset, limit, year));
            match self.pages.get(offset / limit) {
                None => Ok(RawPage::default()),
                Some(ScriptedPage::Fail) => {
                    Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY))
                }
                Some(ScriptedPage::Valid(n)) => {
                    Ok(RawPage::new((0..*n).map(|i| valid_record(offset + i)).collect()))
                }
                Some(ScriptedPage::Invalid(n)) => Ok(RawPage::new(
                    (0..*n)
                        .map(|i| serde_json::json!({ "Name": format!("Broken {}", i) }))
                        .collect(),
                )),
            }
        }
    }

    pub(crate) fn no_delay(page_size: usize) -> PipelineConfig {
        PipelineConfig {
            page_size,
            bulk_delay: Duration::ZERO,
            stream_delay: Duration::ZERO,
        }
    }

    fn params(max_points: usize) -> FetchParameters {
        FetchParameters {
            max_points,
            year: Some(2024),
            horizon: GwpHorizon::Hundred,
        }
    }

    async fn drain<F: PageFetcher + 'static>(mut stream: PointStream<F>) -> Vec<Vec<NormalizedPoint>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_collect_stops_at_max_points() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(5000), Valid(5000), Valid(5000), Valid(2000)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(5000));

        let points = pipeline.collect(&params(12000)).await;
        assert_eq!(points.len(), 12000);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "no page after the budget is met");
    }

    #[tokio::test]
    async fn test_collect_stops_on_short_page() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(5000), Valid(5000), Valid(5000), Valid(2000)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(5000));

        let points = pipeline.collect(&params(50000)).await;
        assert_eq!(points.len(), 17000);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_collect_stops_on_empty_page() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Valid(10)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let points = pipeline.collect(&params(1000)).await;
        assert_eq!(points.len(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collect_returns_partial_on_fetch_error() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Fail, Valid(10), Valid(10), Valid(10)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let points = pipeline.collect(&params(1000)).await;
        assert_eq!(points.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_collect_skips_discarded_records() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Invalid(10), Valid(10), Valid(3)]);
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let points = pipeline.collect(&params(1000)).await;
        assert_eq!(points.len(), 13);
    }

    #[tokio::test]
    async fn test_collect_paginates_sequential_offsets() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Valid(10), Valid(4)]);
        let requests = fetcher.requests();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        pipeline.collect(&params(1000)).await;
        let requests = requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![(0, 10, Some(2024)), (10, 10, Some(2024)), (20, 10, Some(2024))]
        );
    }

    #[tokio::test]
    async fn test_collect_zero_budget_fetches_nothing() {
        let fetcher = ScriptedFetcher::new(vec![ScriptedPage::Valid(10)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        assert!(pipeline.collect(&params(0)).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_one_chunk_per_page() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Valid(10), Valid(5)]);
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let chunks = drain(pipeline.stream(&params(1000), 10)).await;
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_stream_never_yields_empty_chunk() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Invalid(10), Valid(10), Valid(2)]);
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let chunks = drain(pipeline.stream(&params(1000), 10)).await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[tokio::test]
    async fn test_stream_ends_silently_on_fetch_error() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Fail, Valid(10), Valid(10), Valid(10)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let mut stream = pipeline.stream(&params(1000), 10);
        assert_eq!(stream.next_chunk().await.map(|c| c.len()), Some(10));
        assert!(stream.next_chunk().await.is_none());
        assert!(stream.next_chunk().await.is_none(), "stays finished");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_bounded_by_max_points() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10); 10]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        let stream = pipeline.stream(&params(25), 10);
        let chunks: Vec<Vec<NormalizedPoint>> = stream.into_stream().collect().await;
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stream_uses_chunk_size_as_page_limit() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(4), Valid(4), Valid(1)]);
        let requests = fetcher.requests();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(5000));

        let chunks = drain(pipeline.stream(&params(100), 4)).await;
        assert_eq!(chunks.len(), 3);
        let offsets: Vec<usize> = requests.lock().unwrap().iter().map(|r| r.0).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[tokio::test]
    async fn test_stream_zero_budget_fetches_nothing() {
        let fetcher = ScriptedFetcher::new(vec![ScriptedPage::Valid(7)]);
        let calls = fetcher.calls();
        let pipeline = IngestionPipeline::with_config(fetcher, no_delay(10));

        assert!(drain(pipeline.stream(&params(0), 10)).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn delays(bulk_ms: u64, stream_ms: u64) -> PipelineConfig {
        PipelineConfig {
            page_size: 10,
            bulk_delay: Duration::from_millis(bulk_ms),
            stream_delay: Duration::from_millis(stream_ms),
        }
    }

    fn gaps(instants: &[Instant]) -> Vec<Duration> {
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test]
    async fn test_collect_waits_between_pages() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Valid(10), Valid(3)]);
        let fetched_at = fetcher.fetched_at();
        let pipeline = IngestionPipeline::with_config(fetcher, delays(120, 30));

        let start = Instant::now();
        let points = pipeline.collect(&params(1000)).await;
        let elapsed = start.elapsed();
        assert_eq!(points.len(), 23);
        assert!(elapsed >= Duration::from_millis(240), "two delays for three pages, got {:?}", elapsed);

        let fetched_at = fetched_at.lock().unwrap().clone();
        assert_eq!(fetched_at.len(), 3);
        assert!(
            fetched_at[0] - start < Duration::from_millis(120),
            "first page is fetched without waiting"
        );
        for gap in gaps(&fetched_at) {
            assert!(gap >= Duration::from_millis(120), "bulk gap too short: {:?}", gap);
        }
    }

    #[tokio::test]
    async fn test_stream_waits_between_pages() {
        use ScriptedPage::*;
        let fetcher = ScriptedFetcher::new(vec![Valid(10), Valid(10), Valid(3)]);
        let fetched_at = fetcher.fetched_at();
        let pipeline = IngestionPipeline::with_config(fetcher, delays(400, 60));

        let start = Instant::now();
        let chunks = drain(pipeline.stream(&params(1000), 10)).await;
        let elapsed = start.elapsed();
        assert_eq!(chunks.len(), 3);
        assert!(elapsed >= Duration::from_millis(120), "two delays for three pages, got {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "stream uses its own delay, got {:?}", elapsed);

        let fetched_at = fetched_at.lock().unwrap().clone();
        assert_eq!(fetched_at.len(), 3);
        assert!(
            fetched_at[0] - start < Duration::from_millis(60),
            "first page is fetched without waiting"
        );
        for gap in gaps(&fetched_at) {
            assert!(gap >= Duration::from_millis(60), "stream gap too short: {:?}", gap);
        }
    }
}
