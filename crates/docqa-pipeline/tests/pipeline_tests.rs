use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::timeout;

use docqa_core::config::Settings;
use docqa_core::traits::{Embedder, RelevanceScorer, TextGenerator};
use docqa_core::{Error, Result};
use docqa_embed::{FakeEmbedder, LexicalScorer};
use docqa_pipeline::{ModelFactory, PipelineContext};

const PARAGRAPHS: [&str; 12] = [
    "The valley cooperative was founded in 1952 by eleven farming families who pooled their tractors, seed stores and grain silos.",
    "Its first chairman, Tomas Reyes, insisted that every member household receive one vote regardless of acreage or harvest size.",
    "During the drought of 1961 the cooperative dug three deep wells and shared the water by rotating irrigation schedules weekly.",
    "The lighthouse keeper Marguerite Olsen lit the harbour lamp every evening at seven o'clock and logged each passing fishing boat.",
    "Wool from the hill sheep was carded in the old mill by the river, then spun into yarn and sold at the autumn market in town.",
    "A volunteer fire brigade formed in 1974 after a barn fire destroyed two seasons of stored hay and nearly reached the chapel.",
    "The schoolhouse taught arithmetic, geography and music to forty children, with lessons paused each spring for the lambing.",
    "Beekeeping spread after 1980 when a retired painter distributed hives and showed neighbours how to harvest heather honey.",
    "The railway branch line closed in 1988, so produce travelled by lorry to the coast, adding a full day to every delivery.",
    "A solar array installed on the cooperative barn roof in 2011 now covers most of the electricity used by the cold store.",
    "Visitors arrive each August for the harvest festival, which features a ploughing contest, a brass band and a cake auction.",
    "Today the cooperative counts ninety member households and publishes its accounts every quarter in the village newsletter.",
];

const LIGHTHOUSE_QUESTION: &str = "When did the lighthouse keeper Marguerite Olsen light the harbour lamp?";

const FERRY_NOTE: &str =
    "The ferry timetable changed in 1999, when the mainland pier was rebuilt and crossings moved to the north slipway.";

fn document() -> Vec<u8> {
    PARAGRAPHS.join("\n\n").into_bytes()
}

/// Fake embedder that can hold the lighthouse question until released and
/// can slow down every batch.
#[derive(Default)]
struct GatedEmbedder {
    inner: FakeEmbedder,
    closed: Mutex<bool>,
    released: Condvar,
    reached: Notify,
    delay_ms: AtomicU64,
}

impl GatedEmbedder {
    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    fn open(&self) {
        *self.closed.lock().unwrap() = false;
        self.released.notify_all();
    }
}

impl Embedder for GatedEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if texts.iter().any(|t| t == LIGHTHOUSE_QUESTION) {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                self.reached.notify_one();
            }
            while *closed {
                closed = self.released.wait(closed).unwrap();
            }
        }
        self.inner.embed_batch(texts)
    }
}

/// Records prompts; fails with a transient error for the first `fail_first` calls.
#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
    fail_first: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str, _model: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first.load(Ordering::SeqCst) {
            return Err(Error::generation("503 Service Unavailable", true));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("She lit it at seven o'clock.".to_string())
    }
}

#[derive(Default)]
struct CountingFactory {
    embedder: Arc<GatedEmbedder>,
    generator: Arc<RecordingGenerator>,
    embedders: AtomicUsize,
    scorers: AtomicUsize,
    generators: AtomicUsize,
}

impl ModelFactory for CountingFactory {
    fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        self.embedders.fetch_add(1, Ordering::SeqCst);
        Ok(self.embedder.clone())
    }

    fn scorer(&self) -> Result<Arc<dyn RelevanceScorer>> {
        self.scorers.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LexicalScorer))
    }

    fn generator(&self) -> Result<Arc<dyn TextGenerator>> {
        self.generators.fetch_add(1, Ordering::SeqCst);
        Ok(self.generator.clone())
    }
}

fn settings(dir: &TempDir) -> Settings {
    Settings {
        use_fake_models: true,
        index_dir: dir.path().join("index"),
        prompt_path: dir.path().join("prompt.txt"),
        chunk_size: 200,
        chunk_overlap: 20,
        generation_retry_base_ms: 1,
        ..Settings::default()
    }
}

fn context(dir: &TempDir) -> (PipelineContext, Arc<CountingFactory>) {
    let factory = Arc::new(CountingFactory::default());
    let ctx = PipelineContext::new(settings(dir), factory.clone()).expect("context");
    (ctx, factory)
}

#[tokio::test]
async fn ingest_then_ask_uses_the_relevant_fragment() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);

    let report = ctx.ingest("history.txt", &document()).await.expect("ingest");
    assert_eq!(report.fragment_count, 12);

    let status = ctx.status().await;
    assert!(status.document_loaded);
    assert!(status.models_initialized);

    let response = ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
    assert_eq!(response.answer, "She lit it at seven o'clock.");
    assert_eq!(response.sources_used, 5);

    let prompts = factory.generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(PARAGRAPHS[3]));
    assert!(prompts[0].contains(&format!("Question: {LIGHTHOUSE_QUESTION}")));
}

#[tokio::test]
async fn ask_before_ingest_reports_no_document() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, _) = context(&tmp);

    let status = ctx.status().await;
    assert!(!status.document_loaded);
    assert!(!status.models_initialized);

    assert!(matches!(ctx.ask("anything?").await, Err(Error::NoDocumentIngested)));
}

#[tokio::test]
async fn failed_ingest_keeps_previous_index() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    ctx.ingest("history.txt", &document()).await.expect("ingest");

    let err = ctx.ingest("blank.txt", b"   \n\n \t ").await.unwrap_err();
    assert!(matches!(err, Error::EmptyInput(_)));
    assert!(ctx.status().await.document_loaded);

    ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask in memory");
    assert!(factory.generator.prompts.lock().unwrap()[0].contains(PARAGRAPHS[3]));

    // A fresh context sees the same document on disk.
    let (restarted, restarted_factory) = context(&tmp);
    let status = restarted.status().await;
    assert!(status.document_loaded);
    assert!(!status.models_initialized);
    restarted.ask(LIGHTHOUSE_QUESTION).await.expect("ask after restore");
    assert!(restarted_factory.generator.prompts.lock().unwrap()[0].contains(PARAGRAPHS[3]));
}

#[tokio::test]
async fn ingest_validates_uploads_and_questions() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);

    assert!(matches!(ctx.ingest("scan.pdf", b"%PDF-1.7").await, Err(Error::Validation(_))));
    assert!(matches!(ctx.ingest("empty.docx", b"").await, Err(Error::Validation(_))));
    assert!(matches!(ctx.ask("   ").await, Err(Error::Validation(_))));
    assert_eq!(factory.embedders.load(Ordering::SeqCst), 0, "validation happens before model loading");
}

#[tokio::test]
async fn reingest_gives_identical_self_query_results() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, _) = context(&tmp);
    let embedder = FakeEmbedder::default();
    let index_dir = ctx.settings().index_dir.clone();

    let mut runs = Vec::new();
    for _ in 0..2 {
        ctx.ingest("history.txt", &document()).await.expect("ingest");
        let index = docqa_vector::restore(&index_dir, &embedder).await.expect("restore");
        let top1: Vec<usize> = index
            .entries()
            .iter()
            .map(|e| index.search_text(&e.fragment.text, &embedder, 1).expect("search")[0].fragment.index)
            .collect();
        runs.push(top1);
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], (0..12).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrent_first_use_initializes_once() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    let ctx = Arc::new(ctx);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.ensure_initialized().await.map(|_| ()) })
        })
        .collect();
    for h in handles {
        h.await.expect("join").expect("init");
    }
    assert_eq!(factory.embedders.load(Ordering::SeqCst), 1);
    assert_eq!(factory.scorers.load(Ordering::SeqCst), 1);
    assert_eq!(factory.generators.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_generation_failures_are_retried() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    factory.generator.fail_first.store(2, Ordering::SeqCst);

    ctx.ingest("history.txt", &document()).await.expect("ingest");
    let response = ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
    assert_eq!(response.sources_used, 5);
    assert_eq!(factory.generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn custom_prompt_template_is_used() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    std::fs::write(tmp.path().join("prompt.txt"), "Q: {question}\n---\n{context}").expect("write");

    ctx.ingest("history.txt", &document()).await.expect("ingest");
    ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
    let prompts = factory.generator.prompts.lock().unwrap();
    assert!(prompts[0].starts_with(&format!("Q: {LIGHTHOUSE_QUESTION}\n---\n")));
}

#[tokio::test]
async fn undecodable_text_upload_keeps_previous_index() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    ctx.ingest("history.txt", &document()).await.expect("ingest");

    let garbled = [0xff, 0xfe, 0x00, 0x41, 0xc3, 0x28, b' ', b'h', b'i'];
    assert!(matches!(ctx.ingest("scan.txt", &garbled).await, Err(Error::EmptyInput(_))));

    ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
    assert!(factory.generator.prompts.lock().unwrap()[0].contains(PARAGRAPHS[3]));

    let (restarted, restarted_factory) = context(&tmp);
    restarted.ask(LIGHTHOUSE_QUESTION).await.expect("ask after restore");
    assert!(restarted_factory.generator.prompts.lock().unwrap()[0].contains(PARAGRAPHS[3]));
}

#[tokio::test]
async fn ask_in_flight_keeps_the_index_it_started_with() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    let ctx = Arc::new(ctx);
    ctx.ingest("history.txt", &document()).await.expect("ingest");

    factory.embedder.close();
    let pending = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.ask(LIGHTHOUSE_QUESTION).await })
    };
    timeout(Duration::from_secs(10), factory.embedder.reached.notified())
        .await
        .expect("ask reached retrieval");

    let report = timeout(Duration::from_secs(10), ctx.ingest("ferry.txt", FERRY_NOTE.as_bytes()))
        .await
        .expect("ingest is not blocked by the running ask")
        .expect("ingest");
    assert_eq!(report.fragment_count, 1);

    factory.embedder.open();
    let first = pending.await.expect("join").expect("ask");
    assert_eq!(first.sources_used, 5);
    let second = ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
    assert_eq!(second.sources_used, 1);

    let prompts = factory.generator.prompts.lock().unwrap();
    assert!(prompts[0].contains(PARAGRAPHS[3]));
    assert!(!prompts[0].contains(FERRY_NOTE));
    assert!(prompts[1].contains(FERRY_NOTE));
    assert!(PARAGRAPHS.iter().all(|p| !prompts[1].contains(p)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingests_leave_memory_and_disk_in_agreement() {
    let tmp = TempDir::new().expect("tmp");
    let (ctx, factory) = context(&tmp);
    let ctx = Arc::new(ctx);
    factory.embedder.delay_ms.store(20, Ordering::SeqCst);

    for _ in 0..3 {
        let history = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.ingest("history.txt", &document()).await })
        };
        let ferry = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.ingest("ferry.txt", FERRY_NOTE.as_bytes()).await })
        };
        history.await.expect("join").expect("ingest history");
        ferry.await.expect("join").expect("ingest ferry");

        let in_memory = ctx.ask(LIGHTHOUSE_QUESTION).await.expect("ask");
        let (restarted, restarted_factory) = context(&tmp);
        let on_disk = restarted.ask(LIGHTHOUSE_QUESTION).await.expect("ask after restore");
        assert_eq!(in_memory.sources_used, on_disk.sources_used);

        let prompt = factory.generator.prompts.lock().unwrap().last().cloned().expect("prompt");
        let restored_prompt = restarted_factory.generator.prompts.lock().unwrap()[0].clone();
        assert_eq!(prompt, restored_prompt);
    }
}
