use std::io::{Cursor, Write};

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use tempfile::TempDir;

use docqa_core::chunker::{Chunker, ChunkingConfig};
use docqa_core::config::{Config, Settings};
use docqa_core::document::{extract_blocks, extract_text};
use docqa_core::prompt::{assemble, PromptTemplate, DEFAULT_TEMPLATE};
use docqa_core::types::Fragment;
use docqa_core::Error;

fn sample_text() -> String {
    let para = "The cooperative was founded in 1952 by a group of farmers. \
                They pooled equipment and shared the harvest! Was it a success? \
                Records suggest it was, at least for the first decade.";
    let mut text = String::new();
    for i in 0..12 {
        text.push_str(&format!("Section {i}.\n{para}\n\n"));
    }
    text.push_str("Ünïcödé tail with no final newline");
    text
}

fn reconstruct(text: &str, fragments: &[Fragment]) -> String {
    let mut out = String::new();
    let mut covered = 0;
    for f in fragments {
        assert!(f.start <= covered, "gap before fragment {}", f.index);
        assert!(f.end > covered, "fragment {} adds nothing", f.index);
        out.push_str(&text[covered..f.end]);
        covered = f.end;
    }
    out
}

#[test]
fn chunks_reconstruct_the_input_exactly() {
    let text = sample_text();
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 120, overlap: 20 }).expect("chunker");
    let fragments = chunker.split(&text);
    assert!(fragments.len() > 5);
    for (i, f) in fragments.iter().enumerate() {
        assert_eq!(f.index, i);
        assert_eq!(f.text, text[f.start..f.end]);
    }
    assert_eq!(reconstruct(&text, &fragments), text);
}

#[test]
fn chunks_respect_size_and_overlap_limits() {
    let text = sample_text();
    for (chunk_size, overlap) in [(50, 0), (80, 10), (200, 60), (64, 63)] {
        let chunker = Chunker::new(ChunkingConfig { chunk_size, overlap }).expect("chunker");
        let fragments = chunker.split(&text);
        for f in &fragments {
            assert!(f.text.chars().count() <= chunk_size, "fragment longer than {chunk_size}");
        }
        for pair in fragments.windows(2) {
            let shared = &text[pair[1].start..pair[0].end.max(pair[1].start)];
            assert!(shared.chars().count() <= overlap, "overlap exceeds {overlap}");
        }
        assert_eq!(reconstruct(&text, &fragments), text);
    }
}

#[test]
fn short_and_blank_inputs() {
    let chunker = Chunker::default();
    let one = chunker.split("Short text");
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].text, "Short text");
    assert!(chunker.split("  \n\t \n").is_empty());
    assert!(chunker.split("").is_empty());
}

#[test]
fn long_unbroken_text_is_hard_cut() {
    let text = "x".repeat(250);
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 100, overlap: 10 }).expect("chunker");
    let fragments = chunker.split(&text);
    assert!(fragments.iter().all(|f| f.text.len() <= 100));
    assert_eq!(fragments[0].text.len(), 100);
    assert_eq!(reconstruct(&text, &fragments), text);
}

#[test]
fn chunker_rejects_bad_config() {
    assert!(matches!(
        Chunker::new(ChunkingConfig { chunk_size: 10, overlap: 10 }),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        Chunker::new(ChunkingConfig { chunk_size: 0, overlap: 0 }),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn assemble_joins_fragments_in_order() {
    let template = PromptTemplate::parse("C:{context}|Q:{question}").expect("template");
    let prompt = assemble(&template, &["first", "second"], "why {not}?");
    assert_eq!(prompt, "C:first\n\nsecond|Q:why {not}?");

    let empty: [&str; 0] = [];
    assert_eq!(assemble(&template, &empty, "q"), "C:|Q:q");
}

#[test]
fn default_template_mentions_both_slots() {
    let prompt = assemble(&PromptTemplate::default(), &["ctx"], "question?");
    assert!(prompt.starts_with("Context: ctx"));
    assert!(prompt.contains("Question: question?"));
    assert!(DEFAULT_TEMPLATE.contains("{context}"));
}

#[test]
fn template_file_is_optional() {
    let tmp = TempDir::new().expect("tmp");
    let missing = PromptTemplate::load_or_default(&tmp.path().join("prompt.txt")).expect("default");
    assert_eq!(missing, PromptTemplate::default());

    let path = tmp.path().join("custom.txt");
    std::fs::write(&path, "Q={question}").expect("write");
    let custom = PromptTemplate::load_or_default(&path).expect("custom");
    assert!(!custom.has_context());
    assert_eq!(custom.render("ignored", "hi"), "Q=hi");
}

#[test]
fn settings_layer_over_defaults() {
    let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(
        "chunk_size = 200\nchunk_overlap = 20\nindex_dir = \"/var/lib/docqa\"\nuse_fake_models = true",
    ));
    let settings = Config::from_figment(figment).settings().expect("settings");
    assert_eq!(settings.chunk_size, 200);
    assert_eq!(settings.chunk_overlap, 20);
    assert!(settings.use_fake_models);
    assert_eq!(settings.index_dir, std::path::PathBuf::from("/var/lib/docqa"));
    assert_eq!(settings.rerank_top_n, 5);
    assert!(settings.prompt_path.is_absolute());
}

#[test]
fn settings_reject_overlap_not_below_size() {
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::string("chunk_size = 100\nchunk_overlap = 100"));
    assert!(matches!(Config::from_figment(figment).settings(), Err(Error::InvalidConfig(_))));
}

fn docx_bytes(document_xml: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .expect("start");
    writer.write_all(document_xml.as_bytes()).expect("write");
    writer.finish().expect("finish").into_inner()
}

#[test]
fn docx_paragraphs_become_blocks() {
    let xml = r#"<?xml version="1.0"?><w:document><w:body>
        <w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
        <w:p><w:r><w:t xml:space="preserve">Second </w:t></w:r><w:r><w:t>paragraph</w:t></w:r></w:p>
        </w:body></w:document>"#;
    let bytes = docx_bytes(xml);
    let blocks = extract_blocks("report.DOCX", &bytes).expect("blocks");
    assert_eq!(blocks, vec!["Fish & chips".to_string(), "Second paragraph".to_string()]);
    assert_eq!(extract_text("report.docx", &bytes).expect("text"), "Fish & chips\n\nSecond paragraph");
}

#[test]
fn unreadable_docx_and_unknown_types() {
    assert!(matches!(extract_blocks("broken.docx", b"not a zip"), Err(Error::EmptyInput(_))));
    assert!(matches!(extract_blocks("image.png", b"\x89PNG"), Err(Error::Validation(_))));
    assert!(matches!(extract_blocks("noext", b"text"), Err(Error::Validation(_))));
}

#[test]
fn plain_text_is_one_block() {
    let text = extract_text("notes.md", "\u{feff}# Title\n\nBody".as_bytes()).expect("text");
    assert_eq!(text, "# Title\n\nBody");
}

#[test]
fn invalid_utf8_text_is_unreadable() {
    let bytes = [0xff, 0xfe, 0x00, 0x41, 0xc3, 0x28, b' ', b'h', b'i'];
    assert!(matches!(extract_text("scan.txt", &bytes), Err(Error::EmptyInput(_))));
    assert!(matches!(extract_blocks("scan.md", &bytes), Err(Error::EmptyInput(_))));
}
