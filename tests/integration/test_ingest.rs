//! Bulk loading and single-document indexing tests.

use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use hybrid_retrieval::error::ErrorKind;
use hybrid_retrieval::search::SearchRequest;
use hybrid_retrieval::storage::{IndexSchema, MemoryBackend, SearchBackend};

use crate::common::{context_with, OverlapReranker};

const TARGET: &str = "loaded_regulations";

fn write_corpus(dir: &TempDir) -> String {
    let quality = [
        json!({"문서명": "품질관리규정", "장": "제2장", "조": "제5조", "문서내용": "의약품 품질 검사 절차"})
            .to_string(),
        String::new(),
        "{\"문서명\": \"깨진 줄\"".to_string(),
        "[1, 2, 3]".to_string(),
        json!({"문서명": "품질관리규정", "장": "제2장", "조": "제6조"}).to_string(),
        json!({"문서명": "품질관리규정", "장": "제3장", "조": "제1조", "문서내용": "의약품 제조 기록 보관"})
            .to_string(),
    ]
    .join("\n");
    let security = json!({"문서명": "보안규정", "장": "제1장", "조": "제1조", "문서내용": "정보 보안 규정 준수"})
        .to_string();

    fs::write(dir.path().join("a_quality.jsonl"), quality).unwrap();
    fs::write(dir.path().join("b_security.jsonl"), security).unwrap();
    fs::write(dir.path().join("notes.txt"), "not part of the corpus").unwrap();

    dir.path().join("*.jsonl").to_string_lossy().to_string()
}

#[tokio::test]
async fn test_load_skips_bad_lines_and_derives_ids() {
    let dir = TempDir::new().unwrap();
    let pattern = write_corpus(&dir);
    let backend = Arc::new(MemoryBackend::new());
    let ctx = context_with(backend.clone(), Arc::new(OverlapReranker));

    let report = ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap();

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.indexed_count, 3);
    // malformed, non-object, and missing text
    assert_eq!(report.skipped_lines, 3);
    assert!(report.errors.is_empty());
    assert_eq!(backend.document_count(TARGET), 3);

    let doc = backend
        .get_document(TARGET, "품질관리규정_제2장_제5조")
        .unwrap();
    assert_eq!(doc["content_vector"].as_array().unwrap().len(), 3);
    assert!(doc["출처파일"].as_str().unwrap().ends_with("a_quality.jsonl"));
    assert!(backend.get_document(TARGET, "보안규정_제1장_제1조").is_some());
}

#[tokio::test]
async fn test_loaded_documents_are_searchable() {
    let dir = TempDir::new().unwrap();
    let pattern = write_corpus(&dir);
    let ctx = context_with(Arc::new(MemoryBackend::new()), Arc::new(OverlapReranker));
    ctx.load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap();

    let response = ctx
        .search(
            SearchRequest::new("의약품 제조 기록")
                .keywords(["제조"])
                .index(TARGET)
                .top_k(3)
                .rerank_top_k(1),
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].document_id, "품질관리규정_제3장_제1조");
}

#[tokio::test]
async fn test_rejected_documents_report_source_lines() {
    let dir = TempDir::new().unwrap();
    let pattern = write_corpus(&dir);
    let backend = Arc::new(MemoryBackend::new());
    // four dimensions declared, the embedder produces three
    backend
        .create_index(TARGET, &IndexSchema::new(4).to_mapping())
        .await
        .unwrap();
    let ctx = context_with(backend.clone(), Arc::new(OverlapReranker));

    let report = ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap();

    assert_eq!(report.indexed_count, 0);
    assert_eq!(report.errors.len(), 3);
    let quality_lines: Vec<usize> = report
        .errors
        .iter()
        .filter(|e| e.file.ends_with("a_quality.jsonl"))
        .map(|e| e.line)
        .collect();
    assert_eq!(quality_lines, vec![1, 6]);
    assert_eq!(
        report.errors[0].document_id.as_deref(),
        Some("품질관리규정_제2장_제5조")
    );
}

#[tokio::test]
async fn test_colliding_records_are_not_silently_overwritten() {
    let dir = TempDir::new().unwrap();
    // no 장/조: the backend assigns ids
    let untitled = ["연차 신청", "병가 신청", "경조 휴가"]
        .map(|body| json!({"문서명": "휴가규정", "문서내용": body}).to_string())
        .join("\n");
    // the same article twice
    let repeated = [
        json!({"문서명": "보안규정", "장": "제1장", "조": "제1조", "문서내용": "정보 보안 목적"}),
        json!({"문서명": "보안규정", "장": "제1장", "조": "제1조", "문서내용": "개정된 목적"}),
    ]
    .map(|v| v.to_string())
    .join("\n");
    fs::write(dir.path().join("a_leave.jsonl"), untitled).unwrap();
    fs::write(dir.path().join("b_security.jsonl"), repeated).unwrap();
    let pattern = dir.path().join("*.jsonl").to_string_lossy().to_string();

    let backend = Arc::new(MemoryBackend::new());
    let ctx = context_with(backend.clone(), Arc::new(OverlapReranker));
    let report = ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap();

    assert_eq!(report.indexed_count, 4);
    assert_eq!(backend.document_count(TARGET), 4);
    assert_eq!(report.errors.len(), 1);
    let duplicate = &report.errors[0];
    assert!(duplicate.file.ends_with("b_security.jsonl"));
    assert_eq!(duplicate.line, 2);
    assert_eq!(duplicate.document_id.as_deref(), Some("보안규정_제1장_제1조"));
    assert!(duplicate.reason.contains("duplicate"));

    let kept = backend.get_document(TARGET, "보안규정_제1장_제1조").unwrap();
    assert_eq!(kept["문서내용"], "정보 보안 목적");
}

#[tokio::test]
async fn test_unreadable_file_does_not_discard_loaded_ones() {
    let dir = TempDir::new().unwrap();
    let pattern = write_corpus(&dir);
    fs::write(dir.path().join("c_broken.jsonl"), [0xff, 0xfe, 0x00, 0x7b]).unwrap();

    let backend = Arc::new(MemoryBackend::new());
    let ctx = context_with(backend.clone(), Arc::new(OverlapReranker));
    let report = ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap();

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.indexed_count, 3);
    assert_eq!(backend.document_count(TARGET), 3);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].file.ends_with("c_broken.jsonl"));
    assert_eq!(report.errors[0].line, 0);
}

#[tokio::test]
async fn test_load_fails_when_no_file_loads() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.jsonl"), [0xff, 0xfe]).unwrap();
    let pattern = dir.path().join("*.jsonl").to_string_lossy().to_string();
    let ctx = context_with(Arc::new(MemoryBackend::new()), Arc::new(OverlapReranker));

    assert!(ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .is_err());
}

#[tokio::test]
async fn test_pattern_without_matches_is_not_found() {
    let dir = TempDir::new().unwrap();
    let pattern = dir.path().join("*.jsonl").to_string_lossy().to_string();
    let ctx = context_with(Arc::new(MemoryBackend::new()), Arc::new(OverlapReranker));

    let err = ctx
        .load_documents(Some(TARGET), Some(&pattern))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_index_document_embeds_text() {
    let backend = Arc::new(MemoryBackend::new());
    let ctx = context_with(backend.clone(), Arc::new(OverlapReranker));
    let document = json!({"문서명": "인사규정", "장": "제1장", "조": "제2조", "문서내용": "휴가 신청"})
        .as_object()
        .cloned()
        .unwrap();

    let id = ctx.index_document(TARGET, document, None).await.unwrap();

    assert_eq!(id, "인사규정_제1장_제2조");
    let stored = backend.get_document(TARGET, &id).unwrap();
    assert_eq!(stored["content_vector"].as_array().unwrap().len(), 3);
    let stats = backend.index_stats(TARGET).await.unwrap();
    assert_eq!(stats.doc_count, 1);
}

#[tokio::test]
async fn test_index_document_without_text_is_invalid() {
    let ctx = context_with(Arc::new(MemoryBackend::new()), Arc::new(OverlapReranker));
    let document = json!({"문서명": "빈 문서"}).as_object().cloned().unwrap();

    let err = ctx.index_document(TARGET, document, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}
