//! Output formatting for CLI commands.
//!
//! Every command prints either pretty JSON (`--json`) or a short human-readable summary.

use hybrid_retrieval::ingest::LoadReport;
use hybrid_retrieval::search::{ExtractedKeywords, RerankStatus, SearchResponse};
use hybrid_retrieval::storage::{IndexCreated, IndexStats};
use hybrid_retrieval::utils::preview;
use serde::Serialize;
use serde_json::Value;

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn field<'a>(source: &'a serde_json::Map<String, Value>, name: &str) -> &'a str {
    source.get(name).and_then(Value::as_str).unwrap_or("")
}

/// Print search results.
pub fn print_search_results(response: &SearchResponse, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(response);
    }

    let d = &response.diagnostics;
    println!(
        "{} results ({}ms) - lexical {}, vector {}, fused {}, rerank {}\n",
        response.results.len(),
        d.took_ms,
        d.lexical_hits,
        d.vector_hits,
        d.fused_candidates,
        match d.rerank {
            RerankStatus::Applied => "applied",
            RerankStatus::Skipped => "skipped",
            RerankStatus::Fallback => "fallback",
        }
    );

    for (i, r) in response.results.iter().enumerate() {
        let rerank = r
            .rerank_score
            .map(|s| format!(" rerank {:.4}", s))
            .unwrap_or_default();
        println!(
            "{}. {} [fused {:.4}{}]",
            i + 1,
            r.document_id,
            r.fused_score,
            rerank
        );
        let title = [
            field(&r.source_fields, "문서명"),
            field(&r.source_fields, "장"),
            field(&r.source_fields, "조"),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
        if !title.is_empty() {
            println!("   {}", title);
        }
        let body = field(&r.source_fields, "문서내용");
        if !body.is_empty() {
            println!("   \"{}\"", preview(body, 200));
        }
        println!();
    }

    for warning in &d.warnings {
        eprintln!("warning [{}]: {}", warning.kind, warning.message);
    }

    if response.results.is_empty() {
        println!("No results found.");
    }
    Ok(())
}

/// Print index creation result.
pub fn print_index_created(result: &IndexCreated, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(result);
    }
    if result.already_exists {
        println!("Index '{}' already exists", result.index_name);
    } else {
        println!("Created index '{}'", result.index_name);
    }
    Ok(())
}

/// Print index statistics.
pub fn print_stats(stats: &IndexStats, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(stats);
    }
    println!("Index: {}", stats.index_name);
    println!("Documents: {}", stats.doc_count);
    println!("Size: {} bytes", stats.size_bytes);
    println!(
        "Shards: {} total, {} successful, {} failed",
        stats.shard_info.total, stats.shard_info.successful, stats.shard_info.failed
    );
    Ok(())
}

/// Print bulk load report.
pub fn print_load_report(report: &LoadReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!(
        "Indexed {} documents from {} files",
        report.indexed_count, report.files_processed
    );
    if report.skipped_lines > 0 {
        println!("Skipped lines: {}", report.skipped_lines);
    }
    if !report.errors.is_empty() {
        println!("\nErrors ({}):", report.errors.len());
        for e in &report.errors {
            println!(
                "  {}:{} {} - {}",
                e.file,
                e.line,
                e.document_id.as_deref().unwrap_or("-"),
                e.reason
            );
        }
    }
    Ok(())
}

/// Print extracted keywords.
pub fn print_keywords(extracted: &ExtractedKeywords, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(extracted);
    }
    for keyword in &extracted.keywords {
        println!("{}", keyword);
    }
    Ok(())
}

/// Print a one-line status message.
pub fn print_message(message: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&serde_json::json!({ "message": message }));
    }
    println!("{}", message);
    Ok(())
}
