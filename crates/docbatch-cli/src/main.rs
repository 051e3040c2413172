use anyhow::{Context, Result};
use docbatch_config::Config;
use docbatch_engine::{BatchExecutor, BatchRequest, ExecutionMode, HistoryStore, InMemoryTransport};
use std::{env, fs, path::PathBuf, process};

const ROOT_TAB: &str = "t0";

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: {} <apply|preview> <document-file> <batch-file>", args[0]);
        eprintln!("The batch file holds a JSON batch request (operations array).");
        process::exit(1);
    }

    let command = args[1].as_str();
    if command != "apply" && command != "preview" {
        eprintln!("Error: Unknown command '{command}'");
        eprintln!("Usage: {} <apply|preview> <document-file> <batch-file>", args[0]);
        process::exit(1);
    }

    let config = match Config::load() {
        Ok(Some(config)) => config,
        Ok(None) => Config::default(),
        Err(e) => {
            eprintln!("Error: Failed to load config file: {e}");
            eprintln!("Fix or remove {}", Config::config_path().display());
            process::exit(1);
        }
    };

    let document_path = PathBuf::from(&args[2]);
    let document_text = fs::read_to_string(&document_path)
        .with_context(|| format!("Failed to read document '{}'", document_path.display()))?;

    let batch_path = PathBuf::from(&args[3]);
    let batch_json = fs::read_to_string(&batch_path)
        .with_context(|| format!("Failed to read batch file '{}'", batch_path.display()))?;
    let request: BatchRequest = serde_json::from_str(&batch_json)
        .with_context(|| format!("Failed to parse batch file '{}'", batch_path.display()))?;

    // The request's own preview flag can only make the run safer, never
    // promote a `preview` invocation to an apply.
    let mode = if command == "preview" {
        ExecutionMode::Preview
    } else {
        request.mode()
    };

    let document_id = config
        .default_document_id
        .clone()
        .unwrap_or_else(|| document_path.display().to_string());

    let mut transport = InMemoryTransport::new();
    transport.insert_document(document_id.as_str(), &document_text);
    let mut history = HistoryStore::with_limit(config.history_limit);
    let mut executor = BatchExecutor::new(&mut transport, &mut history);

    let result = match executor.execute_fresh(&document_id, &request, mode) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: Batch rejected: {e}");
            eprintln!("{}", serde_json::to_string_pretty(&e.to_payload())?);
            process::exit(1);
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(preview) = &result.preview {
        for tab_diff in &preview.diffs {
            eprintln!("--- tab {} ---", tab_diff.tab_id);
            eprintln!("{}", tab_diff.diff);
        }
    }

    if mode == ExecutionMode::Apply {
        let updated = transport
            .document_text(&document_id, ROOT_TAB)
            .context("Document disappeared from the transport")?;
        fs::write(&document_path, updated)
            .with_context(|| format!("Failed to write document '{}'", document_path.display()))?;
    }

    Ok(())
}
