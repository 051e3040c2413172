//! Undo round-trips: batches reverted as new batches of inverse operations,
//! replayed in reverse order, with the originals kept in history.

use pretty_assertions::assert_eq;

use docbatch_engine::{
    BatchExecutor, BatchRequest, BatchResult, DocumentState, EngineError, ExecutionMode,
    HistoryStore, InMemoryTransport, Locator, Occurrence, OpKind, Operation, Range,
    SearchPosition, TextStyle, UndoCapability,
};

fn setup(text: &str) -> (InMemoryTransport, HistoryStore) {
    let mut transport = InMemoryTransport::new();
    transport.insert_document("doc", text);
    (transport, HistoryStore::new())
}

fn apply(
    transport: &mut InMemoryTransport,
    history: &mut HistoryStore,
    operations: Vec<Operation>,
) -> Result<BatchResult, EngineError> {
    let mut executor = BatchExecutor::new(transport, history);
    executor.execute_fresh("doc", &BatchRequest::new(operations), ExecutionMode::Apply)
}

fn undo_last(
    transport: &mut InMemoryTransport,
    history: &mut HistoryStore,
) -> Result<BatchResult, EngineError> {
    let mut executor = BatchExecutor::new(transport, history);
    executor.undo_last("doc")
}

fn insert_at(text: &str, offset: usize) -> Operation {
    Operation::at_range(
        OpKind::InsertText {
            text: text.to_string(),
        },
        Range::at(offset),
    )
}

#[test]
fn test_single_insert_round_trip() {
    let (mut transport, mut history) = setup("hello");
    apply(&mut transport, &mut history, vec![insert_at("XX", 3)]).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "heXXllo\n");

    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "hello\n");
    assert_eq!(history.state("doc"), DocumentState::Clean);
}

#[test]
fn test_two_op_batch_round_trip() {
    let (mut transport, mut history) = setup("alpha beta gamma");
    let ops = vec![
        Operation::with_locator(
            OpKind::ReplaceText {
                text: "BETA!".to_string(),
            },
            Locator::Search {
                text: "beta".to_string(),
                occurrence: Occurrence::First,
                position: SearchPosition::Replace,
                match_case: true,
                require_unique: false,
            },
        ),
        Operation::with_locator(
            OpKind::InsertText {
                text: " tail".to_string(),
            },
            Locator::DocumentEnd,
        ),
    ];
    apply(&mut transport, &mut history, ops).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "alpha BETA! gamma tail\n"
    );

    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "alpha beta gamma\n"
    );

    // originals are kept, marked undone; the undo batch adds its own records
    let stats = history.stats("doc");
    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.undone, 2);
}

#[test]
fn test_five_op_batch_round_trip() {
    let (mut transport, mut history) = setup("abcdefghij");
    let ops = vec![
        insert_at("1", 2),
        insert_at("2", 4),
        insert_at("3", 6),
        insert_at("4", 8),
        insert_at("5", 10),
    ];
    apply(&mut transport, &mut history, ops).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "a1bc2de3fg4hi5j\n"
    );

    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "abcdefghij\n");
}

#[test]
fn test_undo_of_undo_restores_the_edit() {
    let (mut transport, mut history) = setup("alpha beta gamma");
    let ops = vec![
        Operation::at_range(
            OpKind::ReplaceText {
                text: "BETA!".to_string(),
            },
            Range::new(7, 11),
        ),
        insert_at(" tail", 17),
    ];
    apply(&mut transport, &mut history, ops).unwrap();
    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "alpha beta gamma\n"
    );

    // the undo batch is itself the most recent active batch
    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "alpha BETA! gamma tail\n"
    );
    assert_eq!(history.state("doc"), DocumentState::Dirty);
}

#[test]
fn test_delete_undo_restores_captured_text() {
    let (mut transport, mut history) = setup("keep REMOVE keep");
    let ops = vec![Operation::at_range(OpKind::DeleteRange, Range::new(6, 13))];
    let result = apply(&mut transport, &mut history, ops).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "keep keep\n");
    assert_eq!(result.operations[0].capability, UndoCapability::Full);

    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "keep REMOVE keep\n"
    );
}

#[test]
fn test_format_undo_restores_prior_style() {
    let (mut transport, mut history) = setup("styled text");
    let bold = TextStyle {
        bold: Some(true),
        ..TextStyle::default()
    };
    let ops = vec![Operation::at_range(
        OpKind::FormatRange { style: bold },
        Range::new(1, 7),
    )];
    let result = apply(&mut transport, &mut history, ops).unwrap();
    // no style metadata was captured for the prior state
    assert_eq!(result.operations[0].capability, UndoCapability::Partial);

    undo_last(&mut transport, &mut history).unwrap();
    let record = history.history("doc", Some(1))[0];
    assert_eq!(record.kind, "format_range");
    assert!(record.undo_of.is_some());
}

#[test]
fn test_table_operation_cannot_be_undone() {
    let (mut transport, mut history) = setup("doc with table");
    let ops = vec![Operation::at_range(
        OpKind::InsertTableRow {
            cells: vec!["a".to_string()],
            below: true,
        },
        Range::at(3),
    )];
    let result = apply(&mut transport, &mut history, ops).unwrap();
    assert_eq!(result.operations[0].capability, UndoCapability::None);

    let err = undo_last(&mut transport, &mut history).unwrap_err();
    assert!(matches!(err, EngineError::UndoNotAvailable { .. }));
}

#[test]
fn test_undo_with_empty_history() {
    let (mut transport, mut history) = setup("text");
    let err = undo_last(&mut transport, &mut history).unwrap_err();
    assert!(matches!(err, EngineError::UndoNotAvailable { .. }));
}

#[test]
fn test_undo_single_operation_from_latest_batch() {
    let (mut transport, mut history) = setup("one two three");
    apply(
        &mut transport,
        &mut history,
        vec![insert_at("A", 1), insert_at("B", 5)],
    )
    .unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "Aone Btwo three\n"
    );

    let record_id = history
        .history("doc", None)
        .iter()
        .find(|r| r.applied_range == Range::new(6, 7))
        .unwrap()
        .record_id;
    let mut executor = BatchExecutor::new(&mut transport, &mut history);
    executor.undo_operation("doc", record_id).unwrap();
    assert_eq!(
        transport.document_text("doc", "t0").unwrap(),
        "Aone two three\n"
    );
}

#[test]
fn test_undo_single_operation_from_older_batch_rejected() {
    let (mut transport, mut history) = setup("start");
    apply(&mut transport, &mut history, vec![insert_at("1", 1)]).unwrap();
    let first = history.history("doc", None)[0].record_id;
    apply(&mut transport, &mut history, vec![insert_at("2", 3)]).unwrap();

    let mut executor = BatchExecutor::new(&mut transport, &mut history);
    let err = executor.undo_operation("doc", first).unwrap_err();
    assert!(matches!(err, EngineError::UndoNotAvailable { .. }));
}

#[test]
fn test_list_conversion_round_trip() {
    let (mut transport, mut history) = setup("Plan");
    let mut op = Operation::with_locator(
        OpKind::InsertText {
            text: "\na\n\nb".to_string(),
        },
        Locator::DocumentEnd,
    );
    op.convert_to_list = Some(docbatch_engine::ListStyle::Unordered);
    apply(&mut transport, &mut history, vec![op]).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "Plan\na\nb\n");

    undo_last(&mut transport, &mut history).unwrap();
    assert_eq!(transport.document_text("doc", "t0").unwrap(), "Plan\n");
    assert!(transport.list_ranges("doc", "t0").is_empty());
}
