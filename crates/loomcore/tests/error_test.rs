use loomcore::{ErrorCategory, ErrorKind, FlowError, NodeError, WorkflowError};

#[test]
fn test_node_error_taxonomy() {
    let cases = [
        (NodeError::Configuration("x".into()), ErrorKind::Terminal, ErrorCategory::Configuration),
        (NodeError::Template("x".into()), ErrorKind::Terminal, ErrorCategory::Configuration),
        (NodeError::Parse("x".into()), ErrorKind::Terminal, ErrorCategory::Parse),
        (NodeError::Transient("x".into()), ErrorKind::Retriable, ErrorCategory::Transient),
        (NodeError::Timeout { seconds: 3 }, ErrorKind::Retriable, ErrorCategory::Transient),
        (
            NodeError::RetriesExhausted { attempts: 3, last_error: "x".into() },
            ErrorKind::Terminal,
            ErrorCategory::Transient,
        ),
        (NodeError::Journal("x".into()), ErrorKind::Terminal, ErrorCategory::Transient),
    ];

    for (error, kind, category) in cases {
        assert_eq!(error.kind(), kind, "{}", error);
        assert_eq!(error.category(), category, "{}", error);
    }
}

#[test]
fn test_classify_carries_node_id() {
    let error = FlowError::node("H", NodeError::Configuration("missing config: endpoint".into()));
    let classified = error.classify();

    assert!(classified.is_terminal());
    assert_eq!(classified.category, ErrorCategory::Configuration);
    assert_eq!(classified.node_id.as_deref(), Some("H"));
    assert!(classified.message.contains("endpoint"));
}

#[test]
fn test_structural_errors_are_terminal() {
    let cycle = FlowError::from(WorkflowError::CyclicDependency { node_id: "b".into() }).classify();
    assert_eq!(cycle.kind, ErrorKind::Terminal);
    assert_eq!(cycle.category, ErrorCategory::Structural);
    assert_eq!(cycle.node_id.as_deref(), Some("b"));
    assert!(cycle.message.contains("cycle"));

    let unknown = FlowError::from(WorkflowError::UnknownNodeType {
        node_id: "x".into(),
        node_type: "FAX".into(),
    })
    .classify();
    assert_eq!(unknown.category, ErrorCategory::Structural);
    assert!(unknown.message.contains("Unsupported node type"));
}

#[test]
fn test_escaped_retriable_error_is_reported_terminal() {
    let classified = FlowError::node("H", NodeError::Transient("reset".into())).classify();
    assert_eq!(classified.kind, ErrorKind::Terminal);
    assert_eq!(classified.category, ErrorCategory::Transient);
}
