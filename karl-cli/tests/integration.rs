//! Integration tests: exercise the Driver API end to end the same way
//! `main.rs` does, with hand-built AST trees standing in for parsed
//! source (the core never sees a lexer or parser).

use std::path::PathBuf;
use std::sync::Arc;

use karl_core::ast::{self, AstNode, ParseError, Parser, Program};
use karl_core::concurrency::runtime::TaskFailurePolicy;
use karl_core::env::Environment;
use karl_core::pattern::Pattern;
use karl_core::value::Value;
use karl_core::Driver;

struct NoImportParser;

impl Parser for NoImportParser {
    fn parse(&self, _source: &str, filename: &str) -> Result<Arc<Program>, ParseError> {
        Err(ParseError {
            file: filename.to_string(),
            line: 0,
            message: "no surface-syntax parser configured".into(),
        })
    }
}

fn new_driver(policy: TaskFailurePolicy) -> Driver {
    Driver::new(
        Arc::new(NoImportParser),
        Some("test.kl".to_string()),
        PathBuf::from("."),
        policy,
        None,
    )
}

fn tok() -> ast::Token {
    ast::Token::new(1, 1, Some("test.kl".to_string()))
}

/// `let x = 40; x + 2` should evaluate to 42 through the same base
/// environment every embedder gets from `Driver::base_env`.
#[tokio::test]
async fn evaluate_a_let_and_arithmetic_program() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![
        AstNode::Let {
            pattern: Pattern::Identifier("x".into()),
            value: Box::new(AstNode::IntLiteral(40)),
        },
        AstNode::Infix {
            op: ast::InfixOp::Add,
            left: Box::new(AstNode::Identifier("x".into(), tok())),
            right: Box::new(AstNode::IntLiteral(2)),
            token: tok(),
        },
    ];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::Integer(42)));
    assert!(driver.check_unhandled_task_failures().is_none());
}

/// Spawning a task and awaiting it should run the body to completion and
/// hand back its value, exactly as a synchronous call would.
#[tokio::test]
async fn spawn_and_await_round_trip_a_value() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![
        AstNode::Let {
            pattern: Pattern::Identifier("task".into()),
            value: Box::new(AstNode::Spawn {
                body: vec![AstNode::IntLiteral(7)],
                token: tok(),
            }),
        },
        AstNode::Await {
            target: Box::new(AstNode::Identifier("task".into(), tok())),
            token: tok(),
        },
    ];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::Integer(7)));
}

/// A divide-by-zero inside a spawned task is recorded against the
/// runtime rather than propagating synchronously to the spawn site.
#[tokio::test]
async fn failing_spawned_task_does_not_fail_the_spawn_expression() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![AstNode::Let {
        pattern: Pattern::Identifier("task".into()),
        value: Box::new(AstNode::Spawn {
            body: vec![AstNode::Infix {
                op: ast::InfixOp::Div,
                left: Box::new(AstNode::IntLiteral(1)),
                right: Box::new(AstNode::IntLiteral(0)),
                token: tok(),
            }],
            token: tok(),
        }),
    }];

    driver.evaluate(&program, &env).await.unwrap();
}

/// An import with no parser behind it fails through the ordinary error
/// path rather than panicking.
#[tokio::test]
async fn import_without_a_parser_fails_cleanly() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![AstNode::Import {
        path: "does/not/matter.kl".into(),
        token: tok(),
    }];

    let err = driver.evaluate(&program, &env).await.unwrap_err();
    assert!(!err.message().is_empty());
}
