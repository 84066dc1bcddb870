//! Integration tests: exercise the Driver API end to end through
//! hand-built `AstNode` trees, the same way an embedder with a real
//! parser would feed it a compiled program. Mirrors the "drive the
//! facade through its full public surface" shape of
//! `bpmn-lite-server/tests/integration.rs`.

use std::path::PathBuf;
use std::sync::Arc;

use karl_core::ast::{self, AstNode, CallArg, InfixOp, ParseError, Parser, Program, Token};
use karl_core::concurrency::runtime::TaskFailurePolicy;
use karl_core::env::Environment;
use karl_core::pattern::{LiteralPattern, Pattern};
use karl_core::value::Value;
use karl_core::Driver;

struct NoImportParser;

impl Parser for NoImportParser {
    fn parse(&self, _source: &str, filename: &str) -> Result<Arc<Program>, ParseError> {
        Err(ParseError {
            file: filename.to_string(),
            line: 0,
            message: "no surface-syntax parser configured for this test".into(),
        })
    }
}

fn new_driver(policy: TaskFailurePolicy) -> Driver {
    Driver::new(
        Arc::new(NoImportParser),
        Some("it.kl".to_string()),
        PathBuf::from("."),
        policy,
        None,
    )
}

fn tok() -> Token {
    Token::new(1, 1, Some("it.kl".to_string()))
}

/// Defines a function, calls it, and matches on the result — exercising
/// `Lambda`, `Call`, and `Match` through one `Driver::evaluate`.
#[tokio::test]
async fn lambda_call_and_match_round_trip() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![
        AstNode::Let {
            pattern: Pattern::Identifier("double".into()),
            value: Box::new(AstNode::Lambda {
                params: vec![Pattern::Identifier("x".into())],
                body: Box::new(AstNode::Infix {
                    op: InfixOp::Mul,
                    left: Box::new(AstNode::Identifier("x".into(), tok())),
                    right: Box::new(AstNode::IntLiteral(2)),
                    token: tok(),
                }),
                name: Some("double".into()),
            }),
        },
        AstNode::Match {
            scrutinee: Box::new(AstNode::Call {
                callee: Box::new(AstNode::Identifier("double".into(), tok())),
                args: vec![CallArg::Value(AstNode::IntLiteral(21))],
                token: tok(),
            }),
            arms: vec![
                ast::MatchArm {
                    pattern: Pattern::Literal(LiteralPattern::Integer(42)),
                    guard: None,
                    body: Box::new(AstNode::StringLiteral("matched".into())),
                },
                ast::MatchArm {
                    pattern: Pattern::Wildcard,
                    guard: None,
                    body: Box::new(AstNode::StringLiteral("unmatched".into())),
                },
            ],
            token: tok(),
        },
    ];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::String(s) if s.as_str() == "matched"));
}

/// `spawn` + `await` through the full driver, including the
/// unhandled-task-failure check a well-behaved embedder runs after
/// every program under a `Defer` policy.
#[tokio::test]
async fn spawned_task_result_is_observed_and_clean() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![
        AstNode::Let {
            pattern: Pattern::Identifier("task".into()),
            value: Box::new(AstNode::Spawn {
                body: vec![AstNode::IntLiteral(19)],
                token: tok(),
            }),
        },
        AstNode::Await {
            target: Box::new(AstNode::Identifier("task".into(), tok())),
            token: tok(),
        },
    ];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::Integer(19)));
    assert!(driver.check_unhandled_task_failures().is_none());
}

/// For-loop accumulation through the driver's `evaluate`, confirming
/// `Let`/`For`/`Assign` compose the same way inside `Driver::evaluate`
/// as they do in `Evaluator::eval_program` directly.
#[tokio::test]
async fn for_loop_accumulates_through_the_driver() {
    let driver = new_driver(TaskFailurePolicy::Defer);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![
        AstNode::Let {
            pattern: Pattern::Identifier("total".into()),
            value: Box::new(AstNode::IntLiteral(0)),
        },
        AstNode::Let {
            pattern: Pattern::Identifier("i".into()),
            value: Box::new(AstNode::IntLiteral(0)),
        },
        AstNode::For {
            pre: None,
            condition: Some(Box::new(AstNode::Infix {
                op: InfixOp::Lt,
                left: Box::new(AstNode::Identifier("i".into(), tok())),
                right: Box::new(AstNode::IntLiteral(5)),
                token: tok(),
            })),
            step: Some(Box::new(AstNode::Postfix {
                target: ast::AssignTarget::Identifier("i".into()),
                op: ast::PostfixOp::Inc,
                token: tok(),
            })),
            body: Box::new(AstNode::Assign {
                target: ast::AssignTarget::Identifier("total".into()),
                op: ast::AssignOp::AddSet,
                value: Box::new(AstNode::Identifier("i".into(), tok())),
                token: tok(),
            }),
            then_block: None,
        },
        AstNode::Identifier("total".into(), tok()),
    ];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::Integer(10)));
}

/// A fail-fast policy (the driver's default wiring in `karl-cli`) still
/// lets a normal, non-failing program complete without noise.
#[tokio::test]
async fn fail_fast_policy_does_not_interfere_with_a_clean_run() {
    let driver = new_driver(TaskFailurePolicy::FailFast);
    let env = Environment::child(driver.base_env());

    let program: Program = vec![AstNode::Infix {
        op: InfixOp::Add,
        left: Box::new(AstNode::IntLiteral(1)),
        right: Box::new(AstNode::IntLiteral(1)),
        token: tok(),
    }];

    let result = driver.evaluate(&program, &env).await.unwrap();
    assert!(matches!(result, Value::Integer(2)));
    assert!(driver.check_unhandled_task_failures().is_none());
}
