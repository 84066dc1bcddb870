//! Thin embedder binary exercising the Driver API (spec §6), analogous in
//! role to `bpmn-lite-server`: it wires a `RuntimeState`, a base
//! `Environment`, and a `TaskFailurePolicy`, then drives `evaluate()` over
//! an AST. Lexing and parsing a surface syntax are out of scope (spec §1),
//! so this binary builds its demo program directly as an `AstNode` tree
//! rather than reading source text.

use std::path::PathBuf;
use std::sync::Arc;

use karl_core::ast::{self, AstNode, Parser, ParseError, Program};
use karl_core::concurrency::runtime::TaskFailurePolicy;
use karl_core::env::Environment;
use karl_core::error::format_error;
use karl_core::pattern::{LiteralPattern, Pattern};
use karl_core::Driver;
use tracing_subscriber::EnvFilter;

/// No embedded source files ship with this binary, so `import` can never
/// resolve to anything; it exists only so `Driver::new` has a `Parser` to
/// hand the module loader.
struct NoImportParser;

impl Parser for NoImportParser {
    fn parse(&self, _source: &str, filename: &str) -> Result<Arc<Program>, ParseError> {
        Err(ParseError {
            file: filename.to_string(),
            line: 0,
            message: "this binary has no surface-syntax parser; imports are unsupported".into(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let policy = parse_task_failure_policy();
    tracing::info!(?policy, "starting karl-cli demo run");

    let driver = Driver::new(
        Arc::new(NoImportParser),
        Some("demo.kl".to_string()),
        PathBuf::from("."),
        policy,
        None,
    );
    driver.set_program_args(std::env::args().skip(1).collect());
    driver.set_environ_snapshot(std::env::vars().collect());

    let env = Environment::child(driver.base_env());
    let program = demo_program();

    match driver.evaluate(&program, &env).await {
        Ok(value) => tracing::info!(result = %value.inspect(), "demo program finished"),
        Err(err) => {
            eprintln!("{}", format_error(&err, None));
            std::process::exit(1);
        }
    }

    if let Some(unhandled) = driver.check_unhandled_task_failures() {
        eprintln!("{unhandled}");
        std::process::exit(1);
    }

    Ok(())
}

/// `--task-failure-policy=fail-fast|defer` (spec §6): the driver never
/// reads CLI flags itself, so the embedder parses them and calls the
/// setter. Defaults to `fail-fast`, the stricter of the two.
fn parse_task_failure_policy() -> TaskFailurePolicy {
    std::env::args()
        .find_map(|arg| arg.strip_prefix("--task-failure-policy=").map(str::to_string))
        .and_then(|s| TaskFailurePolicy::parse(&s))
        .unwrap_or(TaskFailurePolicy::FailFast)
}

/// A small hand-built program exercising a spread of the language: a
/// let-bound closure, a spawned task, an await, and a match expression.
/// Equivalent surface syntax would read roughly:
///
/// ```text
/// let double = |x| x * 2
/// let task = spawn { double(21) }
/// let result = await task
/// match result {
///     42 => "the answer"
///     _ => "something else"
/// }
/// ```
fn demo_program() -> Program {
    let tok = || ast::Token::new(1, 1, Some("demo.kl".to_string()));

    let double = AstNode::Let {
        pattern: Pattern::Identifier("double".into()),
        value: Box::new(AstNode::Lambda {
            params: vec![Pattern::Identifier("x".into())],
            body: Box::new(AstNode::Infix {
                op: ast::InfixOp::Mul,
                left: Box::new(AstNode::Identifier("x".into(), tok())),
                right: Box::new(AstNode::IntLiteral(2)),
                token: tok(),
            }),
            name: Some("double".into()),
        }),
    };

    let task = AstNode::Let {
        pattern: Pattern::Identifier("task".into()),
        value: Box::new(AstNode::Spawn {
            body: vec![AstNode::Call {
                callee: Box::new(AstNode::Identifier("double".into(), tok())),
                args: vec![ast::CallArg::Value(AstNode::IntLiteral(21))],
                token: tok(),
            }],
            token: tok(),
        }),
    };

    let result = AstNode::Let {
        pattern: Pattern::Identifier("result".into()),
        value: Box::new(AstNode::Await {
            target: Box::new(AstNode::Identifier("task".into(), tok())),
            token: tok(),
        }),
    };

    let report = AstNode::Match {
        scrutinee: Box::new(AstNode::Identifier("result".into(), tok())),
        arms: vec![
            ast::MatchArm {
                pattern: Pattern::Literal(LiteralPattern::Integer(42)),
                guard: None,
                body: Box::new(AstNode::StringLiteral("the answer".to_string())),
            },
            ast::MatchArm {
                pattern: Pattern::Wildcard,
                guard: None,
                body: Box::new(AstNode::StringLiteral("something else".to_string())),
            },
        ],
        token: tok(),
    };

    vec![double, task, result, report]
}
