//! Karl's interpreter core (spec §1): a tree-walking evaluator for a
//! small expression-oriented scripting language with first-class
//! functions, pattern matching, and structured concurrency.
//!
//! This crate is deliberately front-end-free: lexing, parsing, shape
//! schemas, and every REPL/playground/CLI-driver UI are out of scope
//! (spec's Non-goals). `Driver` is the one stable facade an embedder
//! talks to — grounded on the teacher's `BpmnLiteEngine` facade in
//! `engine.rs`, which plays the same "one object gRPC handlers delegate
//! to" role `karl-cli` plays here.

pub mod ast;
pub mod builtins;
pub mod concurrency;
pub mod debug;
pub mod env;
pub mod error;
pub mod eval;
pub mod module;
pub mod pattern;
pub mod value;

use std::path::PathBuf;
use std::sync::Arc;

use ast::{AstNode, Parser, Program};
use concurrency::runtime::{RuntimeState, TaskFailurePolicy};
use debug::Debugger;
use env::Environment;
use error::{EvalError, UnhandledTaskError};
use eval::{Evaluator, Signal};
use module::ModuleLoader;
use value::Value;

/// The Driver API (spec §6): the only stable contract exposed to
/// embedders. Construction wires a parser (for module imports only —
/// the driver itself never parses the entry program) and a project
/// root; configuration happens through `RuntimeState` setters before
/// the first `evaluate` call.
pub struct Driver {
    evaluator: Evaluator,
    base_env: Arc<Environment>,
}

impl Driver {
    /// `(source?, filename?, project_root?)` in spec §6 maps onto
    /// `(parser, filename, project_root)` here: the driver does not
    /// parse `source` itself (spec §1 — lexing/parsing is out of
    /// scope), it only needs a `Parser` to resolve `import` statements
    /// against `project_root`.
    pub fn new(
        parser: Arc<dyn Parser>,
        filename: Option<String>,
        project_root: PathBuf,
        policy: TaskFailurePolicy,
        debugger: Option<Arc<dyn Debugger>>,
    ) -> Self {
        let runtime = RuntimeState::new(policy);
        let module_loader = ModuleLoader::new(parser, project_root);
        let registry = builtins::register_builtins();
        let mut evaluator = Evaluator::new(registry, runtime, module_loader, debugger);
        if let Some(file) = filename {
            evaluator = evaluator.with_source_file(file);
        }
        let base_env = Self::build_base_env();
        Driver { evaluator, base_env }
    }

    /// A fresh root environment with every registered builtin bound by
    /// name, plus the non-callable constants builtins alone can't
    /// express (the `json` codec handle).
    fn build_base_env() -> Arc<Environment> {
        let env = Environment::root();
        let registry = builtins::register_builtins();
        for name in registry.names() {
            env.define(*name, Value::Builtin(*name));
        }
        env.define("json", builtins::io::json::json_codec_value());
        env
    }

    pub fn base_env(&self) -> &Arc<Environment> {
        &self.base_env
    }

    pub fn runtime(&self) -> &Arc<RuntimeState> {
        self.evaluator.runtime()
    }

    pub fn set_task_failure_policy(&self, policy: TaskFailurePolicy) {
        self.evaluator.runtime().set_task_failure_policy(policy);
    }

    pub fn set_program_args(&self, args: Vec<String>) {
        self.evaluator.runtime().set_program_args(args);
    }

    pub fn set_program_path(&self, path: String) {
        self.evaluator.runtime().set_program_path(path);
    }

    pub fn set_environ_snapshot(&self, env: Vec<(String, String)>) {
        self.evaluator.runtime().set_environ_snapshot(env);
    }

    /// `evaluate(program, env)` (spec §6): runs every top-level
    /// statement in `program` against `env`, returning the last value.
    /// A `break`/`continue` escaping every statement is a runtime error,
    /// same as escaping a function body.
    pub async fn evaluate(&self, program: &Program, env: &Arc<Environment>) -> Result<Value, EvalError> {
        self.evaluator.eval_program(program, env).await
    }

    /// Evaluate a single node directly, for embedders driving a REPL
    /// one statement at a time rather than a whole program.
    pub async fn evaluate_node(&self, node: &AstNode, env: &Arc<Environment>) -> Result<(Value, Option<Signal>), EvalError> {
        self.evaluator.evaluate(node, env).await
    }

    pub fn check_unhandled_task_failures(&self) -> Option<UnhandledTaskError> {
        self.evaluator.runtime().check_unhandled_task_failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParseError;

    struct NoopParser;
    impl Parser for NoopParser {
        fn parse(&self, _source: &str, _filename: &str) -> Result<Arc<Program>, ParseError> {
            Ok(Arc::new(Vec::new()))
        }
    }

    #[tokio::test]
    async fn base_env_binds_every_registered_builtin() {
        let driver = Driver::new(
            Arc::new(NoopParser),
            None,
            PathBuf::from("."),
            TaskFailurePolicy::Defer,
            None,
        );
        assert!(matches!(driver.base_env().get("len"), Some(Value::Builtin("len"))));
        assert!(matches!(driver.base_env().get("json"), Some(Value::Codec(_))));
    }

    #[tokio::test]
    async fn evaluate_runs_a_tiny_program_and_reports_the_value() {
        let driver = Driver::new(
            Arc::new(NoopParser),
            Some("main.kl".to_string()),
            PathBuf::from("."),
            TaskFailurePolicy::Defer,
            None,
        );
        let env = Environment::child(driver.base_env());
        let program: Program = vec![
            AstNode::Let {
                pattern: pattern::Pattern::Identifier("x".into()),
                value: Box::new(AstNode::IntLiteral(40)),
            },
            AstNode::Infix {
                op: ast::InfixOp::Add,
                left: Box::new(AstNode::Identifier("x".into(), ast::Token::new(1, 1, None))),
                right: Box::new(AstNode::IntLiteral(2)),
                token: ast::Token::new(1, 1, None),
            },
        ];
        let result = driver.evaluate(&program, &env).await.unwrap();
        assert!(matches!(result, Value::Integer(42)));
        assert!(driver.check_unhandled_task_failures().is_none());
    }
}
