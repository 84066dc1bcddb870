//! Evaluator (C4): walks an `AstNode` tree against an `Environment`,
//! dispatching every construct in spec §4.2 through a single recursive
//! `match`, grounded directly on the teacher's `tick_fiber`/`Instr`
//! dispatch in `bpmn-lite-core/src/vm.rs`. Concurrency nodes (`spawn`,
//! `race`, `await`) reach into `concurrency::{task, channel, runtime}`;
//! everything else is a pure tree walk over `Value`/`Environment`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_recursion::async_recursion;

use crate::ast::{AssignOp, AssignTarget, AstNode, CallArg, InfixOp, ObjectEntry, PostfixOp, PrefixOp, Program, Token};
use crate::builtins::Registry;
use crate::concurrency::runtime::RuntimeState;
use crate::concurrency::task::{CancelToken, TaskHandle, TaskResult};
use crate::debug::{DebugEvent, Debugger, Frame, FrameStack};
use crate::env::Environment;
use crate::error::{EvalError, RecoverableError, RuntimeError};
use crate::module::ModuleLoader;
use crate::pattern::match_pattern;
use crate::value::{FunctionValue, KeyValue, ModuleBuilder, PartialValue, Value};

/// Non-error control flow escaping a block (spec §4.2 "Break/Continue
/// travel out-of-band, not as an error"). Kept entirely out of
/// `EvalError` — see that module's header comment.
#[derive(Debug, Clone)]
pub enum Signal {
    Break(Option<Value>),
    Continue,
}

pub type Outcome = Result<(Value, Option<Signal>), EvalError>;

struct Shared {
    registry: Registry,
    runtime: Arc<RuntimeState>,
    module_loader: Arc<ModuleLoader>,
    debugger: Option<Arc<dyn Debugger>>,
    source_file: Option<String>,
}

/// The evaluator. Cheap to clone — every clone shares the same
/// `Registry`/`RuntimeState`/`ModuleLoader`, but `spawn`/`race`/`then`
/// give the clone moved into a new task a fresh `task`/`frames` identity
/// (spec §4.4: a child task is cancel-independent of its siblings).
#[derive(Clone)]
pub struct Evaluator {
    shared: Arc<Shared>,
    task: TaskHandle,
    frames: Arc<FrameStack>,
}

impl Evaluator {
    pub fn new(
        registry: Registry,
        runtime: Arc<RuntimeState>,
        module_loader: Arc<ModuleLoader>,
        debugger: Option<Arc<dyn Debugger>>,
    ) -> Self {
        let task = TaskHandle::new(runtime.next_task_id(), false, None);
        Evaluator {
            shared: Arc::new(Shared {
                registry,
                runtime,
                module_loader,
                debugger,
                source_file: None,
            }),
            task,
            frames: Arc::new(FrameStack::default()),
        }
    }

    /// Attaches the entry file's name to every task this evaluator (and
    /// its descendants) spawns, so `RuntimeState::record_completion`'s
    /// diagnostics name the script rather than `<task>`. Only meaningful
    /// immediately after `new`, before any clone has escaped.
    pub fn with_source_file(mut self, file: impl Into<String>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.source_file = Some(file.into());
        }
        self
    }

    pub fn runtime(&self) -> &Arc<RuntimeState> {
        &self.shared.runtime
    }

    pub fn task_id(&self) -> u64 {
        self.task.id()
    }

    pub fn current_cancel(&self) -> CancelToken {
        self.task.cancel_token().clone()
    }

    fn source_file(&self) -> Option<String> {
        self.shared.source_file.clone()
    }

    /// Run a whole program (spec §6 Driver API entry point): sequential
    /// top-level statements, no implicit wrapping block. A stray
    /// `break`/`continue` escaping every loop is a runtime error here,
    /// same as escaping a function body.
    pub async fn eval_program(&self, program: &Program, env: &Arc<Environment>) -> Result<Value, EvalError> {
        let (value, signal) = self.eval_block(program, env).await?;
        if signal.is_some() {
            return Err(RuntimeError::new("break/continue used outside of a loop").into());
        }
        Ok(value)
    }

    pub async fn eval_block(&self, nodes: &[AstNode], env: &Arc<Environment>) -> Outcome {
        let mut last = Value::Unit;
        for node in nodes {
            let (v, signal) = self.evaluate(node, env).await?;
            last = v;
            if signal.is_some() {
                return Ok((last, signal));
            }
        }
        Ok((last, None))
    }

    /// Spawns a detached future under a fresh child task, wiring parent
    /// cancellation propagation and `RuntimeState::record_completion`
    /// the same way for every caller (`Spawn` nodes, `Race` arms, and
    /// the `then` builtin all go through this one path).
    pub fn spawn_future<F, Fut>(&self, internal: bool, make_fut: F) -> TaskHandle
    where
        F: FnOnce(Evaluator) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, EvalError>> + Send + 'static,
    {
        let child = TaskHandle::new(self.shared.runtime.next_task_id(), internal, self.source_file());
        child.set_parent(&self.task);
        let child_ev = Evaluator {
            shared: Arc::clone(&self.shared),
            task: child.clone(),
            frames: Arc::new(FrameStack::default()),
        };
        let runtime = Arc::clone(&self.shared.runtime);
        let child_for_complete = child.clone();
        tokio::spawn(async move {
            let result = make_fut(child_ev).await;
            let mapped: TaskResult = result.map_err(Arc::new);
            child_for_complete.complete(mapped.clone());
            runtime.record_completion(&child_for_complete, &mapped);
        });
        child
    }

    fn check_suspension_point(&self) -> Result<(), EvalError> {
        if self.task.cancel_token().is_canceled() {
            return Err(RecoverableError::canceled().into());
        }
        if let Some(err) = self.shared.runtime.fatal_error() {
            return Err((*err).clone());
        }
        Ok(())
    }

    #[async_recursion]
    pub async fn evaluate(&self, node: &AstNode, env: &Arc<Environment>) -> Outcome {
        self.check_suspension_point()?;

        let debug_event = match (&self.shared.debugger, token_of(node)) {
            (Some(_), Some(token)) => Some(DebugEvent::from_token(token, node_kind(node), self.frames.depth(), self.task.id(), env)),
            _ => None,
        };
        if let (Some(debugger), Some(event)) = (&self.shared.debugger, &debug_event) {
            debugger
                .before_node(event)
                .map_err(|_| EvalError::from(RuntimeError::new("debugger terminated the program")))?;
        }

        let result = self.evaluate_inner(node, env).await;

        if let (Some(debugger), Some(event)) = (&self.shared.debugger, &debug_event) {
            debugger
                .after_node(event)
                .map_err(|_| EvalError::from(RuntimeError::new("debugger terminated the program")))?;
        }

        result
    }

    #[async_recursion]
    async fn evaluate_inner(&self, node: &AstNode, env: &Arc<Environment>) -> Outcome {
        match node {
            AstNode::IntLiteral(n) => Ok((Value::Integer(*n), None)),
            AstNode::FloatLiteral(f) => Ok((Value::Float(*f), None)),
            AstNode::BoolLiteral(b) => Ok((Value::Boolean(*b), None)),
            AstNode::StringLiteral(s) => Ok((Value::string(s.clone()), None)),
            AstNode::CharLiteral(c) => Ok((Value::Char(c.clone()), None)),
            AstNode::NullLiteral => Ok((Value::Null, None)),
            AstNode::UnitLiteral => Ok((Value::Unit, None)),

            AstNode::Identifier(name, token) => env
                .get(name)
                .map(|v| (v, None))
                .ok_or_else(|| RuntimeError::at(format!("undefined variable \"{name}\""), token.clone()).into()),

            AstNode::Let { pattern, value } => {
                let (v, _) = self.evaluate(value, env).await?;
                if !match_pattern(pattern, &v, env)? {
                    return Err(RuntimeError::new("let binding pattern did not match value").into());
                }
                Ok((v, None))
            }

            AstNode::Prefix { op, expr, token } => {
                let (v, _) = self.evaluate(expr, env).await?;
                let result = match (op, &v) {
                    (PrefixOp::Not, _) => Value::Boolean(!v.is_truthy()),
                    (PrefixOp::Neg, Value::Integer(n)) => Value::Integer(-n),
                    (PrefixOp::Neg, Value::Float(f)) => Value::Float(-f),
                    _ => {
                        return Err(RuntimeError::at(
                            format!("cannot apply unary operator to {}", v.type_tag()),
                            token.clone(),
                        )
                        .into())
                    }
                };
                Ok((result, None))
            }

            AstNode::Infix { op, left, right, token } => {
                if matches!(op, InfixOp::And) {
                    let (l, _) = self.evaluate(left, env).await?;
                    if !l.is_truthy() {
                        return Ok((Value::Boolean(false), None));
                    }
                    let (r, _) = self.evaluate(right, env).await?;
                    return Ok((Value::Boolean(r.is_truthy()), None));
                }
                if matches!(op, InfixOp::Or) {
                    let (l, _) = self.evaluate(left, env).await?;
                    if l.is_truthy() {
                        return Ok((Value::Boolean(true), None));
                    }
                    let (r, _) = self.evaluate(right, env).await?;
                    return Ok((Value::Boolean(r.is_truthy()), None));
                }
                let (l, _) = self.evaluate(left, env).await?;
                let (r, _) = self.evaluate(right, env).await?;
                Ok((apply_infix(*op, l, r, token)?, None))
            }

            AstNode::Assign { target, op, value, token } => {
                let (rhs, _) = self.evaluate(value, env).await?;
                let result = self.do_assign(target, *op, rhs, env, token).await?;
                Ok((result, None))
            }

            AstNode::Postfix { target, op, token } => {
                let current = self.read_assign_target(target, env, token).await?;
                let delta = match op {
                    PostfixOp::Inc => Value::Integer(1),
                    PostfixOp::Dec => Value::Integer(-1),
                };
                let new_val = apply_infix(InfixOp::Add, current.clone(), delta, token)?;
                self.do_assign(target, AssignOp::Set, new_val, env, token).await?;
                Ok((current, None))
            }

            AstNode::If { condition, then_branch, else_branch } => {
                let (c, _) = self.evaluate(condition, env).await?;
                if c.is_truthy() {
                    self.evaluate(then_branch, env).await
                } else if let Some(eb) = else_branch {
                    self.evaluate(eb, env).await
                } else {
                    Ok((Value::Unit, None))
                }
            }

            AstNode::Block(nodes) => {
                let block_env = Environment::child(env);
                self.eval_block(nodes, &block_env).await
            }

            AstNode::Match { scrutinee, arms, token } => {
                let (value, _) = self.evaluate(scrutinee, env).await?;
                for arm in arms {
                    let arm_env = Environment::child(env);
                    if match_pattern(&arm.pattern, &value, &arm_env)? {
                        if let Some(guard) = &arm.guard {
                            let (g, _) = self.evaluate(guard, &arm_env).await?;
                            if !g.is_truthy() {
                                continue;
                            }
                        }
                        return self.evaluate(&arm.body, &arm_env).await;
                    }
                }
                Err(RuntimeError::at("no match arm matched the value", token.clone()).into())
            }

            AstNode::For { pre, condition, step, body, then_block } => {
                let loop_env = Environment::child(env);
                if let Some(pre) = pre {
                    self.evaluate(pre, &loop_env).await?;
                }
                let mut broke = false;
                let mut broke_with = None;
                loop {
                    self.check_suspension_point()?;
                    if let Some(cond) = condition {
                        let (c, _) = self.evaluate(cond, &loop_env).await?;
                        if !c.is_truthy() {
                            break;
                        }
                    }
                    let (_, signal) = self.evaluate(body, &loop_env).await?;
                    match signal {
                        Some(Signal::Break(v)) => {
                            broke = true;
                            broke_with = v;
                            break;
                        }
                        Some(Signal::Continue) | None => {}
                    }
                    if let Some(step) = step {
                        self.evaluate(step, &loop_env).await?;
                    }
                }
                if !broke {
                    if let Some(then_block) = then_block {
                        self.evaluate(then_block, &loop_env).await?;
                    }
                }
                Ok((broke_with.unwrap_or(Value::Unit), None))
            }

            AstNode::Break { value, token: _ } => {
                let v = match value {
                    Some(node) => Some(self.evaluate(node, env).await?.0),
                    None => None,
                };
                Ok((Value::Unit, Some(Signal::Break(v))))
            }
            AstNode::Continue(_) => Ok((Value::Unit, Some(Signal::Continue))),

            AstNode::Lambda { params, body, name } => Ok((
                Value::Function(Arc::new(FunctionValue {
                    params: params.clone(),
                    body: Arc::new((**body).clone()),
                    env: Arc::clone(env),
                    name: name.clone(),
                })),
                None,
            )),

            AstNode::Call { callee, args, token } => {
                let (callee_val, _) = self.evaluate(callee, env).await?;
                let mut resolved: Vec<Option<Value>> = Vec::with_capacity(args.len());
                for a in args {
                    match a {
                        CallArg::Value(node) => resolved.push(Some(self.evaluate(node, env).await?.0)),
                        CallArg::Placeholder => resolved.push(None),
                    }
                }
                if resolved.iter().any(Option::is_none) {
                    return Ok((
                        Value::Partial(Arc::new(PartialValue { callee: Box::new(callee_val), bound: resolved })),
                        None,
                    ));
                }
                let args: Vec<Value> = resolved.into_iter().map(|v| v.unwrap()).collect();
                let result = self
                    .apply_callable(callee_val, args)
                    .await
                    .map_err(|e| attach_token(e, token))?;
                Ok((result, None))
            }

            AstNode::Member { object, key, token } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                match &obj_val {
                    Value::Object(o) => {
                        if let Some(v) = o.read().unwrap().get(key).cloned() {
                            return Ok((v, None));
                        }
                    }
                    Value::Module(menv) => {
                        if let Some(v) = menv.get_local(key) {
                            return Ok((v, None));
                        }
                    }
                    Value::Array(_) | Value::String(_) if key == "length" => {
                        let len = obj_val.length().expect("Array/String are sized");
                        return Ok((Value::Integer(len as i64), None));
                    }
                    _ => {}
                }
                if let Some(static_name) = self.shared.registry.resolve_static_name(key) {
                    return Ok((crate::builtins::bind_receiver(static_name, obj_val), None));
                }
                Err(RuntimeError::at(format!("no property \"{key}\" on {}", obj_val.type_tag()), token.clone()).into())
            }

            AstNode::Index { object, index, token } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                let (idx_val, _) = self.evaluate(index, env).await?;
                let v = match (&obj_val, &idx_val) {
                    (Value::Array(a), Value::Integer(i)) => {
                        let items = a.read().unwrap();
                        items.get(normalize_index(*i, items.len())).cloned()
                    }
                    (Value::String(s), Value::Integer(i)) => {
                        let chars: Vec<char> = s.chars().collect();
                        chars
                            .get(normalize_index(*i, chars.len()))
                            .map(|c| Value::Char(c.to_string()))
                    }
                    (Value::Map(m), key) => {
                        let k = KeyValue::from_value(key)
                            .ok_or_else(|| RuntimeError::at("invalid map key", token.clone()))?;
                        return Ok((m.read().unwrap().get(&k).cloned().unwrap_or(Value::Null), None));
                    }
                    _ => {
                        return Err(RuntimeError::at(
                            format!("cannot index {} with {}", obj_val.type_tag(), idx_val.type_tag()),
                            token.clone(),
                        )
                        .into())
                    }
                };
                v.map(|v| (v, None))
                    .ok_or_else(|| RuntimeError::at("index out of bounds", token.clone()).into())
            }

            AstNode::Slice { object, start, end, token } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                let len = obj_val
                    .length()
                    .ok_or_else(|| RuntimeError::at(format!("cannot slice {}", obj_val.type_tag()), token.clone()))?;
                let lo = match start {
                    Some(s) => clamp_index(expect_index(self.evaluate(s, env).await?.0, token)?, len),
                    None => 0,
                };
                let hi = match end {
                    Some(e) => clamp_index(expect_index(self.evaluate(e, env).await?.0, token)?, len),
                    None => len,
                };
                match &obj_val {
                    Value::Array(a) => {
                        let items = a.read().unwrap();
                        let slice = if lo >= hi { Vec::new() } else { items[lo..hi].to_vec() };
                        Ok((Value::array(slice), None))
                    }
                    Value::String(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let slice: String = if lo >= hi { String::new() } else { chars[lo..hi].iter().collect() };
                        Ok((Value::string(slice), None))
                    }
                    other => Err(RuntimeError::at(format!("cannot slice {}", other.type_tag()), token.clone()).into()),
                }
            }

            AstNode::Range { start, end, step, token } => {
                let (s, _) = self.evaluate(start, env).await?;
                let (e, _) = self.evaluate(end, env).await?;
                let raw_step = match step {
                    Some(st) => Some(self.evaluate(st, env).await?.0),
                    None => None,
                };
                match (s, e) {
                    (Value::Integer(a), Value::Integer(b)) => {
                        let step_val = match raw_step {
                            Some(v) => expect_index(v, token)?,
                            None => 1,
                        };
                        if step_val == 0 {
                            return Err(RuntimeError::at("range step must not be zero", token.clone()).into());
                        }
                        let mut out = Vec::new();
                        if step_val > 0 {
                            let mut i = a;
                            while i <= b {
                                out.push(Value::Integer(i));
                                i += step_val;
                            }
                        } else {
                            let mut i = a;
                            while i >= b {
                                out.push(Value::Integer(i));
                                i += step_val;
                            }
                        }
                        Ok((Value::array(out), None))
                    }
                    (Value::Float(a), Value::Float(b)) => {
                        let step_val = match raw_step {
                            Some(v) => expect_range_float(v, token)?,
                            None => 1.0,
                        };
                        if step_val == 0.0 {
                            return Err(RuntimeError::at("range step must not be zero", token.clone()).into());
                        }
                        let mut out = Vec::new();
                        if step_val > 0.0 {
                            let mut i = a;
                            while i < b {
                                out.push(Value::Float(i));
                                i += step_val;
                            }
                        } else {
                            let mut i = a;
                            while i > b {
                                out.push(Value::Float(i));
                                i += step_val;
                            }
                        }
                        Ok((Value::array(out), None))
                    }
                    (Value::Char(a), Value::Char(b)) => {
                        let step_val = match raw_step {
                            Some(v) => expect_index(v, token)?,
                            None => 1,
                        };
                        if step_val == 0 {
                            return Err(RuntimeError::at("range step must not be zero", token.clone()).into());
                        }
                        let a = a.chars().next().ok_or_else(|| RuntimeError::at("empty char in range", token.clone()))?;
                        let b = b.chars().next().ok_or_else(|| RuntimeError::at("empty char in range", token.clone()))?;
                        let mut out = Vec::new();
                        if step_val > 0 {
                            let mut i = a as i64;
                            while i <= b as i64 {
                                if let Some(c) = char::from_u32(i as u32) {
                                    out.push(Value::Char(c.to_string()));
                                }
                                i += step_val;
                            }
                        } else {
                            let mut i = a as i64;
                            while i >= b as i64 {
                                if let Some(c) = char::from_u32(i as u32) {
                                    out.push(Value::Char(c.to_string()));
                                }
                                i += step_val;
                            }
                        }
                        Ok((Value::array(out), None))
                    }
                    (s, _) => Err(RuntimeError::at(
                        format!("range requires homogeneous Int/Float/Char bounds, got {}", s.type_tag()),
                        token.clone(),
                    )
                    .into()),
                }
            }

            AstNode::ArrayLiteral(nodes) => {
                let mut out = Vec::with_capacity(nodes.len());
                for n in nodes {
                    out.push(self.evaluate(n, env).await?.0);
                }
                Ok((Value::array(out), None))
            }

            AstNode::ObjectLiteral(entries) => {
                let mut fields = HashMap::new();
                for entry in entries {
                    match entry {
                        ObjectEntry::Pair { key, value } => {
                            let (v, _) = self.evaluate(value, env).await?;
                            fields.insert(key.clone(), v);
                        }
                        ObjectEntry::Spread(expr) => {
                            let (v, _) = self.evaluate(expr, env).await?;
                            match v {
                                Value::Object(o) => fields.extend(o.read().unwrap().clone()),
                                Value::Module(menv) => fields.extend(menv.snapshot()),
                                other => {
                                    return Err(RuntimeError::new(format!("cannot spread {}", other.type_tag())).into())
                                }
                            }
                        }
                    }
                }
                Ok((Value::object(fields), None))
            }

            AstNode::Query { source, binding, wheres, order_by, select, token } => {
                self.eval_query(source, binding, wheres, order_by, select, token, env).await
            }

            AstNode::Recover { target, fallback } => match self.evaluate(target, env).await {
                Ok(result) => Ok(result),
                Err(e) if e.is_recoverable_by_expr() => {
                    let (kind, message) = e.as_kind_message();
                    let fb_env = Environment::child(env);
                    let mut fields = HashMap::new();
                    fields.insert("kind".to_string(), Value::string(kind));
                    fields.insert("message".to_string(), Value::string(message));
                    fb_env.define("error", Value::object(fields));
                    self.evaluate(fallback, &fb_env).await
                }
                Err(e) => Err(e),
            },

            AstNode::Await { target, token } => {
                let (target_val, _) = self.evaluate(target, env).await?;
                match target_val {
                    Value::Task(t) => match t.await_result(&self.current_cancel()).await {
                        Ok(v) => Ok((v, None)),
                        Err(e) => Err((*e).clone()),
                    },
                    other => Err(RuntimeError::at(format!("await: expected a task, got {}", other.type_tag()), token.clone()).into()),
                }
            }

            AstNode::Spawn { body, token: _ } => {
                let body = Arc::new(body.clone());
                let base_env = Arc::clone(env);
                let child = self.spawn_future(false, move |child_ev| async move {
                    let block_env = Environment::child(&base_env);
                    child_ev.frames.push(Frame { function_name: None, called_at: None }, child_ev.shared.debugger.as_deref());
                    let result = child_ev.eval_block(&body, &block_env).await;
                    child_ev.frames.pop(child_ev.shared.debugger.as_deref());
                    result.map(|(v, _)| v)
                });
                Ok((Value::Task(child), None))
            }

            AstNode::Race { arms, token: _ } => self.eval_race(arms, env).await,

            AstNode::Import { path, token } => {
                let resolved = self
                    .shared
                    .module_loader
                    .resolve(path, env)
                    .map_err(|e| EvalError::from(e.with_token(token.clone())))?;
                Ok((resolved, None))
            }
        }
    }

    #[async_recursion]
    async fn eval_query(
        &self,
        source: &AstNode,
        binding: &str,
        wheres: &[AstNode],
        order_by: &Option<Box<AstNode>>,
        select: &AstNode,
        token: &Token,
        env: &Arc<Environment>,
    ) -> Outcome {
        let (src_val, _) = self.evaluate(source, env).await?;
        let Value::Array(arr) = src_val else {
            return Err(RuntimeError::at(format!("query source must be an array, got {}", src_val.type_tag()), token.clone()).into());
        };
        let items = arr.read().unwrap().clone();

        let mut kept: Vec<(Value, Option<Value>)> = Vec::new();
        for item in items {
            let item_env = Environment::child(env);
            item_env.define(binding.to_string(), item.clone());
            let mut include = true;
            for w in wheres {
                let (cond, _) = self.evaluate(w, &item_env).await?;
                if !cond.is_truthy() {
                    include = false;
                    break;
                }
            }
            if !include {
                continue;
            }
            let sort_key = match order_by {
                Some(ob) => Some(self.evaluate(ob, &item_env).await?.0),
                None => None,
            };
            kept.push((item, sort_key));
        }

        if order_by.is_some() {
            kept.sort_by(|a, b| crate::builtins::collections::default_scalar_cmp(a.1.as_ref().unwrap(), b.1.as_ref().unwrap()));
        }

        let mut out = Vec::with_capacity(kept.len());
        for (item, _) in kept {
            let item_env = Environment::child(env);
            item_env.define(binding.to_string(), item);
            out.push(self.evaluate(select, &item_env).await?.0);
        }
        Ok((Value::array(out), None))
    }

    async fn eval_race(&self, arms: &[AstNode], env: &Arc<Environment>) -> Outcome {
        let (tx, mut rx) = tokio::sync::mpsc::channel(arms.len().max(1));
        let mut children = Vec::with_capacity(arms.len());
        for arm in arms {
            let arm = Arc::new(arm.clone());
            let base_env = Arc::clone(env);
            let txc = tx.clone();
            let child = self.spawn_future(true, move |child_ev| async move {
                let result = child_ev.evaluate(&arm, &base_env).await.map(|(v, _)| v);
                let _ = txc.send(result.clone().map_err(Arc::new)).await;
                result
            });
            children.push(child);
        }
        drop(tx);

        let cancel = self.current_cancel();
        let winner: TaskResult = tokio::select! {
            _ = cancel.canceled() => Err(Arc::new(RecoverableError::canceled().into())),
            received = rx.recv() => received.unwrap_or_else(|| Err(Arc::new(RecoverableError::canceled().into()))),
        };
        for child in &children {
            child.cancel();
        }
        winner.map(|v| (v, None)).map_err(|e| (*e).clone())
    }

    /// Applies a callable `Value` to already-evaluated arguments. The
    /// landing spot for `Call` nodes with no placeholder holes, and for
    /// every builtin that calls back into user code (`map`, `filter`,
    /// `sort`'s comparator, an HTTP handler, ...).
    #[async_recursion]
    pub async fn apply_callable(&self, callee: Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match callee {
            Value::Function(f) => self.call_function(&f, args).await,
            Value::Builtin(name) => {
                let builtin = self
                    .shared
                    .registry
                    .get(name)
                    .ok_or_else(|| RuntimeError::new(format!("unknown builtin \"{name}\"")))?;
                builtin.call(self, args).await
            }
            Value::Partial(p) => self.call_partial(&p, args).await,
            Value::Shape(f) => {
                if args.len() != 1 {
                    return Err(crate::builtins::arity_error("shape", "1", args.len()));
                }
                f(&args[0]).map_err(Into::into)
            }
            Value::ModuleBuilder(mb) => {
                if !args.is_empty() {
                    return Err(RuntimeError::new("module activation takes no arguments").into());
                }
                self.activate_module(&mb).await
            }
            other => Err(RuntimeError::new(format!("{} is not callable", other.type_tag())).into()),
        }
    }

    async fn call_function(&self, f: &FunctionValue, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.len() != f.params.len() {
            return Err(RuntimeError::new(format!(
                "{}: expected {} argument(s), got {}",
                f.name.as_deref().unwrap_or("<lambda>"),
                f.params.len(),
                args.len()
            ))
            .into());
        }
        let call_env = Environment::child(&f.env);
        for (pattern, value) in f.params.iter().zip(args.iter()) {
            if !match_pattern(pattern, value, &call_env)? {
                return Err(RuntimeError::new("argument did not match parameter pattern").into());
            }
        }
        self.frames.push(
            Frame { function_name: f.name.clone(), called_at: None },
            self.shared.debugger.as_deref(),
        );
        let result = self.evaluate(&f.body, &call_env).await;
        self.frames.pop(self.shared.debugger.as_deref());
        let (value, signal) = result?;
        if signal.is_some() {
            return Err(RuntimeError::new("break/continue used outside of a loop").into());
        }
        Ok(value)
    }

    #[async_recursion]
    async fn call_partial(&self, p: &PartialValue, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut filled = p.bound.clone();
        let mut incoming = args.into_iter();
        for slot in filled.iter_mut() {
            if slot.is_none() {
                match incoming.next() {
                    Some(v) => *slot = Some(v),
                    None => break,
                }
            }
        }
        let leftover: Vec<Value> = incoming.collect();
        if filled.iter().any(Option::is_none) {
            return Ok(Value::Partial(Arc::new(PartialValue { callee: p.callee.clone(), bound: filled })));
        }
        let mut call_args: Vec<Value> = filled.into_iter().map(|s| s.unwrap()).collect();
        call_args.extend(leftover);
        self.apply_callable((*p.callee).clone(), call_args).await
    }

    #[async_recursion]
    async fn activate_module(&self, mb: &ModuleBuilder) -> Result<Value, EvalError> {
        let module_env = Environment::child(&mb.base_env);
        for node in mb.program.iter() {
            self.evaluate(node, &module_env).await?;
        }
        Ok(Value::Module(module_env))
    }

    #[async_recursion]
    async fn do_assign(
        &self,
        target: &AssignTarget,
        op: AssignOp,
        rhs: Value,
        env: &Arc<Environment>,
        token: &Token,
    ) -> Result<Value, EvalError> {
        match target {
            AssignTarget::Identifier(name) => {
                let final_val = if matches!(op, AssignOp::Set) {
                    rhs
                } else {
                    let current = env
                        .get(name)
                        .ok_or_else(|| RuntimeError::at(format!("undefined variable \"{name}\""), token.clone()))?;
                    apply_infix(assign_op_to_infix(op), current, rhs, token)?
                };
                if !env.set(name, final_val.clone()) {
                    return Err(RuntimeError::at(format!("undefined variable \"{name}\""), token.clone()).into());
                }
                Ok(final_val)
            }
            AssignTarget::Member { object, key } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                let Value::Object(o) = &obj_val else {
                    return Err(RuntimeError::at(format!("cannot assign a member on {}", obj_val.type_tag()), token.clone()).into());
                };
                let final_val = if matches!(op, AssignOp::Set) {
                    rhs
                } else {
                    let current = o.read().unwrap().get(key).cloned().unwrap_or(Value::Null);
                    apply_infix(assign_op_to_infix(op), current, rhs, token)?
                };
                o.write().unwrap().insert(key.clone(), final_val.clone());
                Ok(final_val)
            }
            AssignTarget::Index { object, index } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                let (idx_val, _) = self.evaluate(index, env).await?;
                match (&obj_val, &idx_val) {
                    (Value::Array(a), Value::Integer(i)) => {
                        let mut items = a.write().unwrap();
                        let idx = normalize_index(*i, items.len());
                        let current = items
                            .get(idx)
                            .cloned()
                            .ok_or_else(|| RuntimeError::at("index out of bounds", token.clone()))?;
                        let final_val = if matches!(op, AssignOp::Set) {
                            rhs
                        } else {
                            apply_infix(assign_op_to_infix(op), current, rhs, token)?
                        };
                        items[idx] = final_val.clone();
                        Ok(final_val)
                    }
                    (Value::Map(m), key) => {
                        let k = KeyValue::from_value(key)
                            .ok_or_else(|| RuntimeError::at("invalid map key", token.clone()))?;
                        let mut map = m.write().unwrap();
                        let final_val = if matches!(op, AssignOp::Set) {
                            rhs
                        } else {
                            let current = map.get(&k).cloned().unwrap_or(Value::Null);
                            apply_infix(assign_op_to_infix(op), current, rhs, token)?
                        };
                        map.insert(k, final_val.clone());
                        Ok(final_val)
                    }
                    _ => Err(RuntimeError::at(
                        format!("cannot index-assign {} with {}", obj_val.type_tag(), idx_val.type_tag()),
                        token.clone(),
                    )
                    .into()),
                }
            }
        }
    }

    #[async_recursion]
    async fn read_assign_target(&self, target: &AssignTarget, env: &Arc<Environment>, token: &Token) -> Result<Value, EvalError> {
        match target {
            AssignTarget::Identifier(name) => env
                .get(name)
                .ok_or_else(|| RuntimeError::at(format!("undefined variable \"{name}\""), token.clone()).into()),
            AssignTarget::Member { object, key } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                match &obj_val {
                    Value::Object(o) => Ok(o.read().unwrap().get(key).cloned().unwrap_or(Value::Null)),
                    other => Err(RuntimeError::at(format!("cannot read a member on {}", other.type_tag()), token.clone()).into()),
                }
            }
            AssignTarget::Index { object, index } => {
                let (obj_val, _) = self.evaluate(object, env).await?;
                let (idx_val, _) = self.evaluate(index, env).await?;
                match (&obj_val, &idx_val) {
                    (Value::Array(a), Value::Integer(i)) => {
                        let items = a.read().unwrap();
                        items
                            .get(normalize_index(*i, items.len()))
                            .cloned()
                            .ok_or_else(|| RuntimeError::at("index out of bounds", token.clone()).into())
                    }
                    (Value::Map(m), key) => {
                        let k = KeyValue::from_value(key)
                            .ok_or_else(|| RuntimeError::at("invalid map key", token.clone()))?;
                        Ok(m.read().unwrap().get(&k).cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(RuntimeError::at("cannot read indexed target", token.clone()).into()),
                }
            }
        }
    }
}

fn assign_op_to_infix(op: AssignOp) -> InfixOp {
    match op {
        AssignOp::Set => unreachable!("AssignOp::Set has no infix form"),
        AssignOp::AddSet => InfixOp::Add,
        AssignOp::SubSet => InfixOp::Sub,
        AssignOp::MulSet => InfixOp::Mul,
        AssignOp::DivSet => InfixOp::Div,
        AssignOp::ModSet => InfixOp::Mod,
    }
}

fn attach_token(err: EvalError, token: &Token) -> EvalError {
    match err {
        EvalError::Runtime(mut e) => {
            if e.token.is_none() {
                e.token = Some(token.clone());
            }
            EvalError::Runtime(e)
        }
        EvalError::Recoverable(mut e) => {
            if e.token.is_none() {
                e.token = Some(token.clone());
            }
            EvalError::Recoverable(e)
        }
        other => other,
    }
}

fn normalize_index(i: i64, len: usize) -> usize {
    if i < 0 {
        let from_end = (-i) as usize;
        if from_end > len {
            usize::MAX
        } else {
            len - from_end
        }
    } else {
        i as usize
    }
}

fn expect_index(v: Value, token: &Token) -> Result<i64, EvalError> {
    match v {
        Value::Integer(n) => Ok(n),
        other => Err(RuntimeError::at(format!("expected an integer index, got {}", other.type_tag()), token.clone()).into()),
    }
}

fn expect_range_float(v: Value, token: &Token) -> Result<f64, EvalError> {
    match v {
        Value::Float(f) => Ok(f),
        Value::Integer(n) => Ok(n as f64),
        other => Err(RuntimeError::at(format!("expected a number for a float range step, got {}", other.type_tag()), token.clone()).into()),
    }
}

fn clamp_index(i: i64, len: usize) -> usize {
    let idx = if i < 0 { len as i64 + i } else { i };
    idx.clamp(0, len as i64) as usize
}

fn apply_infix(op: InfixOp, l: Value, r: Value, token: &Token) -> Result<Value, EvalError> {
    use InfixOp::*;
    match op {
        Eq => Ok(Value::Boolean(l.strict_eq(&r))),
        NotEq => Ok(Value::Boolean(!l.strict_eq(&r))),
        Eqv => Ok(Value::Boolean(l.eqv(&r))),
        NotEqv => Ok(Value::Boolean(!l.eqv(&r))),
        Add => numeric_or_concat(l, r, token),
        Sub => numeric(l, r, token, |a, b| a - b, |a, b| a - b),
        Mul => numeric(l, r, token, |a, b| a * b, |a, b| a * b),
        Div => numeric_div(l, r, token),
        Mod => numeric_mod(l, r, token),
        Lt => compare(l, r, token, |o| o == Ordering::Less),
        Lte => compare(l, r, token, |o| o != Ordering::Greater),
        Gt => compare(l, r, token, |o| o == Ordering::Greater),
        Gte => compare(l, r, token, |o| o != Ordering::Less),
        And | Or => unreachable!("And/Or short-circuit before reaching apply_infix"),
    }
}

fn numeric_or_concat(l: Value, r: Value, token: &Token) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.read().unwrap().clone();
            out.extend(b.read().unwrap().clone());
            Ok(Value::array(out))
        }
        _ => numeric(l, r, token, |a, b| a + b, |a, b| a + b),
    }
}

fn numeric(l: Value, r: Value, token: &Token, fi: fn(i64, i64) -> i64, ff: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(fi(a, b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(ff(a, b))),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(ff(a as f64, b))),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(ff(a, b as f64))),
        (l, r) => Err(RuntimeError::at(
            format!("cannot apply arithmetic to {} and {}", l.type_tag(), r.type_tag()),
            token.clone(),
        )
        .into()),
    }
}

fn numeric_div(l: Value, r: Value, token: &Token) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            if b == 0 {
                return Err(RecoverableError::new("divide_by_zero", "division by zero").into());
            }
            Ok(Value::Integer(a / b))
        }
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 / b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a / b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (l, r) => Err(RuntimeError::at(
            format!("cannot apply arithmetic to {} and {}", l.type_tag(), r.type_tag()),
            token.clone(),
        )
        .into()),
    }
}

fn numeric_mod(l: Value, r: Value, token: &Token) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            if b == 0 {
                return Err(RecoverableError::new("divide_by_zero", "modulo by zero").into());
            }
            Ok(Value::Integer(a % b))
        }
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 % b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a % b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
        (l, r) => Err(RuntimeError::at(
            format!("cannot apply arithmetic to {} and {}", l.type_tag(), r.type_tag()),
            token.clone(),
        )
        .into()),
    }
}

fn compare(l: Value, r: Value, token: &Token, pred: fn(Ordering) -> bool) -> Result<Value, EvalError> {
    let ord = match (&l, &r) {
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| RuntimeError::at("NaN is not ordered", token.clone()))?,
        (Value::Integer(a), Value::Float(b)) => (*a as f64)
            .partial_cmp(b)
            .ok_or_else(|| RuntimeError::at("NaN is not ordered", token.clone()))?,
        (Value::Float(a), Value::Integer(b)) => a
            .partial_cmp(&(*b as f64))
            .ok_or_else(|| RuntimeError::at("NaN is not ordered", token.clone()))?,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (l, r) => {
            return Err(RuntimeError::at(format!("cannot compare {} and {}", l.type_tag(), r.type_tag()), token.clone()).into())
        }
    };
    Ok(Value::Boolean(pred(ord)))
}

fn token_of(node: &AstNode) -> Option<&Token> {
    use AstNode::*;
    match node {
        Identifier(_, t)
        | Prefix { token: t, .. }
        | Infix { token: t, .. }
        | Assign { token: t, .. }
        | Postfix { token: t, .. }
        | Match { token: t, .. }
        | Break { token: t, .. }
        | Continue(t)
        | Call { token: t, .. }
        | Member { token: t, .. }
        | Index { token: t, .. }
        | Slice { token: t, .. }
        | Range { token: t, .. }
        | Query { token: t, .. }
        | Await { token: t, .. }
        | Spawn { token: t, .. }
        | Race { token: t, .. }
        | Import { token: t, .. } => Some(t),
        _ => None,
    }
}

fn node_kind(node: &AstNode) -> &'static str {
    use AstNode::*;
    match node {
        IntLiteral(_) => "int_literal",
        FloatLiteral(_) => "float_literal",
        BoolLiteral(_) => "bool_literal",
        StringLiteral(_) => "string_literal",
        CharLiteral(_) => "char_literal",
        NullLiteral => "null_literal",
        UnitLiteral => "unit_literal",
        Identifier(..) => "identifier",
        Let { .. } => "let",
        Prefix { .. } => "prefix",
        Infix { .. } => "infix",
        Assign { .. } => "assign",
        Postfix { .. } => "postfix",
        If { .. } => "if",
        Block(_) => "block",
        Match { .. } => "match",
        For { .. } => "for",
        Break { .. } => "break",
        Continue(_) => "continue",
        Lambda { .. } => "lambda",
        Call { .. } => "call",
        Member { .. } => "member",
        Index { .. } => "index",
        Slice { .. } => "slice",
        Range { .. } => "range",
        ArrayLiteral(_) => "array_literal",
        ObjectLiteral(_) => "object_literal",
        Query { .. } => "query",
        Recover { .. } => "recover",
        Await { .. } => "await",
        Spawn { .. } => "spawn",
        Race { .. } => "race",
        Import { .. } => "import",
    }
}

/// Lightweight `Evaluator` construction for builtins' unit tests — no
/// embedder, no parser, no debugger. Mirrors the teacher's in-memory
/// store fixtures used across `bpmn-lite-core`'s test modules.
pub mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::ast::{ParseError, Parser, Program};
    use crate::concurrency::runtime::{RuntimeState, TaskFailurePolicy};
    use crate::module::ModuleLoader;

    use super::Evaluator;

    struct NoopParser;

    impl Parser for NoopParser {
        fn parse(&self, _source: &str, _filename: &str) -> Result<Arc<Program>, ParseError> {
            Ok(Arc::new(Vec::new()))
        }
    }

    pub fn test_evaluator() -> Evaluator {
        let runtime = RuntimeState::new(TaskFailurePolicy::Defer);
        let loader = ModuleLoader::new(Arc::new(NoopParser), PathBuf::from("."));
        Evaluator::new(crate::builtins::register_builtins(), runtime, loader, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::MatchArm;
    use crate::pattern::{LiteralPattern, Pattern};

    fn tok() -> Token {
        Token::new(1, 1, None)
    }

    #[tokio::test]
    async fn arithmetic_and_precedence_free_infix_chain() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        // (2 + 3) * 4 built directly as a tree, since there's no parser here.
        let node = AstNode::Infix {
            op: InfixOp::Mul,
            left: Box::new(AstNode::Infix {
                op: InfixOp::Add,
                left: Box::new(AstNode::IntLiteral(2)),
                right: Box::new(AstNode::IntLiteral(3)),
                token: tok(),
            }),
            right: Box::new(AstNode::IntLiteral(4)),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(20)));
    }

    #[tokio::test]
    async fn logical_and_or_return_booleans_not_operands() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        // 5 && 3 -> true, not Integer(3).
        let and_node = AstNode::Infix {
            op: InfixOp::And,
            left: Box::new(AstNode::IntLiteral(5)),
            right: Box::new(AstNode::IntLiteral(3)),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&and_node, &env).await.unwrap();
        assert!(matches!(v, Value::Boolean(true)));

        // 0 || "hi" -> true, not String("hi").
        let or_node = AstNode::Infix {
            op: InfixOp::Or,
            left: Box::new(AstNode::IntLiteral(0)),
            right: Box::new(AstNode::StringLiteral("hi".to_string())),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&or_node, &env).await.unwrap();
        assert!(matches!(v, Value::Boolean(true)));

        // 0 && anything short-circuits to false without evaluating rhs.
        let short_circuit = AstNode::Infix {
            op: InfixOp::And,
            left: Box::new(AstNode::IntLiteral(0)),
            right: Box::new(AstNode::IntLiteral(1)),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&short_circuit, &env).await.unwrap();
        assert!(matches!(v, Value::Boolean(false)));
    }

    #[tokio::test]
    async fn range_supports_float_half_open_and_char_inclusive() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();

        let float_range = AstNode::Range {
            start: Box::new(AstNode::FloatLiteral(0.0)),
            end: Box::new(AstNode::FloatLiteral(1.0)),
            step: Some(Box::new(AstNode::FloatLiteral(0.5))),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&float_range, &env).await.unwrap();
        let Value::Array(arr) = v else { panic!("expected array") };
        let items = arr.read().unwrap().clone();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Value::Float(f) if f == 0.0));
        assert!(matches!(items[1], Value::Float(f) if f == 0.5));

        let char_range = AstNode::Range {
            start: Box::new(AstNode::CharLiteral("a".to_string())),
            end: Box::new(AstNode::CharLiteral("c".to_string())),
            step: None,
            token: tok(),
        };
        let (v, _) = ev.evaluate(&char_range, &env).await.unwrap();
        let Value::Array(arr) = v else { panic!("expected array") };
        let items = arr.read().unwrap().clone();
        let chars: Vec<String> = items
            .into_iter()
            .map(|v| match v {
                Value::Char(c) => c,
                other => panic!("expected char, got {other:?}"),
            })
            .collect();
        assert_eq!(chars, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn array_and_string_length_member_access() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();

        let str_len = AstNode::Member {
            object: Box::new(AstNode::StringLiteral("héllo".to_string())),
            key: "length".to_string(),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&str_len, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(5)));

        let arr_len = AstNode::Member {
            object: Box::new(AstNode::ArrayLiteral(vec![
                AstNode::IntLiteral(1),
                AstNode::IntLiteral(2),
                AstNode::IntLiteral(3),
            ])),
            key: "length".to_string(),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&arr_len, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(3)));
    }

    #[tokio::test]
    async fn division_by_zero_is_recoverable() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Infix {
            op: InfixOp::Div,
            left: Box::new(AstNode::IntLiteral(1)),
            right: Box::new(AstNode::IntLiteral(0)),
            token: tok(),
        };
        let err = ev.evaluate(&node, &env).await.unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "divide_by_zero"));
    }

    #[tokio::test]
    async fn let_binds_into_current_scope() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Let {
            pattern: Pattern::Identifier("x".into()),
            value: Box::new(AstNode::IntLiteral(9)),
        };
        ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(env.get("x"), Some(Value::Integer(9))));
    }

    #[tokio::test]
    async fn for_loop_accumulates_and_then_runs_on_normal_exit() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        env.define("total", Value::Integer(0));
        env.define("ran_then", Value::Boolean(false));
        let node = AstNode::For {
            pre: Some(Box::new(AstNode::Let {
                pattern: Pattern::Identifier("i".into()),
                value: Box::new(AstNode::IntLiteral(0)),
            })),
            condition: Some(Box::new(AstNode::Infix {
                op: InfixOp::Lt,
                left: Box::new(AstNode::Identifier("i".into(), tok())),
                right: Box::new(AstNode::IntLiteral(3)),
                token: tok(),
            })),
            step: Some(Box::new(AstNode::Postfix {
                target: AssignTarget::Identifier("i".into()),
                op: PostfixOp::Inc,
                token: tok(),
            })),
            body: Box::new(AstNode::Assign {
                target: AssignTarget::Identifier("total".into()),
                op: AssignOp::AddSet,
                value: Box::new(AstNode::Identifier("i".into(), tok())),
                token: tok(),
            }),
            then_block: Some(Box::new(AstNode::Assign {
                target: AssignTarget::Identifier("ran_then".into()),
                op: AssignOp::Set,
                value: Box::new(AstNode::BoolLiteral(true)),
                token: tok(),
            })),
        };
        ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(env.get("total"), Some(Value::Integer(3))));
        assert!(matches!(env.get("ran_then"), Some(Value::Boolean(true))));
    }

    #[tokio::test]
    async fn break_with_value_stops_the_loop_and_skips_then() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::For {
            pre: None,
            condition: None,
            step: None,
            body: Box::new(AstNode::Break {
                value: Some(Box::new(AstNode::StringLiteral("done".to_string()))),
                token: tok(),
            }),
            then_block: Some(Box::new(AstNode::Assign {
                target: AssignTarget::Identifier("unreachable".into()),
                op: AssignOp::Set,
                value: Box::new(AstNode::BoolLiteral(true)),
                token: tok(),
            })),
        };
        env.define("unreachable", Value::Boolean(false));
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::String(s) if s.as_str() == "done"));
        assert!(matches!(env.get("unreachable"), Some(Value::Boolean(false))));
    }

    #[tokio::test]
    async fn lambda_call_and_closure_capture() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        env.define("offset", Value::Integer(10));
        let make_adder = AstNode::Lambda {
            params: vec![Pattern::Identifier("x".into())],
            body: Box::new(AstNode::Infix {
                op: InfixOp::Add,
                left: Box::new(AstNode::Identifier("x".into(), tok())),
                right: Box::new(AstNode::Identifier("offset".into(), tok())),
                token: tok(),
            }),
            name: None,
        };
        let (func, _) = ev.evaluate(&make_adder, &env).await.unwrap();
        let result = ev.apply_callable(func, vec![Value::Integer(5)]).await.unwrap();
        assert!(matches!(result, Value::Integer(15)));
    }

    #[tokio::test]
    async fn currying_call_with_placeholder_returns_partial() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Call {
            callee: Box::new(AstNode::Identifier("add".into(), tok())),
            args: vec![CallArg::Placeholder, CallArg::Value(AstNode::IntLiteral(1))],
            token: tok(),
        };
        // `add` isn't bound in scope, so evaluate the callee as a raw
        // builtin value directly instead.
        env.define("add", Value::Builtin("len"));
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::Partial(_)));
    }

    #[tokio::test]
    async fn match_falls_through_to_next_arm_on_guard_failure() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Match {
            scrutinee: Box::new(AstNode::IntLiteral(5)),
            arms: vec![
                MatchArm {
                    pattern: Pattern::Identifier("n".into()),
                    guard: Some(Box::new(AstNode::Infix {
                        op: InfixOp::Gt,
                        left: Box::new(AstNode::Identifier("n".into(), tok())),
                        right: Box::new(AstNode::IntLiteral(10)),
                        token: tok(),
                    })),
                    body: Box::new(AstNode::StringLiteral("big".to_string())),
                },
                MatchArm {
                    pattern: Pattern::Literal(LiteralPattern::Integer(5)),
                    guard: None,
                    body: Box::new(AstNode::StringLiteral("five".to_string())),
                },
            ],
            token: tok(),
        };
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::String(s) if s.as_str() == "five"));
    }

    #[tokio::test]
    async fn recover_catches_recoverable_error_and_binds_error_object() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Recover {
            target: Box::new(AstNode::Infix {
                op: InfixOp::Div,
                left: Box::new(AstNode::IntLiteral(1)),
                right: Box::new(AstNode::IntLiteral(0)),
                token: tok(),
            }),
            fallback: Box::new(AstNode::Member {
                object: Box::new(AstNode::Identifier("error".into(), tok())),
                key: "kind".into(),
                token: tok(),
            }),
        };
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::String(s) if s.as_str() == "divide_by_zero"));
    }

    #[tokio::test]
    async fn spawn_then_await_returns_the_block_value() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let spawn_node = AstNode::Spawn {
            body: vec![AstNode::IntLiteral(42)],
            token: tok(),
        };
        let (task_val, _) = ev.evaluate(&spawn_node, &env).await.unwrap();
        let await_node = AstNode::Await {
            target: Box::new(AstNode::Identifier("t".into(), tok())),
            token: tok(),
        };
        env.define("t", task_val);
        let (v, _) = ev.evaluate(&await_node, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(42)));
    }

    #[tokio::test]
    async fn race_returns_first_arm_to_finish_and_cancels_the_rest() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        let node = AstNode::Race {
            arms: vec![
                AstNode::Call {
                    callee: Box::new(AstNode::Identifier("sleep".into(), tok())),
                    args: vec![CallArg::Value(AstNode::IntLiteral(50))],
                    token: tok(),
                },
                AstNode::IntLiteral(7),
            ],
            token: tok(),
        };
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(7)));
    }

    #[tokio::test]
    async fn index_supports_negative_array_indices() {
        let ev = test_support::test_evaluator();
        let env = Environment::root();
        env.define("arr", Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]));
        let node = AstNode::Index {
            object: Box::new(AstNode::Identifier("arr".into(), tok())),
            index: Box::new(AstNode::IntLiteral(-1)),
            token: tok(),
        };
        let (v, _) = ev.evaluate(&node, &env).await.unwrap();
        assert!(matches!(v, Value::Integer(3)));
    }
}
