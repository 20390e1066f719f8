use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use skiff_core::state::TaskState;
use skiff_core::task::{Task, TaskMode};
use skiff_transport::QueueSender;

use crate::context::AgentContext;
use crate::raptor::FunctionRegistry;

/// Result record surfaced in the terminal state update of a raptor
/// request.
fn result_details(out: &serde_json::Value) -> String {
    serde_json::json!({ "return_value": out }).to_string()
}

pub struct Worker {
    pub uid: String,
    ctx: AgentContext,
    functions: Arc<FunctionRegistry>,
    cancels: Arc<Mutex<HashSet<String>>>,
    done_tx: QueueSender<(String, String)>,
}

impl Worker {
    pub fn new(
        uid: String,
        ctx: AgentContext,
        functions: Arc<FunctionRegistry>,
        cancels: Arc<Mutex<HashSet<String>>>,
        done_tx: QueueSender<(String, String)>,
    ) -> Self {
        Self {
            uid,
            ctx,
            functions,
            cancels,
            done_tx,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Task>) {
        info!(worker = %self.uid, "raptor worker up");
        while let Some(mut task) = rx.recv().await {
            if self.cancels.lock().unwrap().remove(&task.uid) {
                self.ctx.advance(&mut task, TaskState::Canceled, None).await;
            } else {
                self.execute(&mut task).await;
            }
            let _ = self.done_tx.put((self.uid.clone(), task.uid.clone())).await;
        }
        debug!(worker = %self.uid, "raptor worker down");
    }

    async fn execute(&self, task: &mut Task) {
        self.ctx.advance(task, TaskState::AgentExecuting, None).await;
        match self.dispatch(task).await {
            Ok(out) => {
                task.exit_code = Some(0);
                self.ctx
                    .advance(task, TaskState::Done, Some(result_details(&out)))
                    .await;
            }
            Err(e) => self.ctx.fail(task, e).await,
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<serde_json::Value, String> {
        let td = &task.description;
        match td.mode {
            TaskMode::Function => {
                let name = td
                    .function
                    .as_deref()
                    .ok_or_else(|| "function request without function name".to_string())?;
                let args = td.args_json.clone().unwrap_or(serde_json::Value::Null);
                self.functions.call(name, &args)
            }
            TaskMode::Eval => {
                let expr = td
                    .function
                    .as_deref()
                    .ok_or_else(|| "eval request without expression".to_string())?;
                eval_expr(expr).map(serde_json::Value::from)
            }
            TaskMode::Exec | TaskMode::Proc => {
                let output = Command::new(&td.executable)
                    .args(&td.arguments)
                    .envs(&td.environment)
                    .output()
                    .await
                    .map_err(|e| format!("spawn {}: {e}", td.executable))?;
                self.subprocess_result(output)
            }
            TaskMode::Shell => {
                let output = Command::new("/bin/sh")
                    .arg("-c")
                    .arg(&td.executable)
                    .envs(&td.environment)
                    .output()
                    .await
                    .map_err(|e| format!("spawn shell: {e}"))?;
                self.subprocess_result(output)
            }
            other => Err(format!("mode {other:?} is not a raptor request")),
        }
    }

    fn subprocess_result(&self, output: std::process::Output) -> Result<serde_json::Value, String> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            Ok(serde_json::json!({ "stdout": stdout, "stderr": stderr }))
        } else {
            Err(format!(
                "exited with {}: {stderr}",
                output.status.code().unwrap_or(-1)
            ))
        }
    }
}

/// Tiny arithmetic evaluator for `task.eval` requests: numbers, `+ - * /`
/// and parentheses.
pub fn eval_expr(expr: &str) -> Result<f64, String> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let value = parse_sum(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("trailing input at offset {pos} in `{expr}`"));
    }
    Ok(value)
}

fn parse_sum(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut acc = parse_product(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '+' => {
                *pos += 1;
                acc += parse_product(tokens, pos)?;
            }
            '-' => {
                *pos += 1;
                acc -= parse_product(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(acc)
}

fn parse_product(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut acc = parse_atom(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '*' => {
                *pos += 1;
                acc *= parse_atom(tokens, pos)?;
            }
            '/' => {
                *pos += 1;
                acc /= parse_atom(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(acc)
}

fn parse_atom(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_sum(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                return Err("missing `)`".into());
            }
            *pos += 1;
            Ok(value)
        }
        Some('-') => {
            *pos += 1;
            Ok(-parse_atom(tokens, pos)?)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while tokens
                .get(*pos)
                .map(|c| c.is_ascii_digit() || *c == '.')
                .unwrap_or(false)
            {
                *pos += 1;
            }
            let text: String = tokens[start..*pos].iter().collect();
            text.parse().map_err(|_| format!("bad number `{text}`"))
        }
        other => Err(format!("unexpected token {other:?}")),
    }
}
