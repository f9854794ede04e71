//! Lua-backed design functions.
//!
//! Each call builds a fresh `Lua` state: the VM is not `Send`, and
//! per-call states keep functions from leaking globals into each other.
//! Sources are stored as function expressions, e.g.
//! `function(newDoc, oldDoc, userCtx, secObj) ... end`.
//!
//! A state only opens the `table`, `string`, `math` and `utf8` libraries,
//! and every call runs under an instruction budget and a memory limit.
//! Database admins (not only server admins) can install functions, so
//! nothing reachable from Lua may touch the host.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value as LVal};
use serde_json::Value;
use tracing::debug;

use super::convert::{json_to_lua, lua_to_json};
use super::{FunctionEngine, FunctionResponse, UpdateResult, ViewRow};
use crate::error::{AppError, AppResult};
use crate::validation::{ValidationFn, ValidationInput, ValidationOutcome};

/// Raised by the `forbidden(reason)` global; unwinds out of the Lua call.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Rejection(String);

fn rejection_reason(err: &mlua::Error) -> Option<String> {
    match err {
        mlua::Error::ExternalError(e) => e.downcast_ref::<Rejection>().map(|r| r.0.clone()),
        mlua::Error::CallbackError { cause, .. } => rejection_reason(cause),
        mlua::Error::WithContext { cause, .. } => rejection_reason(cause),
        _ => None,
    }
}

fn map_err(what: &str, err: mlua::Error) -> AppError {
    match rejection_reason(&err) {
        Some(reason) => AppError::forbidden(reason),
        None => AppError::internal(format!("{} failed: {}", what, err)),
    }
}

/// Raised from the instruction hook once a call has used up its budget.
#[derive(Debug, thiserror::Error)]
#[error("instruction budget of {0} exhausted")]
struct BudgetExhausted(u64);

/// Resource bounds applied to every Lua call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LuaLimits {
    pub max_instructions: u64,
    pub max_memory: usize,
}

impl Default for LuaLimits {
    fn default() -> Self { Self { max_instructions: 50_000_000, max_memory: 64 * 1024 * 1024 } }
}

const HOOK_INTERVAL: u32 = 10_000;

// Base-library entry points that load code or would let a function swallow the budget error.
const REMOVED_GLOBALS: [&str; 6] = ["load", "loadfile", "dofile", "require", "pcall", "xpcall"];

fn new_vm(limits: LuaLimits) -> mlua::Result<Lua> {
    let lua = Lua::new_with(StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8, LuaOptions::default())?;
    lua.set_memory_limit(limits.max_memory)?;
    let used = Cell::new(0u64);
    lua.set_hook(HookTriggers::new().every_nth_instruction(HOOK_INTERVAL), move |_, _| {
        let total = used.get() + u64::from(HOOK_INTERVAL);
        used.set(total);
        if total > limits.max_instructions {
            return Err(mlua::Error::external(BudgetExhausted(limits.max_instructions)));
        }
        Ok(())
    });
    let globals = lua.globals();
    for name in REMOVED_GLOBALS { globals.set(name, LVal::Nil)?; }
    globals.set("null", lua.null())?;
    let forbidden = lua.create_function(|_, reason: String| -> mlua::Result<()> {
        Err(mlua::Error::external(Rejection(reason)))
    })?;
    globals.set("forbidden", forbidden)?;
    let log = lua.create_function(|_, msg: String| {
        debug!(target: "docgate::engine", "lua: {}", msg);
        Ok(())
    })?;
    globals.set("log", log)?;
    drop(globals);
    Ok(lua)
}

fn compile<'lua>(lua: &'lua Lua, source: &str) -> mlua::Result<Function<'lua>> {
    lua.load(format!("return {}", source.trim())).eval::<Function>()
}

fn opt_doc<'lua>(lua: &'lua Lua, doc: Option<&Value>) -> mlua::Result<LVal<'lua>> {
    match doc {
        Some(d) => json_to_lua(lua, d),
        None => Ok(LVal::Nil),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LuaEngine {
    limits: LuaLimits,
}

impl LuaEngine {
    pub fn new() -> Self { Self::default() }

    pub fn with_limits(limits: LuaLimits) -> Self { Self { limits } }
}

impl FunctionEngine for LuaEngine {
    fn compile_check(&self, source: &str) -> AppResult<()> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        compile(&lua, source).map(|_| ()).map_err(|e| AppError::bad_request(format!("compilation_error: {}", e)))
    }

    fn validator(&self, id: &str, source: &str) -> AppResult<Arc<dyn ValidationFn>> {
        Ok(Arc::new(LuaValidator { id: id.to_string(), source: source.to_string(), limits: self.limits }))
    }

    fn update(&self, source: &str, doc: Option<&Value>, req: &Value) -> AppResult<UpdateResult> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        run_update(&lua, source, doc, req).map_err(|e| map_err("update function", e))
    }

    fn show(&self, source: &str, doc: Option<&Value>, req: &Value) -> AppResult<FunctionResponse> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        run_show(&lua, source, doc, req).map_err(|e| map_err("show function", e))
    }

    fn list(&self, source: &str, head: &Value, rows: Vec<Value>, req: &Value) -> AppResult<FunctionResponse> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        run_list(&lua, source, head, rows, req).map_err(|e| map_err("list function", e))
    }

    fn map(&self, source: &str, docs: &[Value]) -> AppResult<Vec<ViewRow>> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        run_map(&lua, source, docs).map_err(|e| map_err("map function", e))
    }
}

/// A `validate_doc_update` function called as `(newDoc, oldDoc, userCtx, secObj)`.
pub struct LuaValidator {
    id: String,
    source: String,
    limits: LuaLimits,
}

impl ValidationFn for LuaValidator {
    fn id(&self) -> &str { &self.id }

    fn evaluate(&self, input: &ValidationInput<'_>) -> AppResult<ValidationOutcome> {
        let lua = new_vm(self.limits).map_err(|e| map_err("lua init", e))?;
        match run_validator(&lua, &self.source, input) {
            Ok(()) => Ok(ValidationOutcome::Accepted),
            Err(e) => match rejection_reason(&e) {
                Some(reason) => Ok(ValidationOutcome::Rejected { reason }),
                None => Err(AppError::internal(format!("validate_doc_update in {} failed: {}", self.id, e))),
            },
        }
    }
}

fn run_validator(lua: &Lua, source: &str, input: &ValidationInput<'_>) -> mlua::Result<()> {
    let f = compile(lua, source)?;
    let user_ctx = input.identity.to_function_json(input.database);
    let args = (
        json_to_lua(lua, input.new_doc)?,
        opt_doc(lua, input.old_doc)?,
        json_to_lua(lua, &user_ctx)?,
        json_to_lua(lua, input.policy.raw())?,
    );
    f.call::<_, ()>(args)
}

fn run_update(lua: &Lua, source: &str, doc: Option<&Value>, req: &Value) -> mlua::Result<UpdateResult> {
    let f = compile(lua, source)?;
    let (new_doc, resp): (LVal, LVal) = f.call((opt_doc(lua, doc)?, json_to_lua(lua, req)?))?;
    let doc = match new_doc {
        LVal::Nil | LVal::Boolean(false) => None,
        other => Some(lua_to_json(lua, other)?),
    };
    let response = FunctionResponse::from_json(&lua_to_json(lua, resp)?, if doc.is_some() { 201 } else { 200 });
    Ok(UpdateResult { doc, response })
}

fn run_show(lua: &Lua, source: &str, doc: Option<&Value>, req: &Value) -> mlua::Result<FunctionResponse> {
    let f = compile(lua, source)?;
    let resp: LVal = f.call((opt_doc(lua, doc)?, json_to_lua(lua, req)?))?;
    Ok(FunctionResponse::from_json(&lua_to_json(lua, resp)?, 200))
}

#[derive(Default)]
struct ListState {
    rows: VecDeque<Value>,
    started: Option<Value>,
    chunks: Vec<String>,
}

fn run_list(lua: &Lua, source: &str, head: &Value, rows: Vec<Value>, req: &Value) -> mlua::Result<FunctionResponse> {
    let state = Rc::new(RefCell::new(ListState { rows: rows.into(), ..Default::default() }));

    let st = state.clone();
    let start = lua.create_function(move |lua, resp: LVal| {
        st.borrow_mut().started = Some(lua_to_json(lua, resp)?);
        Ok(())
    })?;
    let st = state.clone();
    let send = lua.create_function(move |_, chunk: String| {
        st.borrow_mut().chunks.push(chunk);
        Ok(())
    })?;
    let st = state.clone();
    let get_row = lua.create_function(move |lua, ()| {
        let next = st.borrow_mut().rows.pop_front();
        match next {
            Some(row) => json_to_lua(lua, &row),
            None => Ok(LVal::Nil),
        }
    })?;
    let globals = lua.globals();
    globals.set("start", start)?;
    globals.set("send", send)?;
    globals.set("getRow", get_row.clone())?;
    globals.set("get_row", get_row)?;

    let f = compile(lua, source)?;
    let tail: LVal = f.call((json_to_lua(lua, head)?, json_to_lua(lua, req)?))?;
    let tail = lua_to_json(lua, tail)?;

    let st = state.borrow();
    let mut response = match &st.started {
        Some(v) => FunctionResponse::from_json(v, 200),
        None => FunctionResponse::text(200, ""),
    };
    let mut body: String = response.body.clone();
    for chunk in st.chunks.iter() { body.push_str(chunk); }
    match tail {
        Value::String(s) => body.push_str(&s),
        Value::Null => {}
        other => body.push_str(&other.to_string()),
    }
    response.body = body;
    Ok(response)
}

fn run_map(lua: &Lua, source: &str, docs: &[Value]) -> mlua::Result<Vec<ViewRow>> {
    let emitted: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = emitted.clone();
    let emit = lua.create_function(move |lua, (k, v): (LVal, LVal)| {
        let pair = (lua_to_json(lua, k)?, lua_to_json(lua, v)?);
        sink.borrow_mut().push(pair);
        Ok(())
    })?;
    lua.globals().set("emit", emit)?;
    let f = compile(lua, source)?;

    let mut rows = Vec::new();
    for doc in docs {
        let id = doc.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
        f.call::<_, ()>(json_to_lua(lua, doc)?)?;
        for (key, value) in emitted.borrow_mut().drain(..) {
            rows.push(ViewRow { id: id.clone(), key, value });
        }
    }
    Ok(rows)
}
