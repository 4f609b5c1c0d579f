//! Function definitions, groups, and the toolset the loop builds from them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use tether_core::events::StatusOptions;
use tether_core::ids::CallId;
use tether_core::request::FunctionDeclaration;

use crate::error::FunctionError;
use crate::hooks::ProgressReporter;

/// Executable side of a function the model may call.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: CallContext) -> Result<Value, FunctionError>;
}

/// Adapts an async closure into a `FunctionHandler`.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F>
where
    F: Fn(Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
{
    async fn call(&self, args: Value, ctx: CallContext) -> Result<Value, FunctionError> {
        (self.0)(args, ctx).await
    }
}

type StatusFn = dyn Fn(Option<&str>, Option<&StatusOptions>) + Send + Sync;

/// Forwards progress status for one call to whoever is observing the run.
#[derive(Clone)]
pub struct StatusUpdater {
    inner: Arc<StatusFn>,
}

impl StatusUpdater {
    pub fn new(f: impl Fn(Option<&str>, Option<&StatusOptions>) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn update(&self, status: Option<&str>, opts: Option<StatusOptions>) {
        (self.inner)(status, opts.as_ref());
    }
}

/// Everything a handler gets besides its arguments.
#[derive(Clone)]
pub struct CallContext {
    pub call_id: CallId,
    pub status: StatusUpdater,
    pub reporter: Option<Arc<dyn ProgressReporter>>,
}

impl CallContext {
    pub fn detached(call_id: CallId) -> Self {
        Self {
            call_id,
            status: StatusUpdater::noop(),
            reporter: None,
        }
    }
}

pub struct FunctionDefinition {
    pub declaration: FunctionDeclaration,
    pub handler: Arc<dyn FunctionHandler>,
    pub icon: Option<String>,
    pub title: Option<String>,
}

impl FunctionDefinition {
    pub fn new(declaration: FunctionDeclaration, handler: Arc<dyn FunctionHandler>) -> Self {
        Self {
            declaration,
            handler,
            icon: None,
            title: None,
        }
    }

    pub fn from_fn<F, Fut>(declaration: FunctionDeclaration, f: F) -> Self
    where
        F: Fn(Value, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        Self::new(declaration, Arc::new(FnHandler(f)))
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }
}

/// A named bundle of definitions plus an optional shared instruction.
pub struct FunctionGroup {
    pub name: String,
    pub instruction: Option<String>,
    pub definitions: Vec<Arc<FunctionDefinition>>,
}

impl FunctionGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: None,
            definitions: Vec::new(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with(mut self, definition: FunctionDefinition) -> Self {
        self.definitions.push(Arc::new(definition));
        self
    }

    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        map_definitions(&self.definitions)
    }
}

pub fn map_definitions(definitions: &[Arc<FunctionDefinition>]) -> Vec<FunctionDeclaration> {
    definitions.iter().map(|d| d.declaration.clone()).collect()
}

pub type DefinitionMap = Arc<HashMap<String, Arc<FunctionDefinition>>>;

/// All active groups merged: one declaration list, one lookup table, one
/// system instruction.
pub struct Toolset {
    pub declarations: Vec<FunctionDeclaration>,
    pub definitions: DefinitionMap,
    pub instruction: Option<String>,
}

impl Toolset {
    pub fn from_groups(groups: &[FunctionGroup]) -> Self {
        let mut declarations = Vec::new();
        let mut definitions = HashMap::new();
        for group in groups {
            declarations.extend(group.declarations());
            for definition in &group.definitions {
                let name = definition.name().to_string();
                if definitions.insert(name.clone(), Arc::clone(definition)).is_some() {
                    warn!(function = %name, group = %group.name, "duplicate function name, last one wins");
                }
            }
        }

        let instructions: Vec<&str> = groups
            .iter()
            .filter_map(|g| g.instruction.as_deref())
            .filter(|i| !i.is_empty())
            .collect();
        let instruction = (!instructions.is_empty()).then(|| instructions.join("\n\n"));

        Self {
            declarations,
            definitions: Arc::new(definitions),
            instruction,
        }
    }
}

/// Deserialize handler arguments, mapping failures to `InvalidArguments`.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, FunctionError> {
    serde_json::from_value(args).map_err(|e| FunctionError::InvalidArguments(e.to_string()))
}
