//! Tool integration framework
//!
//! Tools are plain [`ToolExecutor`]s. They are collected once at startup in
//! a closed [`ToolRegistry`] and only ever reach the model through the
//! mediation wrapper.

pub mod demo;
pub mod wrapper;

pub use demo::demo_tools;
pub use wrapper::{MediatedOutcome, MediatedResult, MediatedTool, MediatedToolSet, MediationContext};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;
use warden_common::{ActorContext, ToolCategory};

use crate::error::{SetupError, ToolFailure};
use crate::hitl::RiskAssessor;

/// Connection name used by Google-backed tools
pub const GOOGLE_CONNECTION: &str = "google-oauth2";

/// Executable half of a tool
#[async_trait]
pub trait ToolExecutor: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// JSON schema of the accepted arguments
    fn input_schema(&self) -> Value;

    /// Uses &self so one executor serves concurrent invocations
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure>;
}

/// Token material for one third-party connection
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedToken {
    pub connection: String,
    pub access_token: String,
    /// Empty means the token is not scope-restricted
    pub scopes: Vec<String>,
}

impl DelegatedToken {
    pub fn new(connection: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            access_token: access_token.into(),
            scopes: Vec::new(),
        }
    }

    pub fn covers(&self, scopes: &[&str]) -> bool {
        self.scopes.is_empty() || scopes.iter().all(|s| self.scopes.iter().any(|own| own == s))
    }
}

impl Debug for DelegatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedToken")
            .field("connection", &self.connection)
            .field("access_token", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Store of delegated credentials granted by the user
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn delegated_token(&self, connection: &str, scopes: &[&str]) -> Option<DelegatedToken>;
}

/// Vault over a fixed set of tokens, typically taken from the request
#[derive(Debug, Default, Clone)]
pub struct StaticVault {
    tokens: HashMap<String, DelegatedToken>,
}

impl StaticVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: DelegatedToken) -> Self {
        self.tokens.insert(token.connection.clone(), token);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialVault for StaticVault {
    async fn delegated_token(&self, connection: &str, scopes: &[&str]) -> Option<DelegatedToken> {
        self.tokens
            .get(connection)
            .filter(|token| token.covers(scopes))
            .cloned()
    }
}

/// What an executing tool may see of its caller
pub struct ToolContext {
    actor: ActorContext,
    vault: Arc<dyn CredentialVault>,
}

impl ToolContext {
    pub fn new(actor: ActorContext, vault: Arc<dyn CredentialVault>) -> Self {
        Self { actor, vault }
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    /// Token for `connection`, or the authorization interrupt naming what is missing
    pub async fn require_connection(
        &self,
        connection: &str,
        scopes: &[&str],
    ) -> Result<DelegatedToken, ToolFailure> {
        match self.vault.delegated_token(connection, scopes).await {
            Some(token) => Ok(token),
            None => Err(ToolFailure::authorization_required(
                connection,
                scopes,
                format!(
                    "Connect your {} account to continue. Authorization is required for: {}",
                    connection,
                    scopes.join(", ")
                ),
            )),
        }
    }
}

/// Description of a tool as offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool as declared: name, schema and (normally) an executor
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl ToolDefinition {
    /// Declaration without behaviour; wrapping it is a configuration fault
    pub fn declared(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            executor: None,
        }
    }

    pub fn from_executor(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            name: executor.name().to_string(),
            description: executor.description(),
            input_schema: executor.input_schema(),
            executor: Some(executor),
        }
    }

    pub fn executor(&self) -> Option<&Arc<dyn ToolExecutor>> {
        self.executor.as_ref()
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Registered tool with its policy classification resolved
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub category: Option<ToolCategory>,
    pub agent_role: &'static str,
}

/// Closed set of tools, built once at startup
#[derive(Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wrap every tool for one turn
    pub fn mediate(&self, ctx: Arc<MediationContext>) -> Result<MediatedToolSet, SetupError> {
        let tools = self
            .tools
            .values()
            .map(|tool| MediatedTool::wrap(&tool.definition, ctx.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MediatedToolSet::new(tools))
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, definition: ToolDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn register_executor(self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.register(ToolDefinition::from_executor(executor))
    }

    pub fn register_all(mut self, definitions: impl IntoIterator<Item = ToolDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Rejects duplicate names and tools without an executor
    pub fn build(self, assessor: &RiskAssessor) -> Result<ToolRegistry, SetupError> {
        let mut tools = BTreeMap::new();
        for definition in self.definitions {
            if definition.executor.is_none() {
                return Err(SetupError::MissingExecutor(definition.name));
            }
            if tools.contains_key(&definition.name) {
                return Err(SetupError::DuplicateTool(definition.name));
            }
            let policy = assessor.policy();
            let registered = RegisteredTool {
                category: policy.category_of(&definition.name),
                agent_role: policy.agent_role(&definition.name),
                definition,
            };
            if registered.category.is_none() {
                tracing::warn!(
                    tool = %registered.definition.name,
                    "tool is not in the risk policy table, unknown-tool policy applies"
                );
            }
            tools.insert(registered.definition.name.clone(), registered);
        }
        tracing::info!("Tool registry built with {} tools", tools.len());
        Ok(ToolRegistry { tools })
    }
}
