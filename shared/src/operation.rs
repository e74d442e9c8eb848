//! Logical operations submitted by callers
//!
//! An [`Operation`] is what callers hand to the client: the GraphQL
//! document plus optional name and variables. The kind decides delivery
//! semantics: queries and mutations resolve to exactly one result,
//! subscriptions to an unbounded stream.

use serde_json::Value;

use crate::protocol::OperationPayload;

/// The three GraphQL operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// True for operations that resolve to exactly one result.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self, OperationKind::Subscription)
    }
}

/// A logical operation to execute against the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Option<Value>,
}

impl Operation {
    fn new(kind: OperationKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    /// Creates a query operation.
    pub fn query(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, query)
    }

    /// Creates a mutation operation.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, query)
    }

    /// Creates a subscription operation.
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Subscription, query)
    }

    /// Sets the operation name (for multi-operation documents).
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Sets the variables object.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Lowers the operation to its wire payload.
    pub fn payload(&self) -> OperationPayload {
        OperationPayload {
            query: self.query.clone(),
            operation_name: self.operation_name.clone(),
            variables: self.variables.clone(),
        }
    }
}
