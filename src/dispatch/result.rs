//! The [`DispatchResult`] taxonomy: every outcome the dispatcher can hand
//! back to a caller, plus the aggregation rules for fanned-out results.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// A value held in a [`ResultData`] map. `Null` is a first-class member
/// because aggregation must be able to represent "a child explicitly
/// reported no value here", which is then dropped during union
/// materialization (see [`DispatchResult::combined_result_data`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    String(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl ResultValue {
    fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }
}

/// String-keyed bag of auxiliary data a handler or processor can attach to
/// a [`DispatchResult`].
pub type ResultData = HashMap<String, ResultValue>;

/// One entry of a [`DispatchResult::ValidationFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub member: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            message: message.into(),
        }
    }
}

/// Sum type of every outcome the dispatcher can return. Never thrown across
/// the dispatcher boundary: callers inspect it through the predicates and
/// accessors below rather than catching an exception.
pub enum DispatchResult {
    /// A handler (or the dispatcher itself, for an empty publish) completed
    /// successfully. `value`, when present, is the type-erased payload a
    /// caller can retrieve with [`DispatchResult::success_value`].
    Success {
        value: Option<Box<dyn Any + Send + Sync>>,
        result_data: ResultData,
    },
    NotFound {
        result_data: ResultData,
    },
    EntityNotFound {
        entity_type: &'static str,
        entity_id: String,
        result_data: ResultData,
    },
    EntityAlreadyPresent {
        entity_type: &'static str,
        entity_id: String,
        result_data: ResultData,
    },
    ConcurrencyIssue {
        result_data: ResultData,
    },
    ValidationFailure {
        failures: Vec<ValidationError>,
        result_data: ResultData,
    },
    NotAuthenticated {
        result_data: ResultData,
    },
    NotAuthorized {
        result_data: ResultData,
    },
    Timeout {
        due_time: Duration,
        result_data: ResultData,
    },
    /// No handler handled the message (single-handler dispatch only).
    DispatchFailure {
        message_type: MessageType,
        result_data: ResultData,
    },
    /// Generic wrapper for an uncaught handler failure.
    Failure {
        message: String,
        result_data: ResultData,
    },
    /// Composite of zero or more child results, produced by publish-mode
    /// fan-out across more than one handler.
    Aggregate {
        children: Vec<DispatchResult>,
        extra_data: ResultData,
        combined: OnceLock<ResultData>,
    },
}

impl fmt::Debug for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { value, result_data } => f
                .debug_struct("Success")
                .field("has_value", &value.is_some())
                .field("result_data", result_data)
                .finish(),
            Self::NotFound { result_data } => {
                f.debug_struct("NotFound").field("result_data", result_data).finish()
            }
            Self::EntityNotFound {
                entity_type,
                entity_id,
                result_data,
            } => f
                .debug_struct("EntityNotFound")
                .field("entity_type", entity_type)
                .field("entity_id", entity_id)
                .field("result_data", result_data)
                .finish(),
            Self::EntityAlreadyPresent {
                entity_type,
                entity_id,
                result_data,
            } => f
                .debug_struct("EntityAlreadyPresent")
                .field("entity_type", entity_type)
                .field("entity_id", entity_id)
                .field("result_data", result_data)
                .finish(),
            Self::ConcurrencyIssue { result_data } => f
                .debug_struct("ConcurrencyIssue")
                .field("result_data", result_data)
                .finish(),
            Self::ValidationFailure { failures, result_data } => f
                .debug_struct("ValidationFailure")
                .field("failures", failures)
                .field("result_data", result_data)
                .finish(),
            Self::NotAuthenticated { result_data } => f
                .debug_struct("NotAuthenticated")
                .field("result_data", result_data)
                .finish(),
            Self::NotAuthorized { result_data } => f
                .debug_struct("NotAuthorized")
                .field("result_data", result_data)
                .finish(),
            Self::Timeout { due_time, result_data } => f
                .debug_struct("Timeout")
                .field("due_time", due_time)
                .field("result_data", result_data)
                .finish(),
            Self::DispatchFailure {
                message_type,
                result_data,
            } => f
                .debug_struct("DispatchFailure")
                .field("message_type", message_type)
                .field("result_data", result_data)
                .finish(),
            Self::Failure { message, result_data } => f
                .debug_struct("Failure")
                .field("message", message)
                .field("result_data", result_data)
                .finish(),
            Self::Aggregate { children, extra_data, .. } => f
                .debug_struct("Aggregate")
                .field("children", children)
                .field("extra_data", extra_data)
                .finish(),
        }
    }
}

impl DispatchResult {
    pub fn success() -> Self {
        Self::Success {
            value: None,
            result_data: ResultData::new(),
        }
    }

    pub fn success_with<T: Any + Send + Sync>(value: T) -> Self {
        Self::Success {
            value: Some(Box::new(value)),
            result_data: ResultData::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::NotFound {
            result_data: ResultData::new(),
        }
    }

    pub fn entity_not_found(entity_type: &'static str, entity_id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_type,
            entity_id: entity_id.into(),
            result_data: ResultData::new(),
        }
    }

    pub fn entity_already_present(entity_type: &'static str, entity_id: impl Into<String>) -> Self {
        Self::EntityAlreadyPresent {
            entity_type,
            entity_id: entity_id.into(),
            result_data: ResultData::new(),
        }
    }

    pub fn concurrency_issue() -> Self {
        Self::ConcurrencyIssue {
            result_data: ResultData::new(),
        }
    }

    pub fn validation_failure(failures: Vec<ValidationError>) -> Self {
        Self::ValidationFailure {
            failures,
            result_data: ResultData::new(),
        }
    }

    pub fn dispatch_failure(message_type: MessageType) -> Self {
        Self::DispatchFailure {
            message_type,
            result_data: ResultData::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            result_data: ResultData::new(),
        }
    }

    /// Wraps zero, one, or many child results the way publish-mode
    /// aggregation does: zero children collapses to a bare [`Self::success`],
    /// exactly one child is returned as-is, and two or more are wrapped in
    /// [`Self::Aggregate`].
    pub fn aggregate_or_single(children: Vec<DispatchResult>) -> Self {
        let mut children = children;
        match children.len() {
            0 => Self::success(),
            1 => children.remove(0),
            _ => Self::Aggregate {
                children,
                extra_data: ResultData::new(),
                combined: OnceLock::new(),
            },
        }
    }

    #[must_use]
    pub fn with_result_data(mut self, key: impl Into<String>, value: ResultValue) -> Self {
        self.own_result_data_mut().insert(key.into(), value);
        self
    }

    fn own_result_data_mut(&mut self) -> &mut ResultData {
        match self {
            Self::Success { result_data, .. }
            | Self::NotFound { result_data }
            | Self::EntityNotFound { result_data, .. }
            | Self::EntityAlreadyPresent { result_data, .. }
            | Self::ConcurrencyIssue { result_data }
            | Self::ValidationFailure { result_data, .. }
            | Self::NotAuthenticated { result_data }
            | Self::NotAuthorized { result_data }
            | Self::Timeout { result_data, .. }
            | Self::DispatchFailure { result_data, .. }
            | Self::Failure { result_data, .. } => result_data,
            Self::Aggregate { extra_data, .. } => extra_data,
        }
    }

    fn own_result_data(&self) -> &ResultData {
        match self {
            Self::Success { result_data, .. }
            | Self::NotFound { result_data }
            | Self::EntityNotFound { result_data, .. }
            | Self::EntityAlreadyPresent { result_data, .. }
            | Self::ConcurrencyIssue { result_data }
            | Self::ValidationFailure { result_data, .. }
            | Self::NotAuthenticated { result_data }
            | Self::NotAuthorized { result_data }
            | Self::Timeout { result_data, .. }
            | Self::DispatchFailure { result_data, .. }
            | Self::Failure { result_data, .. } => result_data,
            Self::Aggregate { extra_data, .. } => extra_data,
        }
    }

    /// `A.isSuccess = (A.children is empty) or (all children.isSuccess)` for
    /// an aggregate; the variant's own nature for everything else.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Success { .. } => true,
            Self::Aggregate { children, .. } => {
                children.is_empty() || children.iter().all(DispatchResult::is_success)
            }
            _ => false,
        }
    }

    pub fn is_validation_failed(&self) -> bool {
        self.any_self_or_child(|r| matches!(r, Self::ValidationFailure { .. }))
    }

    pub fn is_concurrency_issue(&self) -> bool {
        self.any_self_or_child(|r| matches!(r, Self::ConcurrencyIssue { .. }))
    }

    pub fn is_entity_not_found(&self) -> bool {
        self.any_self_or_child(|r| matches!(r, Self::EntityNotFound { .. }))
    }

    pub fn is_dispatch_failure(&self) -> bool {
        self.any_self_or_child(|r| matches!(r, Self::DispatchFailure { .. }))
    }

    fn any_self_or_child(&self, predicate: impl Fn(&DispatchResult) -> bool + Copy) -> bool {
        if predicate(self) {
            return true;
        }

        match self {
            Self::Aggregate { children, .. } => {
                children.iter().any(|c| c.any_self_or_child(predicate))
            }
            _ => false,
        }
    }

    /// Human-readable summary of the outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Success { .. } => "success".to_owned(),
            Self::NotFound { .. } => "not found".to_owned(),
            Self::EntityNotFound { entity_type, entity_id, .. } => {
                format!("entity not found: {entity_type}/{entity_id}")
            }
            Self::EntityAlreadyPresent { entity_type, entity_id, .. } => {
                format!("entity already present: {entity_type}/{entity_id}")
            }
            Self::ConcurrencyIssue { .. } => "concurrency token mismatch".to_owned(),
            Self::ValidationFailure { failures, .. } => {
                format!("validation failed: {} error(s)", failures.len())
            }
            Self::NotAuthenticated { .. } => "not authenticated".to_owned(),
            Self::NotAuthorized { .. } => "not authorized".to_owned(),
            Self::Timeout { due_time, .. } => format!("timed out after {due_time:?}"),
            Self::DispatchFailure { message_type, .. } => {
                format!("no handler handled message: {message_type}")
            }
            Self::Failure { message, .. } => message.clone(),
            Self::Aggregate { children, .. } => {
                format!("aggregate of {} result(s)", children.len())
            }
        }
    }

    /// Recursively inlines nested aggregates, preserving left-to-right
    /// order. Non-aggregate results pass through unchanged.
    pub fn flatten(self) -> DispatchResult {
        match self {
            Self::Aggregate { children, extra_data, .. } => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.flatten() {
                        Self::Aggregate { children: inner, .. } => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                Self::Aggregate {
                    children: flat,
                    extra_data,
                    combined: OnceLock::new(),
                }
            }
            other => other,
        }
    }

    /// Looks up a single result-data key: own data first, falling back to
    /// probing children in order (recursively) until a non-null hit.
    pub fn get_result_data(&self, key: &str) -> Option<&ResultValue> {
        if let Some(v) = self.own_result_data().get(key) {
            if !v.is_null() {
                return Some(v);
            }
        }

        if let Self::Aggregate { children, .. } = self {
            return children.iter().find_map(|c| c.get_result_data(key));
        }

        None
    }

    /// Full combined result-data map for an aggregate: lazily materialized
    /// on first access and cached thereafter. Non-aggregates just return
    /// their own map.
    pub fn combined_result_data(&self) -> &ResultData {
        match self {
            Self::Aggregate { combined, .. } => combined.get_or_init(|| self.materialize_combined()),
            _ => self.own_result_data(),
        }
    }

    fn materialize_combined(&self) -> ResultData {
        let Self::Aggregate { children, .. } = self else {
            return self.own_result_data().clone();
        };

        let mut order = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for k in self.own_result_data().keys() {
            if seen.insert(k.clone()) {
                order.push(k.clone());
            }
        }
        for child in children {
            for k in child.combined_result_data().keys() {
                if seen.insert(k.clone()) {
                    order.push(k.clone());
                }
            }
        }

        order
            .into_iter()
            .filter_map(|k| self.get_result_data(&k).map(|v| (k, v.clone())))
            .collect()
    }

    /// Probes for a typed success payload: direct match first, then (if the
    /// payload is itself a list) its first element, then — on an aggregate —
    /// the first child that resolves. Returns `None` rather than raising if
    /// nothing assignable is found.
    pub fn success_value<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Success { value: Some(boxed), .. } => boxed
                .downcast_ref::<T>()
                .or_else(|| boxed.downcast_ref::<Vec<T>>().and_then(|v| v.first())),
            Self::Aggregate { children, .. } => children.iter().find_map(Self::success_value::<T>),
            _ => None,
        }
    }
}

/// Serializable wire form of a [`DispatchResult`], used by a
/// [`crate::scope::MessageSerializer`] to carry a result back across a
/// [`crate::scope::RouteTransport`] boundary.
///
/// `Success`'s typed payload never crosses the wire untyped -- only its
/// `result_data` does, since a [`ResultValue`] can't carry an arbitrary
/// `Box<dyn Any>`. Likewise, the domain-failure variants that locally carry a
/// `&'static str`/[`MessageType`] tied to a compile-time type
/// (`EntityNotFound`, `EntityAlreadyPresent`, `DispatchFailure`) collapse
/// into a [`WireResult::Failure`] describing what was lost, rather than
/// inventing a fake `TypeId` to reconstruct them remotely -- see DESIGN.md
/// for why.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum WireResult {
    Success {
        result_data: ResultData,
    },
    NotFound {
        result_data: ResultData,
    },
    ConcurrencyIssue {
        result_data: ResultData,
    },
    ValidationFailure {
        failures: Vec<(String, String)>,
        result_data: ResultData,
    },
    NotAuthenticated {
        result_data: ResultData,
    },
    NotAuthorized {
        result_data: ResultData,
    },
    Timeout {
        due_time_millis: u64,
        result_data: ResultData,
    },
    Failure {
        message: String,
        result_data: ResultData,
    },
    Aggregate {
        children: Vec<WireResult>,
        extra_data: ResultData,
    },
}

impl From<&DispatchResult> for WireResult {
    fn from(result: &DispatchResult) -> Self {
        match result {
            DispatchResult::Success { result_data, .. } => WireResult::Success {
                result_data: result_data.clone(),
            },
            DispatchResult::NotFound { result_data } => WireResult::NotFound {
                result_data: result_data.clone(),
            },
            DispatchResult::EntityNotFound {
                entity_type,
                entity_id,
                result_data,
            } => WireResult::Failure {
                message: format!("entity not found: {entity_type}/{entity_id}"),
                result_data: result_data.clone(),
            },
            DispatchResult::EntityAlreadyPresent {
                entity_type,
                entity_id,
                result_data,
            } => WireResult::Failure {
                message: format!("entity already present: {entity_type}/{entity_id}"),
                result_data: result_data.clone(),
            },
            DispatchResult::ConcurrencyIssue { result_data } => WireResult::ConcurrencyIssue {
                result_data: result_data.clone(),
            },
            DispatchResult::ValidationFailure { failures, result_data } => WireResult::ValidationFailure {
                failures: failures.iter().map(|f| (f.member.clone(), f.message.clone())).collect(),
                result_data: result_data.clone(),
            },
            DispatchResult::NotAuthenticated { result_data } => WireResult::NotAuthenticated {
                result_data: result_data.clone(),
            },
            DispatchResult::NotAuthorized { result_data } => WireResult::NotAuthorized {
                result_data: result_data.clone(),
            },
            DispatchResult::Timeout { due_time, result_data } => WireResult::Timeout {
                due_time_millis: due_time.as_millis() as u64,
                result_data: result_data.clone(),
            },
            DispatchResult::DispatchFailure { message_type, result_data } => WireResult::Failure {
                message: format!("no handler handled message: {message_type}"),
                result_data: result_data.clone(),
            },
            DispatchResult::Failure { message, result_data } => WireResult::Failure {
                message: message.clone(),
                result_data: result_data.clone(),
            },
            DispatchResult::Aggregate { children, extra_data, .. } => WireResult::Aggregate {
                children: children.iter().map(WireResult::from).collect(),
                extra_data: extra_data.clone(),
            },
        }
    }
}

impl From<WireResult> for DispatchResult {
    fn from(wire: WireResult) -> Self {
        match wire {
            WireResult::Success { result_data } => DispatchResult::Success {
                value: None,
                result_data,
            },
            WireResult::NotFound { result_data } => DispatchResult::NotFound { result_data },
            WireResult::ConcurrencyIssue { result_data } => DispatchResult::ConcurrencyIssue { result_data },
            WireResult::ValidationFailure { failures, result_data } => DispatchResult::ValidationFailure {
                failures: failures
                    .into_iter()
                    .map(|(member, message)| ValidationError { member, message })
                    .collect(),
                result_data,
            },
            WireResult::NotAuthenticated { result_data } => DispatchResult::NotAuthenticated { result_data },
            WireResult::NotAuthorized { result_data } => DispatchResult::NotAuthorized { result_data },
            WireResult::Timeout { due_time_millis, result_data } => DispatchResult::Timeout {
                due_time: Duration::from_millis(due_time_millis),
                result_data,
            },
            WireResult::Failure { message, result_data } => DispatchResult::Failure { message, result_data },
            WireResult::Aggregate { children, extra_data } => DispatchResult::Aggregate {
                children: children.into_iter().map(DispatchResult::from).collect(),
                extra_data,
                combined: OnceLock::new(),
            },
        }
    }
}
