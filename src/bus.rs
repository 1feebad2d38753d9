//! System bus access.
//!
//! The production [`BusctlBus`] drives systemd's `busctl` client in JSON mode,
//! so every bus round-trip goes through the same bounded [`CommandRunner`] as
//! the vendor tools. Replies are decoded from busctl's `{"type", "data"}`
//! envelope into plain [`serde_json::Value`]s.

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One object/interface on one bus service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTarget {
    pub service: &'static str,
    pub path: &'static str,
    pub interface: &'static str,
}

/// A typed D-Bus value, used for property writes and method arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusValue {
    Byte(u8),
    Bool(bool),
    U32(u32),
    Str(String),
    Struct(Vec<BusValue>),
    Array {
        element: String,
        items: Vec<BusValue>,
    },
}

impl BusValue {
    pub fn signature(&self) -> String {
        match self {
            BusValue::Byte(_) => "y".into(),
            BusValue::Bool(_) => "b".into(),
            BusValue::U32(_) => "u".into(),
            BusValue::Str(_) => "s".into(),
            BusValue::Struct(fields) => {
                let inner: String = fields.iter().map(BusValue::signature).collect();
                format!("({})", inner)
            }
            BusValue::Array { element, .. } => format!("a{}", element),
        }
    }

    /// Flatten into busctl's positional argument syntax.
    /// Arrays are prefixed with their length; structs are inlined.
    pub fn push_args(&self, args: &mut Vec<String>) {
        match self {
            BusValue::Byte(v) => args.push(v.to_string()),
            BusValue::Bool(v) => args.push(v.to_string()),
            BusValue::U32(v) => args.push(v.to_string()),
            BusValue::Str(v) => args.push(v.clone()),
            BusValue::Struct(fields) => fields.iter().for_each(|f| f.push_args(args)),
            BusValue::Array { items, .. } => {
                args.push(items.len().to_string());
                items.iter().for_each(|i| i.push_args(args));
            }
        }
    }

    /// The shape busctl's JSON mode reports for this value.
    pub fn to_json(&self) -> Value {
        match self {
            BusValue::Byte(v) => Value::from(*v),
            BusValue::Bool(v) => Value::from(*v),
            BusValue::U32(v) => Value::from(*v),
            BusValue::Str(v) => Value::from(v.as_str()),
            BusValue::Struct(fields) => Value::Array(fields.iter().map(BusValue::to_json).collect()),
            BusValue::Array { items, .. } => {
                Value::Array(items.iter().map(BusValue::to_json).collect())
            }
        }
    }
}

pub trait Bus: Send + Sync {
    fn get_property(&self, target: &BusTarget, property: &str, timeout: Duration) -> Result<Value>;

    fn set_property(
        &self,
        target: &BusTarget,
        property: &str,
        value: &BusValue,
        timeout: Duration,
    ) -> Result<()>;

    /// Call a method; returns the reply values as a JSON array (empty for void methods).
    fn call(
        &self,
        target: &BusTarget,
        method: &str,
        args: &[BusValue],
        timeout: Duration,
    ) -> Result<Value>;

    /// Check that the service answers on `target.path`.
    fn ping(&self, target: &BusTarget, timeout: Duration) -> Result<()>;
}

pub struct BusctlBus {
    runner: Arc<dyn CommandRunner>,
}

impl BusctlBus {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn busctl(&self, member: &str, service: &str, args: Vec<String>, timeout: Duration) -> Result<Value> {
        let mut argv = vec![
            "--system".to_string(),
            "--json=short".to_string(),
            format!("--timeout={}ms", timeout.as_millis().max(1)),
        ];
        argv.extend(args);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();

        let output = self.runner.run("busctl", &argv, timeout)?;
        if !output.success() {
            return Err(classify_failure(service, member, &output.stderr, timeout));
        }
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        let envelope: Value = serde_json::from_str(stdout).map_err(|e| Error::BadReply {
            member: member.to_string(),
            detail: format!("invalid busctl JSON: {}", e),
        })?;
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }
}

impl Bus for BusctlBus {
    fn get_property(&self, target: &BusTarget, property: &str, timeout: Duration) -> Result<Value> {
        let args = vec![
            "get-property".into(),
            target.service.into(),
            target.path.into(),
            target.interface.into(),
            property.into(),
        ];
        self.busctl(property, target.service, args, timeout)
    }

    fn set_property(
        &self,
        target: &BusTarget,
        property: &str,
        value: &BusValue,
        timeout: Duration,
    ) -> Result<()> {
        let mut args = vec![
            "set-property".into(),
            target.service.into(),
            target.path.into(),
            target.interface.into(),
            property.into(),
            value.signature(),
        ];
        value.push_args(&mut args);
        tracing::debug!("set {}.{} = {}", target.interface, property, value.to_json());
        self.busctl(property, target.service, args, timeout)?;
        Ok(())
    }

    fn call(
        &self,
        target: &BusTarget,
        method: &str,
        call_args: &[BusValue],
        timeout: Duration,
    ) -> Result<Value> {
        let mut args = vec![
            "call".into(),
            target.service.into(),
            target.path.into(),
            target.interface.into(),
            method.into(),
        ];
        if !call_args.is_empty() {
            args.push(call_args.iter().map(BusValue::signature).collect());
            call_args.iter().for_each(|a| a.push_args(&mut args));
        }
        match self.busctl(method, target.service, args, timeout)? {
            Value::Null => Ok(Value::Array(Vec::new())),
            data => Ok(data),
        }
    }

    fn ping(&self, target: &BusTarget, timeout: Duration) -> Result<()> {
        let args = vec![
            "call".into(),
            target.service.into(),
            target.path.into(),
            "org.freedesktop.DBus.Peer".into(),
            "Ping".into(),
        ];
        self.busctl("Ping", target.service, args, timeout)?;
        Ok(())
    }
}

/// Map busctl's stderr onto the error taxonomy.
pub fn classify_failure(service: &str, member: &str, stderr: &str, timeout: Duration) -> Error {
    const UNAVAILABLE_MARKERS: &[&str] = &[
        "ServiceUnknown",
        "not provided by any .service",
        "not activatable",
        "Could not activate remote peer",
        "Unknown object",
        "Failed to connect to bus",
        "NameHasNoOwner",
    ];

    let detail = stderr.trim().to_string();
    if detail.contains("Connection timed out") || detail.contains("NoReply") {
        return Error::Timeout {
            operation: format!("{} on {}", member, service),
            after: timeout,
        };
    }
    if UNAVAILABLE_MARKERS.iter().any(|m| detail.contains(m)) {
        return Error::BusServiceUnavailable {
            service: service.to_string(),
            detail,
        };
    }
    Error::BusRejected {
        member: member.to_string(),
        detail,
    }
}

fn bad_reply(member: &str, value: &Value) -> Error {
    Error::BadReply {
        member: member.to_string(),
        detail: format!("unexpected value {}", value),
    }
}

pub fn json_u32(value: &Value, member: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| bad_reply(member, value))
}

pub fn json_bool(value: &Value, member: &str) -> Result<bool> {
    value.as_bool().ok_or_else(|| bad_reply(member, value))
}

pub fn json_str(value: &Value, member: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| bad_reply(member, value))
}

pub fn json_array<'a>(value: &'a Value, member: &str) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| bad_reply(member, value))
}

pub fn json_u32_list(value: &Value, member: &str) -> Result<Vec<u32>> {
    json_array(value, member)?
        .iter()
        .map(|v| json_u32(v, member))
        .collect()
}

/// First value of a method reply.
pub fn first_return<'a>(reply: &'a Value, member: &str) -> Result<&'a Value> {
    json_array(reply, member)?
        .first()
        .ok_or_else(|| bad_reply(member, reply))
}
