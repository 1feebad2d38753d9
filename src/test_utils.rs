//! In-memory stand-ins for the bus and external commands.

use crate::bus::{Bus, BusTarget, BusValue};
use crate::command::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scripted [`CommandRunner`]. Commands are matched on the full command line;
/// anything unscripted succeeds with empty output.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    hung: Mutex<HashSet<String>>,
    installed: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRunner {
    pub fn respond(&self, command: &str, output: CommandOutput) {
        if let Some(program) = command.split_whitespace().next() {
            self.installed.lock().unwrap().insert(program.to_string());
        }
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output);
    }

    /// The command never finishes within its timeout.
    pub fn hang(&self, command: &str) {
        self.hung.lock().unwrap().insert(command.to_string());
    }

    pub fn install(&self, program: &str) {
        self.installed.lock().unwrap().insert(program.to_string());
    }

    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().insert(program.to_string());
    }

    pub fn invocations(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn input_for(&self, command: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == command)
            .and_then(|(_, input)| input.clone())
    }
}

impl CommandRunner for FakeRunner {
    fn run_input(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls
            .lock()
            .unwrap()
            .push((line.clone(), input.map(str::to_string)));

        if self.missing.lock().unwrap().contains(program) {
            return Err(Error::CommandNotFound {
                program: program.to_string(),
            });
        }
        if self.hung.lock().unwrap().contains(&line) {
            return Err(Error::Timeout {
                operation: line,
                after: timeout,
            });
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&line)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn exists(&self, program: &str) -> bool {
        self.installed.lock().unwrap().contains(program)
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Unavailable,
    Rejected,
    Timeout,
}

/// In-memory [`Bus`]: properties are JSON values keyed by
/// `interface.property`, writes are stored back and recorded.
#[derive(Default)]
pub struct FakeBus {
    properties: Mutex<HashMap<String, Value>>,
    replies: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, Failure>>,
    down: Mutex<HashSet<String>>,
    writes: Mutex<Vec<(String, Value)>>,
    calls: Mutex<Vec<(String, Value)>>,
}

fn key(target: &BusTarget, member: &str) -> String {
    format!("{}.{}", target.interface, member)
}

impl FakeBus {
    pub fn set(&self, interface: &str, property: &str, value: Value) {
        self.properties
            .lock()
            .unwrap()
            .insert(format!("{}.{}", interface, property), value);
    }

    pub fn get(&self, interface: &str, property: &str) -> Option<Value> {
        self.properties
            .lock()
            .unwrap()
            .get(&format!("{}.{}", interface, property))
            .cloned()
    }

    pub fn reply(&self, interface: &str, method: &str, value: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert(format!("{}.{}", interface, method), value);
    }

    /// Every request to `service` fails as if it were not running.
    pub fn service_down(&self, service: &str) {
        self.down.lock().unwrap().insert(service.to_string());
    }

    pub fn reject(&self, interface: &str, member: &str) {
        self.fail(interface, member, Failure::Rejected);
    }

    pub fn time_out(&self, interface: &str, member: &str) {
        self.fail(interface, member, Failure::Timeout);
    }

    pub fn unavailable(&self, interface: &str, member: &str) {
        self.fail(interface, member, Failure::Unavailable);
    }

    fn fail(&self, interface: &str, member: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("{}.{}", interface, member), failure);
    }

    /// Property writes in order, as `(interface.property, value)`.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, target: &BusTarget, member: &str, timeout: Duration) -> Result<()> {
        if self.down.lock().unwrap().contains(target.service) {
            return Err(Error::BusServiceUnavailable {
                service: target.service.to_string(),
                detail: "name has no owner".into(),
            });
        }
        match self.failures.lock().unwrap().get(&key(target, member)) {
            None => Ok(()),
            Some(Failure::Unavailable) => Err(Error::BusServiceUnavailable {
                service: target.service.to_string(),
                detail: "not activatable".into(),
            }),
            Some(Failure::Rejected) => Err(Error::BusRejected {
                member: member.to_string(),
                detail: "rejected by fake".into(),
            }),
            Some(Failure::Timeout) => Err(Error::Timeout {
                operation: member.to_string(),
                after: timeout,
            }),
        }
    }
}

impl Bus for FakeBus {
    fn get_property(&self, target: &BusTarget, property: &str, timeout: Duration) -> Result<Value> {
        self.check(target, property, timeout)?;
        self.properties
            .lock()
            .unwrap()
            .get(&key(target, property))
            .cloned()
            .ok_or_else(|| Error::BusRejected {
                member: property.to_string(),
                detail: "unknown property".into(),
            })
    }

    fn set_property(
        &self,
        target: &BusTarget,
        property: &str,
        value: &BusValue,
        timeout: Duration,
    ) -> Result<()> {
        self.check(target, property, timeout)?;
        let json = value.to_json();
        self.writes
            .lock()
            .unwrap()
            .push((key(target, property), json.clone()));
        self.properties
            .lock()
            .unwrap()
            .insert(key(target, property), json);
        Ok(())
    }

    fn call(
        &self,
        target: &BusTarget,
        method: &str,
        args: &[BusValue],
        timeout: Duration,
    ) -> Result<Value> {
        self.check(target, method, timeout)?;
        let args = Value::Array(args.iter().map(BusValue::to_json).collect());
        self.calls
            .lock()
            .unwrap()
            .push((key(target, method), args));
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(&key(target, method))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    fn ping(&self, target: &BusTarget, timeout: Duration) -> Result<()> {
        self.check(target, "Ping", timeout)
    }
}
