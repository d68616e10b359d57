//! Scopes, window handles and the message envelope.

use core::fmt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Address, Origin};

/// Breadth of message delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Only subscribers inside the publisher's own execution context.
    #[serde(rename = "SELF")]
    Local,
    /// Only the singleton system context.
    #[serde(rename = "SYSTEM")]
    System,
    /// Every other live execution context.
    #[serde(rename = "GLOBAL")]
    Global,
}

impl Scope {
    pub fn name(&self) -> &'static str {
        match self {
            Scope::Local => "SELF",
            Scope::System => "SYSTEM",
            Scope::Global => "GLOBAL",
        }
    }

    /// Whether delivery at this scope may leave the publishing process.
    pub fn crosses_process(&self) -> bool {
        !matches!(self, Scope::Local)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle of a host window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// A message in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
    pub scope: Scope,
    /// Address of the publishing context.
    pub source: Address,
    /// Typed origin of the publishing context, used for echo suppression.
    pub origin: Origin,
}

impl Envelope {
    /// Build an envelope whose origin is parsed from `source`.
    pub fn new(topic: impl Into<String>, payload: Value, scope: Scope, source: Address) -> Self {
        let origin = source.origin();
        Self {
            topic: topic.into(),
            payload,
            scope,
            source,
            origin,
        }
    }

    /// Build an envelope from a typed payload.
    pub fn typed<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        scope: Scope,
        source: Address,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(topic, serde_json::to_value(payload)?, scope, source))
    }

    /// Override the origin (sub-frames publish under their own origin).
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Decode the payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{topic, PhasePayload, StartupPhase};

    #[test]
    fn test_scope_wire_names() {
        assert_eq!(serde_json::to_value(Scope::Local).unwrap(), "SELF");
        assert_eq!(serde_json::to_value(Scope::System).unwrap(), "SYSTEM");
        assert_eq!(serde_json::to_value(Scope::Global).unwrap(), "GLOBAL");
        assert!(!Scope::Local.crosses_process());
        assert!(Scope::Global.crosses_process());
    }

    #[test]
    fn test_envelope_origin_from_source() {
        let env = Envelope::new(
            "t",
            Value::Null,
            Scope::Global,
            Address::extension("a", "background.html"),
        );
        assert_eq!(env.origin, Origin::Extension { id: "a".into() });

        let env = env.with_origin(Origin::subframe("a"));
        assert!(matches!(env.origin, Origin::Subframe { .. }));
    }

    #[test]
    fn test_typed_payload() {
        let env = Envelope::typed(
            topic::STARTUP_PHASE,
            &PhasePayload { phase: StartupPhase::Ui },
            Scope::Global,
            Address::system(),
        )
        .unwrap();
        let decoded: PhasePayload = env.payload_as().unwrap();
        assert_eq!(decoded.phase, StartupPhase::Ui);
        assert!(env.origin.is_root());
    }
}
