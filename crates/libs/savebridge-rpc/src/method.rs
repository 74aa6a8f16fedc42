use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The closed set of callable operations.
///
/// Each variant travels on the wire as a fixed opaque token; tokens are
/// compared exactly and never pattern matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodId {
    /// Helper announces readiness to the context that created it.
    Establish,
    /// Requester asks the helper for a writable save target.
    CallHelper,
    /// Helper asks the worker to stage a readable stream.
    CallWorker,
    /// Liveness probe.
    Heartbeat,
}

impl MethodId {
    pub const ALL: [MethodId; 4] =
        [MethodId::Establish, MethodId::CallHelper, MethodId::CallWorker, MethodId::Heartbeat];

    pub fn token(self) -> &'static str {
        match self {
            Self::Establish => "24210c56-6c8a-11f0-8000-fcd436b36def",
            Self::CallHelper => "24210c56-6c8a-11f0-8001-fcd436b36def",
            Self::CallWorker => "24210c56-6c8a-11f0-8002-fcd436b36def",
            Self::Heartbeat => "24210c56-6c8a-11f0-8003-fcd436b36def",
        }
    }

    /// Resolves a wire token. `None` marks a method nobody in this system defines.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.token() == token)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Establish => "establish",
            Self::CallHelper => "call_helper",
            Self::CallWorker => "call_worker",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MethodId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.token())
    }
}

impl<'de> Deserialize<'de> for MethodId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::from_token(&token)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown method token {token}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct_and_resolve_back() {
        for method in MethodId::ALL {
            assert_eq!(MethodId::from_token(method.token()), Some(method));
            let same = MethodId::ALL.iter().filter(|other| other.token() == method.token()).count();
            assert_eq!(same, 1);
        }
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        assert_eq!(MethodId::from_token("24210c56-6c8a-11f0-8004-fcd436b36def"), None);
        assert_eq!(MethodId::from_token("heartbeat"), None);
    }

    #[test]
    fn serializes_as_wire_token() {
        let json = serde_json::to_value(MethodId::Heartbeat).expect("serialize");
        assert_eq!(json, serde_json::json!("24210c56-6c8a-11f0-8003-fcd436b36def"));
        let err = serde_json::from_value::<MethodId>(serde_json::json!("nope"))
            .expect_err("unknown token must fail");
        assert!(err.to_string().contains("unknown method token"));
    }
}
