/// The `session` object attached to `session.created`/`session.updated`.
/// Only the fields the engine consumes are modeled; the endpoint sends a
/// superset and serde drops the rest.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SessionResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
}

impl SessionResource {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }
}

/// The `response` object on response lifecycle events.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl ResponseResource {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitInformation {
    name: String,
    limit: i64,
    remaining: i64,
    reset_seconds: f64,
}

impl RateLimitInformation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn reset_seconds(&self) -> f64 {
        self.reset_seconds
    }
}
